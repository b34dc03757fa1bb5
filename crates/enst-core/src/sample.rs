//! Ingestion boundary: loosely-typed telemetry objects → typed samples.
//!
//! Every concept has one ordered list of accepted field names. The first
//! alias present with a usable value wins, so `power_w` beats `power` when a
//! record carries both. Resolution happens once here; aggregators only ever
//! see [`UsageSample`] and [`PowerSample`].

use serde_json::{Map, Value};

use crate::window::to_micros;

pub const TIMESTAMP_ALIASES: &[&str] = &["timestamp", "ts", "time", "timestamp_us", "ts_start"];
pub const SITE_ALIASES: &[&str] = &["site_id", "site", "system", "machine"];
pub const CLUSTER_ALIASES: &[&str] = &["cluster_id", "cluster", "partition"];

pub const CPU_ALIASES: &[&str] = &["cpu_util", "cpu_fraction", "cpu_utilization", "cpu"];
pub const GPU_ALIASES: &[&str] = &["gpu_util", "gpu_fraction", "gpu_utilization", "gpu"];
pub const MEM_ALIASES: &[&str] = &["mem_util", "mem_fraction", "memory_utilization", "mem"];
pub const EVENT_ALIASES: &[&str] = &["event_marker", "event", "job_event"];
pub const CPU_CORE_SECONDS_ALIASES: &[&str] = &["cpu_core_seconds", "core_seconds", "cpu_seconds"];
pub const GPU_SECONDS_ALIASES: &[&str] = &["gpu_seconds", "gpu_secs"];
pub const VALIDATED_STEPS_ALIASES: &[&str] = &["validated_steps", "validated_work"];
pub const TIMESTEPS_ALIASES: &[&str] = &["timesteps", "steps", "iterations"];

pub const POWER_ALIASES: &[&str] = &["power_w", "power_watts", "power", "watts"];
pub const PUE_ALIASES: &[&str] = &["pue"];
pub const THERMAL_HEADROOM_ALIASES: &[&str] =
    &["thermal_headroom_w", "thermal_headroom", "headroom_w"];
pub const GRID_STRESS_ALIASES: &[&str] = &["grid_stress_index", "grid_stress"];
pub const PRICE_ALIASES: &[&str] = &["price_usd_per_mwh", "price_per_mwh", "price"];

/// Canonical compute-utilization sample.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSample {
    pub ts_us: i64,
    pub site_id: String,
    pub cluster_id: Option<String>,
    pub cpu_fraction: Option<f64>,
    pub gpu_fraction: Option<f64>,
    pub mem_fraction: Option<f64>,
    pub event_marker: bool,
    pub cpu_core_seconds: Option<f64>,
    pub gpu_seconds: Option<f64>,
    pub validated_steps: Option<f64>,
    pub timesteps: Option<f64>,
}

/// Canonical power sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSample {
    pub ts_us: i64,
    pub site_id: String,
    pub cluster_id: Option<String>,
    pub power_watts: Option<f64>,
    pub pue: Option<f64>,
    pub thermal_headroom_w: Option<f64>,
    pub grid_stress_index: Option<f64>,
    pub price_usd_per_mwh: Option<f64>,
}

/// Read a finite number from a JSON number or numeric string.
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First alias whose value parses as a finite number.
pub fn resolve_number(obj: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    aliases
        .iter()
        .find_map(|name| obj.get(*name).and_then(as_number))
}

/// First alias whose value is a non-empty string (numbers are stringified).
pub fn resolve_text(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|name| obj.get(*name).and_then(as_text))
}

fn resolve_event(obj: &Map<String, Value>) -> bool {
    EVENT_ALIASES.iter().any(|name| match obj.get(*name) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(_) => true,
    })
}

fn resolve_identity(value: &Value) -> Option<(&Map<String, Value>, i64, String)> {
    let obj = value.as_object()?;
    let ts_us = resolve_number(obj, TIMESTAMP_ALIASES).and_then(to_micros)?;
    let site_id = resolve_text(obj, SITE_ALIASES)?;
    Some((obj, ts_us, site_id))
}

impl UsageSample {
    /// Resolve a raw record. `None` when it has no usable site or timestamp.
    pub fn from_value(value: &Value) -> Option<Self> {
        let (obj, ts_us, site_id) = resolve_identity(value)?;
        Some(Self {
            ts_us,
            site_id,
            cluster_id: resolve_text(obj, CLUSTER_ALIASES),
            cpu_fraction: resolve_number(obj, CPU_ALIASES),
            gpu_fraction: resolve_number(obj, GPU_ALIASES),
            mem_fraction: resolve_number(obj, MEM_ALIASES),
            event_marker: resolve_event(obj),
            cpu_core_seconds: resolve_number(obj, CPU_CORE_SECONDS_ALIASES),
            gpu_seconds: resolve_number(obj, GPU_SECONDS_ALIASES),
            validated_steps: resolve_number(obj, VALIDATED_STEPS_ALIASES),
            timesteps: resolve_number(obj, TIMESTEPS_ALIASES),
        })
    }
}

impl PowerSample {
    /// Resolve a raw record. `None` when it has no usable site or timestamp.
    pub fn from_value(value: &Value) -> Option<Self> {
        let (obj, ts_us, site_id) = resolve_identity(value)?;
        Some(Self {
            ts_us,
            site_id,
            cluster_id: resolve_text(obj, CLUSTER_ALIASES),
            power_watts: resolve_number(obj, POWER_ALIASES),
            pue: resolve_number(obj, PUE_ALIASES),
            thermal_headroom_w: resolve_number(obj, THERMAL_HEADROOM_ALIASES),
            grid_stress_index: resolve_number(obj, GRID_STRESS_ALIASES),
            price_usd_per_mwh: resolve_number(obj, PRICE_ALIASES),
        })
    }
}
