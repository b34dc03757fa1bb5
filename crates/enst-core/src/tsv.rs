//! Temporal state vector: the merged per-window record that flows through
//! every stage after ingestion.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{EnstError, Result};
use crate::policy::Violation;
use crate::power::PowerWindow;
use crate::usage::UsageWindow;
use crate::window::WindowKey;
use crate::work_units::WorkUnitsKind;

/// Cluster id used when neither side of a window names one.
pub const DEFAULT_CLUSTER_ID: &str = "default";
/// Data source tag used when the caller does not provide one.
pub const DEFAULT_DATA_SOURCE: &str = "unknown";

/// One merged window.
///
/// `None` means "no data", which downstream stages keep distinct from zero.
/// `enst` is only ever present when `energy_j > 0` and `work_units` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsvRecord {
    /// Window start, microseconds.
    pub ts_start: i64,
    /// Window end, microseconds.
    pub ts_end: i64,
    #[serde(alias = "site")]
    pub site_id: String,
    #[serde(alias = "cluster")]
    pub cluster_id: String,
    pub cpu_util: Option<f64>,
    pub gpu_util: Option<f64>,
    pub mem_util: Option<f64>,
    pub job_queue_depth: u64,
    pub resource_seconds: Option<f64>,
    pub cpu_core_seconds: Option<f64>,
    pub gpu_seconds: Option<f64>,
    pub validated_steps: Option<u64>,
    pub timesteps: Option<u64>,
    #[serde(alias = "power_watts")]
    pub power_w: Option<f64>,
    pub energy_j: Option<f64>,
    pub pue: Option<f64>,
    pub thermal_headroom_w: Option<f64>,
    pub grid_stress_index: Option<f64>,
    pub window_duration_s: u64,
    pub price_usd_per_mwh: Option<f64>,
    pub data_source: String,
    pub work_units: Option<f64>,
    pub work_units_mode: Option<WorkUnitsKind>,
    pub validated_work_units: Option<f64>,
    pub enst: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle_applied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrate_flag: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_violations: Option<Vec<Violation>>,
}

impl Default for TsvRecord {
    fn default() -> Self {
        Self {
            ts_start: 0,
            ts_end: 0,
            site_id: String::new(),
            cluster_id: DEFAULT_CLUSTER_ID.to_string(),
            cpu_util: None,
            gpu_util: None,
            mem_util: None,
            job_queue_depth: 0,
            resource_seconds: None,
            cpu_core_seconds: None,
            gpu_seconds: None,
            validated_steps: None,
            timesteps: None,
            power_w: None,
            energy_j: None,
            pue: None,
            thermal_headroom_w: None,
            grid_stress_index: None,
            window_duration_s: 0,
            price_usd_per_mwh: None,
            data_source: DEFAULT_DATA_SOURCE.to_string(),
            work_units: None,
            work_units_mode: None,
            validated_work_units: None,
            enst: None,
            throttle_applied: None,
            throttle_factor: None,
            migrate_flag: None,
            policy_violations: None,
        }
    }
}

impl TsvRecord {
    /// Empty record for one site window.
    pub fn new(site_id: impl Into<String>, ts_start: i64, ts_end: i64) -> Self {
        let window_duration_s = (ts_end.saturating_sub(ts_start).max(0) / 1_000_000) as u64;
        Self {
            site_id: site_id.into(),
            ts_start,
            ts_end,
            window_duration_s,
            ..Self::default()
        }
    }

    /// Parse one NDJSON line.
    pub fn from_json_line(line: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(line)?)
    }

    /// Convert an already-parsed JSON object.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let record: Self = serde_json::from_value(value)?;
        if record.site_id.is_empty() {
            return Err(EnstError::MalformedRecord("record has no site_id".to_string()));
        }
        Ok(record)
    }

    /// Serialize as one NDJSON line (without the trailing newline).
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Window duration in seconds, falling back to the `ts_*` bounds.
    pub fn duration_secs(&self) -> f64 {
        if self.window_duration_s > 0 {
            self.window_duration_s as f64
        } else {
            self.ts_end.saturating_sub(self.ts_start).max(0) as f64 / 1_000_000.0
        }
    }
}

/// Outer-joins usage and power windows into [`TsvRecord`]s.
#[derive(Debug)]
pub struct TsvNormalizer {
    data_source: String,
    usage: BTreeMap<WindowKey, UsageWindow>,
    power: BTreeMap<WindowKey, PowerWindow>,
}

impl TsvNormalizer {
    pub fn new(data_source: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            usage: BTreeMap::new(),
            power: BTreeMap::new(),
        }
    }

    pub fn add_usage(&mut self, window: UsageWindow) {
        let key = WindowKey {
            site_id: window.site_id.clone(),
            window_start: window.ts_start,
        };
        if self.usage.insert(key, window).is_some() {
            log::warn!("duplicate usage window replaced");
        }
    }

    pub fn add_power(&mut self, window: PowerWindow) {
        let key = WindowKey {
            site_id: window.site_id.clone(),
            window_start: window.ts_start,
        };
        if self.power.insert(key, window).is_some() {
            log::warn!("duplicate power window replaced");
        }
    }

    pub fn extend_usage(&mut self, windows: impl IntoIterator<Item = UsageWindow>) {
        for w in windows {
            self.add_usage(w);
        }
    }

    pub fn extend_power(&mut self, windows: impl IntoIterator<Item = PowerWindow>) {
        for w in windows {
            self.add_power(w);
        }
    }

    /// Full outer join over the union of keys, in key order.
    pub fn emit(self) -> impl Iterator<Item = TsvRecord> {
        let Self {
            data_source,
            mut usage,
            mut power,
        } = self;
        let keys: BTreeSet<WindowKey> = usage.keys().chain(power.keys()).cloned().collect();
        keys.into_iter().map(move |key| {
            let u = usage.remove(&key);
            let p = power.remove(&key);
            join_window(key, u, p, &data_source)
        })
    }
}

fn join_window(
    key: WindowKey,
    usage: Option<UsageWindow>,
    power: Option<PowerWindow>,
    data_source: &str,
) -> TsvRecord {
    let (ts_end, window_duration_s) = match (&usage, &power) {
        (Some(u), _) => (u.ts_end, u.window_duration_s),
        (None, Some(p)) => (p.ts_end, p.window_duration_s),
        (None, None) => (key.window_start, 0),
    };
    let cluster_id = usage
        .as_ref()
        .and_then(|u| u.cluster_id.clone())
        .or_else(|| power.as_ref().and_then(|p| p.cluster_id.clone()))
        .unwrap_or_else(|| DEFAULT_CLUSTER_ID.to_string());

    let mut rec = TsvRecord {
        ts_start: key.window_start,
        ts_end,
        site_id: key.site_id,
        cluster_id,
        window_duration_s,
        data_source: data_source.to_string(),
        ..TsvRecord::default()
    };

    if let Some(u) = usage {
        rec.cpu_util = Some(u.cpu_util);
        rec.gpu_util = u.gpu_util;
        rec.mem_util = u.mem_util;
        rec.job_queue_depth = u.job_queue_depth;
        rec.resource_seconds = Some(u.resource_seconds);
        rec.cpu_core_seconds = u.cpu_core_seconds;
        rec.gpu_seconds = u.gpu_seconds;
        rec.validated_steps = u.validated_steps;
        rec.timesteps = u.timesteps;
    }
    if let Some(p) = power {
        rec.power_w = p.power_w;
        rec.energy_j = Some(p.energy_j);
        rec.pue = p.pue;
        rec.thermal_headroom_w = p.thermal_headroom_w;
        rec.grid_stress_index = p.grid_stress_index;
        rec.price_usd_per_mwh = p.price_usd_per_mwh;
    }
    rec
}
