//! Power aggregation and trapezoidal energy integration.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sample::PowerSample;
use crate::usage::mean;
use crate::window::{WindowKey, WindowKeyer};

const MICROS_PER_SEC: f64 = 1_000_000.0;

/// Finalized power aggregate for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerWindow {
    pub site_id: String,
    pub cluster_id: Option<String>,
    pub ts_start: i64,
    pub ts_end: i64,
    pub window_duration_s: u64,
    pub power_w: Option<f64>,
    pub energy_j: f64,
    pub pue: Option<f64>,
    pub thermal_headroom_w: Option<f64>,
    pub grid_stress_index: Option<f64>,
    pub price_usd_per_mwh: Option<f64>,
    pub sample_count: usize,
}

#[derive(Debug, Default)]
struct PowerBucket {
    ts_start: i64,
    ts_end: i64,
    clusters: BTreeSet<String>,
    readings: Vec<(i64, f64)>,
    pue: Vec<f64>,
    thermal: Vec<f64>,
    grid: Vec<f64>,
    price: Vec<f64>,
    samples: usize,
}

/// Integrate power readings over one window.
///
/// - no readings: `0`
/// - one reading: constant power across the whole window
/// - otherwise: trapezoidal rule over the time-sorted readings
///
/// Readings are sorted here, so callers may pass them in any order.
pub fn integrate_energy(readings: &mut [(i64, f64)], window_secs: f64) -> f64 {
    match readings.len() {
        0 => 0.0,
        1 => readings[0].1 * window_secs,
        _ => {
            readings.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
            readings
                .windows(2)
                .map(|pair| {
                    let (t0, p0) = pair[0];
                    let (t1, p1) = pair[1];
                    let dt = t1.saturating_sub(t0) as f64 / MICROS_PER_SEC;
                    (p0 + p1) / 2.0 * dt
                })
                .sum()
        }
    }
}

/// Folds power samples into per-window mean power and integrated energy.
#[derive(Debug)]
pub struct PowerAggregator {
    keyer: WindowKeyer,
    buckets: BTreeMap<WindowKey, PowerBucket>,
    skipped: usize,
}

impl PowerAggregator {
    pub fn new(keyer: WindowKeyer) -> Self {
        Self {
            keyer,
            buckets: BTreeMap::new(),
            skipped: 0,
        }
    }

    /// Resolve and fold one raw record. Returns `false` if it was skipped.
    pub fn add_sample(&mut self, raw: &Value) -> bool {
        match PowerSample::from_value(raw) {
            Some(sample) => {
                self.add_power(sample);
                true
            }
            None => {
                self.skipped += 1;
                log::debug!("power sample without site/timestamp skipped");
                false
            }
        }
    }

    /// Fold one already-resolved sample.
    pub fn add_power(&mut self, sample: PowerSample) {
        let key = self.keyer.key_micros(sample.ts_us, &sample.site_id);
        let (start, end) = self.keyer.bounds(&key);
        let bucket = self.buckets.entry(key).or_insert_with(|| PowerBucket {
            ts_start: start,
            ts_end: end,
            ..PowerBucket::default()
        });

        if let Some(c) = sample.cluster_id {
            bucket.clusters.insert(c);
        }
        if let Some(w) = sample.power_watts {
            bucket.readings.push((sample.ts_us, w));
        }
        if let Some(v) = sample.pue {
            bucket.pue.push(v);
        }
        if let Some(v) = sample.thermal_headroom_w {
            bucket.thermal.push(v);
        }
        if let Some(v) = sample.grid_stress_index {
            bucket.grid.push(v);
        }
        if let Some(v) = sample.price_usd_per_mwh {
            bucket.price.push(v);
        }
        bucket.samples += 1;
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Finalize every window, in key order.
    pub fn emit(self) -> impl Iterator<Item = PowerWindow> {
        let window_secs = self.keyer.window_secs();
        self.buckets
            .into_iter()
            .map(move |(key, b)| finalize_power(key, b, window_secs))
    }
}

fn finalize_power(key: WindowKey, mut b: PowerBucket, window_secs: u64) -> PowerWindow {
    let watts: Vec<f64> = b.readings.iter().map(|(_, w)| *w).collect();
    let power_w = mean(&watts);
    let energy_j = integrate_energy(&mut b.readings, window_secs as f64);
    PowerWindow {
        site_id: key.site_id,
        cluster_id: b.clusters.into_iter().next(),
        ts_start: b.ts_start,
        ts_end: b.ts_end,
        window_duration_s: window_secs,
        power_w,
        energy_j,
        pue: mean(&b.pue),
        thermal_headroom_w: mean(&b.thermal),
        grid_stress_index: mean(&b.grid),
        price_usd_per_mwh: mean(&b.price),
        sample_count: b.samples,
    }
}
