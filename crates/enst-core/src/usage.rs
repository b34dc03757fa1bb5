//! Compute-utilization aggregation into per-site windows.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sample::UsageSample;
use crate::window::{WindowKey, WindowKeyer};

/// Finalized usage aggregate for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageWindow {
    pub site_id: String,
    pub cluster_id: Option<String>,
    pub ts_start: i64,
    pub ts_end: i64,
    pub window_duration_s: u64,
    /// Mean CPU utilization; `0.0` when the window has no CPU readings.
    pub cpu_util: f64,
    pub gpu_util: Option<f64>,
    pub mem_util: Option<f64>,
    /// Number of samples in the window that carried an event marker.
    pub job_queue_depth: u64,
    pub resource_seconds: f64,
    pub cpu_core_seconds: Option<f64>,
    pub gpu_seconds: Option<f64>,
    pub validated_steps: Option<u64>,
    pub timesteps: Option<u64>,
    pub sample_count: usize,
}

#[derive(Debug, Default)]
struct UsageBucket {
    ts_start: i64,
    ts_end: i64,
    clusters: BTreeSet<String>,
    cpu: Vec<f64>,
    gpu: Vec<f64>,
    mem: Vec<f64>,
    events: u64,
    cpu_core_seconds: Option<f64>,
    gpu_seconds: Option<f64>,
    validated_steps: Option<f64>,
    timesteps: Option<f64>,
    samples: usize,
}

fn add_opt(acc: &mut Option<f64>, value: Option<f64>) {
    if let Some(v) = value {
        *acc = Some(acc.unwrap_or(0.0) + v);
    }
}

/// Arithmetic mean, `None` for an empty slice.
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub(crate) fn clamp_unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn to_count(v: f64) -> u64 {
    if v <= 0.0 { 0 } else { v.round() as u64 }
}

/// Folds usage samples into per-window means and counters.
///
/// Buckets are created on first touch and emitted in key order, so the
/// output does not depend on sample arrival order.
#[derive(Debug)]
pub struct UsageAggregator {
    keyer: WindowKeyer,
    buckets: BTreeMap<WindowKey, UsageBucket>,
    skipped: usize,
}

impl UsageAggregator {
    pub fn new(keyer: WindowKeyer) -> Self {
        Self {
            keyer,
            buckets: BTreeMap::new(),
            skipped: 0,
        }
    }

    /// Resolve and fold one raw record. Returns `false` if it was skipped.
    pub fn add_sample(&mut self, raw: &Value) -> bool {
        match UsageSample::from_value(raw) {
            Some(sample) => {
                self.add_usage(sample);
                true
            }
            None => {
                self.skipped += 1;
                log::debug!("usage sample without site/timestamp skipped");
                false
            }
        }
    }

    /// Fold one already-resolved sample.
    pub fn add_usage(&mut self, sample: UsageSample) {
        let key = self.keyer.key_micros(sample.ts_us, &sample.site_id);
        let (start, end) = self.keyer.bounds(&key);
        let bucket = self.buckets.entry(key).or_insert_with(|| UsageBucket {
            ts_start: start,
            ts_end: end,
            ..UsageBucket::default()
        });

        if let Some(c) = sample.cluster_id {
            bucket.clusters.insert(c);
        }
        if let Some(v) = sample.cpu_fraction {
            bucket.cpu.push(v);
        }
        if let Some(v) = sample.gpu_fraction {
            bucket.gpu.push(v);
        }
        if let Some(v) = sample.mem_fraction {
            bucket.mem.push(v);
        }
        if sample.event_marker {
            bucket.events += 1;
        }
        add_opt(&mut bucket.cpu_core_seconds, sample.cpu_core_seconds);
        add_opt(&mut bucket.gpu_seconds, sample.gpu_seconds);
        add_opt(&mut bucket.validated_steps, sample.validated_steps);
        add_opt(&mut bucket.timesteps, sample.timesteps);
        bucket.samples += 1;
    }

    /// Number of open windows.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Raw records rejected by [`add_sample`](Self::add_sample).
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Finalize every window, in key order.
    pub fn emit(self) -> impl Iterator<Item = UsageWindow> {
        let window_secs = self.keyer.window_secs();
        self.buckets
            .into_iter()
            .map(move |(key, b)| finalize_usage(key, b, window_secs))
    }
}

fn finalize_usage(key: WindowKey, b: UsageBucket, window_secs: u64) -> UsageWindow {
    let cpu_util = clamp_unit(mean(&b.cpu).unwrap_or(0.0));
    let resource_seconds = match (b.cpu_core_seconds, b.gpu_seconds) {
        (None, None) => cpu_util * window_secs as f64,
        (c, g) => c.unwrap_or(0.0) + g.unwrap_or(0.0),
    };
    UsageWindow {
        site_id: key.site_id,
        cluster_id: b.clusters.into_iter().next(),
        ts_start: b.ts_start,
        ts_end: b.ts_end,
        window_duration_s: window_secs,
        cpu_util,
        gpu_util: mean(&b.gpu).map(clamp_unit),
        mem_util: mean(&b.mem).map(clamp_unit),
        job_queue_depth: b.events,
        resource_seconds,
        cpu_core_seconds: b.cpu_core_seconds,
        gpu_seconds: b.gpu_seconds,
        validated_steps: b.validated_steps.map(to_count),
        timesteps: b.timesteps.map(to_count),
        sample_count: b.samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use serde_json::json;

    fn agg() -> UsageAggregator {
        UsageAggregator::new(WindowKeyer::new(60).unwrap())
    }

    #[test]
    fn means_and_counts() {
        let mut a = agg();
        a.add_sample(&json!({"ts": 0, "site": "s", "cpu": 0.2, "gpu": 0.4, "event": "submit"}));
        a.add_sample(&json!({"ts": 30, "site": "s", "cpu": 0.6}));
        let rows: Vec<_> = a.emit().collect();
        assert_eq!(rows.len(), 1);
        let w = &rows[0];
        assert!((w.cpu_util - 0.4).abs() < 1e-12);
        assert_eq!(w.gpu_util, Some(0.4));
        assert_eq!(w.mem_util, None);
        assert_eq!(w.job_queue_depth, 1);
        assert_eq!(w.sample_count, 2);
        assert_eq!(w.ts_start, 0);
        assert_eq!(w.ts_end, 60_000_000);
        assert!((w.resource_seconds - 24.0).abs() < 1e-9);
    }

    #[test]
    fn utilization_clamped_on_emit() {
        let mut a = agg();
        a.add_sample(&json!({"ts": 0, "site": "s", "cpu": 1.8, "gpu": -0.5, "mem": 3}));
        let w = a.emit().next().unwrap();
        assert_eq!(w.cpu_util, 1.0);
        assert_eq!(w.gpu_util, Some(0.0));
        assert_eq!(w.mem_util, Some(1.0));
    }

    #[test]
    fn empty_cpu_reports_zero() {
        let mut a = agg();
        a.add_sample(&json!({"ts": 0, "site": "s", "gpu": 0.5}));
        let w = a.emit().next().unwrap();
        assert_eq!(w.cpu_util, 0.0);
        assert_eq!(w.resource_seconds, 0.0);
    }

    #[test]
    fn explicit_seconds_and_counters_summed() {
        let mut a = agg();
        a.add_sample(&json!({"ts": 1, "site": "s", "cpu_core_seconds": 10, "validated_steps": 3}));
        a.add_sample(&json!({"ts": 2, "site": "s", "gpu_seconds": 4, "validated_steps": 2}));
        let w = a.emit().next().unwrap();
        assert_eq!(w.cpu_core_seconds, Some(10.0));
        assert_eq!(w.gpu_seconds, Some(4.0));
        assert_eq!(w.resource_seconds, 14.0);
        assert_eq!(w.validated_steps, Some(5));
        assert_eq!(w.timesteps, None);
    }

    #[test]
    fn unusable_records_are_counted_not_fatal() {
        let mut a = agg();
        assert!(!a.add_sample(&json!({"cpu": 0.3})));
        assert!(a.add_sample(&json!({"ts": 5, "site": "s", "cpu": "bogus"})));
        assert_eq!(a.skipped(), 1);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn cluster_choice_is_order_free() {
        let mut a = agg();
        a.add_sample(&json!({"ts": 1, "site": "s", "cluster": "zeta"}));
        a.add_sample(&json!({"ts": 2, "site": "s", "cluster": "alpha"}));
        assert_eq!(a.emit().next().unwrap().cluster_id.as_deref(), Some("alpha"));
    }

    #[test]
    fn out_of_range_timestamp_skipped() {
        let mut a = agg();
        assert!(!a.add_sample(&json!({"ts": 9.3e18, "site": "s", "cpu": 0.5})));
        assert!(!a.add_sample(&json!({"ts": -9.3e18, "site": "s", "cpu": 0.5})));
        assert_eq!(a.skipped(), 2);
        assert!(a.is_empty());
    }

    #[test]
    fn timestamp_at_range_edge_keeps_finite_bounds() {
        let mut a = agg();
        assert!(a.add_sample(&json!({"ts": 9.2e18, "site": "s", "cpu": 0.5})));
        let w = a.emit().next().unwrap();
        assert!(w.ts_end > w.ts_start);
        assert_eq!(w.window_duration_s, 60);
    }

    fn close(a: Option<f64>, b: Option<f64>) -> bool {
        match (a, b) {
            (Some(x), Some(y)) => (x - y).abs() < 1e-9,
            (None, None) => true,
            _ => false,
        }
    }

    #[test]
    fn permutation_invariant() {
        let mut samples = Vec::new();
        for i in 0..200u32 {
            let mut s = json!({
                "ts": i * 7,
                "site": if i % 3 == 0 { "a" } else { "b" },
                "cluster": if i % 7 == 0 { "c1" } else { "c2" },
                "cpu": f64::from(i % 10) / 10.0,
                "gpu": f64::from(i % 4) / 4.0,
                "mem": f64::from(i % 6) / 6.0,
                "event": i % 5 == 0,
            });
            if i % 2 == 0 {
                s["cpu_core_seconds"] = json!(f64::from(i) * 0.3);
                s["validated_steps"] = json!(i);
            }
            samples.push(s);
        }
        let run = |items: &[Value]| {
            let mut a = agg();
            for s in items {
                a.add_sample(s);
            }
            a.emit().collect::<Vec<_>>()
        };
        let expected = run(&samples);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..5 {
            samples.shuffle(&mut rng);
            let got = run(&samples);
            assert_eq!(got.len(), expected.len());
            for (g, e) in got.iter().zip(&expected) {
                assert_eq!(g.site_id, e.site_id);
                assert_eq!(g.cluster_id, e.cluster_id);
                assert_eq!(g.ts_start, e.ts_start);
                assert_eq!(g.ts_end, e.ts_end);
                assert_eq!(g.window_duration_s, e.window_duration_s);
                assert_eq!(g.job_queue_depth, e.job_queue_depth);
                assert_eq!(g.sample_count, e.sample_count);
                assert_eq!(g.validated_steps, e.validated_steps);
                assert_eq!(g.timesteps, e.timesteps);
                assert!((g.cpu_util - e.cpu_util).abs() < 1e-9);
                assert!((g.resource_seconds - e.resource_seconds).abs() < 1e-9);
                assert!(close(g.gpu_util, e.gpu_util));
                assert!(close(g.mem_util, e.mem_util));
                assert!(close(g.cpu_core_seconds, e.cpu_core_seconds));
                assert!(close(g.gpu_seconds, e.gpu_seconds));
            }
        }
    }
}
