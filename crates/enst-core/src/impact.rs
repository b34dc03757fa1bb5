//! Baseline vs. policy impact reporting.
//!
//! [`compute_policy_impact`] summarizes two finished record collections.
//! [`ReplaySummary`] produces the same report incrementally while replaying a
//! baseline stream through a policy, without keeping the records.

use serde::{Deserialize, Serialize};

use crate::cost::{
    PriceAccumulator, REFERENCE_WORK_UNITS, cost_usd, delta_cost_per_reference_work,
};
use crate::policy::{Policy, Violation, apply_throttle, evaluate_policy};
use crate::tsv::TsvRecord;

/// Aggregate totals for one regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeTotals {
    pub windows: usize,
    pub energy_j: f64,
    pub work_units: f64,
    /// `work_units / energy_j`; absent when no energy was recorded.
    pub enst: Option<f64>,
    pub avg_price_usd_per_mwh: f64,
    pub cost_usd: f64,
}

/// Policy minus baseline, absolute and relative.
///
/// Percentages are absent when the baseline value is zero or absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactDelta {
    pub enst: Option<f64>,
    pub enst_pct: Option<f64>,
    pub energy_j: f64,
    pub energy_j_pct: Option<f64>,
    pub work_units: f64,
    pub work_units_pct: Option<f64>,
    pub cost_usd: f64,
    pub cost_usd_pct: Option<f64>,
}

/// Tally of violations by cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationCounts {
    pub energy_cap: usize,
    pub thermal_cap: usize,
    pub grid_stress: usize,
}

impl ViolationCounts {
    pub fn record(&mut self, violation: Violation) {
        match violation {
            Violation::EnergyCap => self.energy_cap += 1,
            Violation::ThermalCap => self.thermal_cap += 1,
            Violation::GridStress => self.grid_stress += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.energy_cap + self.thermal_cap + self.grid_stress
    }
}

/// Paired baseline/policy report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactSummary {
    pub baseline: RegimeTotals,
    pub policy: RegimeTotals,
    pub delta: ImpactDelta,
    /// Cost difference for 1e9 work units at the baseline's average price.
    pub delta_cost_usd_per_1e9_work_units: Option<f64>,
    pub violations: ViolationCounts,
    pub throttled_windows: usize,
    pub migrate_flagged_windows: usize,
}

#[derive(Debug, Clone, Default)]
struct RegimeAccumulator {
    windows: usize,
    work_units: f64,
    price: PriceAccumulator,
}

impl RegimeAccumulator {
    fn add(&mut self, record: &TsvRecord, default_price: f64) {
        self.windows += 1;
        self.price.add(record, default_price);
        if let Some(work) = record.work_units {
            self.work_units += work;
        }
    }

    fn totals(&self, default_price: f64) -> RegimeTotals {
        let energy_j = self.price.energy_j();
        let avg_price = self.price.average(default_price);
        RegimeTotals {
            windows: self.windows,
            energy_j,
            work_units: self.work_units,
            enst: (energy_j > 0.0).then(|| self.work_units / energy_j),
            avg_price_usd_per_mwh: avg_price,
            cost_usd: cost_usd(Some(energy_j), avg_price),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FlagCounts {
    violations: ViolationCounts,
    throttled: usize,
    migrate: usize,
}

impl FlagCounts {
    fn add(&mut self, policy_record: &TsvRecord) {
        if policy_record.throttle_applied == Some(true) {
            self.throttled += 1;
        }
        if policy_record.migrate_flag == Some(true) {
            self.migrate += 1;
        }
        for v in policy_record.policy_violations.iter().flatten() {
            self.violations.record(*v);
        }
    }
}

fn pct(delta: f64, base: f64) -> Option<f64> {
    (base != 0.0 && base.is_finite()).then(|| delta / base * 100.0)
}

fn build_summary(baseline: RegimeTotals, policy: RegimeTotals, flags: FlagCounts) -> ImpactSummary {
    let enst_delta = match (baseline.enst, policy.enst) {
        (Some(b), Some(p)) => Some(p - b),
        _ => None,
    };
    let enst_pct = enst_delta.zip(baseline.enst).and_then(|(d, b)| pct(d, b));
    let energy_delta = policy.energy_j - baseline.energy_j;
    let work_delta = policy.work_units - baseline.work_units;
    let cost_delta = policy.cost_usd - baseline.cost_usd;

    let delta = ImpactDelta {
        enst: enst_delta,
        enst_pct,
        energy_j: energy_delta,
        energy_j_pct: pct(energy_delta, baseline.energy_j),
        work_units: work_delta,
        work_units_pct: pct(work_delta, baseline.work_units),
        cost_usd: cost_delta,
        cost_usd_pct: pct(cost_delta, baseline.cost_usd),
    };
    let delta_cost = delta_cost_per_reference_work(
        baseline.enst,
        policy.enst,
        baseline.avg_price_usd_per_mwh,
        REFERENCE_WORK_UNITS,
    );

    ImpactSummary {
        baseline,
        policy,
        delta,
        delta_cost_usd_per_1e9_work_units: delta_cost,
        violations: flags.violations,
        throttled_windows: flags.throttled,
        migrate_flagged_windows: flags.migrate,
    }
}

/// Summarize a baseline collection against its policy-applied counterpart.
///
/// Throttle/migrate counts and the violation tally are read from the
/// metadata that [`apply_throttle`] attaches to the policy records.
pub fn compute_policy_impact<'a, B, P>(baseline: B, policy: P, default_price: f64) -> ImpactSummary
where
    B: IntoIterator<Item = &'a TsvRecord>,
    P: IntoIterator<Item = &'a TsvRecord>,
{
    let mut base_acc = RegimeAccumulator::default();
    for r in baseline {
        base_acc.add(r, default_price);
    }
    let mut policy_acc = RegimeAccumulator::default();
    let mut flags = FlagCounts::default();
    for r in policy {
        policy_acc.add(r, default_price);
        flags.add(r);
    }
    build_summary(
        base_acc.totals(default_price),
        policy_acc.totals(default_price),
        flags,
    )
}

/// Lazily evaluate and throttle each record of a baseline stream.
pub fn replay_records<'p, I>(records: I, policy: &'p Policy) -> impl Iterator<Item = TsvRecord> + 'p
where
    I: IntoIterator<Item = TsvRecord>,
    I::IntoIter: 'p,
{
    records
        .into_iter()
        .map(move |r| apply_throttle(&r, &evaluate_policy(&r, policy)))
}

/// Streaming replay: folds baseline and policy regimes one record at a time.
#[derive(Debug)]
pub struct ReplaySummary {
    policy: Policy,
    default_price: f64,
    baseline: RegimeAccumulator,
    simulated: RegimeAccumulator,
    flags: FlagCounts,
}

impl ReplaySummary {
    pub fn new(policy: Policy, default_price: f64) -> Self {
        Self {
            policy,
            default_price,
            baseline: RegimeAccumulator::default(),
            simulated: RegimeAccumulator::default(),
            flags: FlagCounts::default(),
        }
    }

    /// Evaluate one baseline record, fold both regimes, return the policy record.
    pub fn push(&mut self, record: &TsvRecord) -> TsvRecord {
        let evaluation = evaluate_policy(record, &self.policy);
        let simulated = apply_throttle(record, &evaluation);
        self.baseline.add(record, self.default_price);
        self.simulated.add(&simulated, self.default_price);
        self.flags.add(&simulated);
        simulated
    }

    /// Windows folded so far.
    pub fn windows(&self) -> usize {
        self.baseline.windows
    }

    pub fn finish(self) -> ImpactSummary {
        build_summary(
            self.baseline.totals(self.default_price),
            self.simulated.totals(self.default_price),
            self.flags,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enst::compute_enst;

    fn rec(site: &str, power: f64, energy: f64, work: f64) -> TsvRecord {
        let mut r = TsvRecord::new(site, 0, 60_000_000);
        r.power_w = Some(power);
        r.energy_j = Some(energy);
        r.work_units = Some(work);
        r.enst = compute_enst(&r);
        r
    }

    fn baseline() -> Vec<TsvRecord> {
        let mut hot = rec("a", 800.0, 48_000.0, 4800.0);
        hot.grid_stress_index = Some(0.9);
        let mut cool = rec("b", 200.0, 12_000.0, 2400.0);
        cool.price_usd_per_mwh = Some(100.0);
        let mut stressed = rec("c", 300.0, 18_000.0, 1800.0);
        stressed.grid_stress_index = Some(0.95);
        vec![hot, cool, stressed]
    }

    fn policy() -> Policy {
        Policy {
            energy_cap_w: Some(500.0),
            grid_stress_cap: Some(0.8),
            throttle_factor: 0.5,
            ..Policy::default()
        }
    }

    #[test]
    fn impact_totals_and_counts() {
        let base = baseline();
        let p = policy();
        let sim: Vec<_> = replay_records(base.clone(), &p).collect();
        let s = compute_policy_impact(&base, &sim, 50.0);

        assert_eq!(s.baseline.windows, 3);
        assert_eq!(s.baseline.energy_j, 78_000.0);
        assert_eq!(s.baseline.work_units, 9000.0);
        // hot window throttled: work 2400, energy 48000*0.75 = 36000
        assert_eq!(s.policy.work_units, 6600.0);
        assert_eq!(s.policy.energy_j, 66_000.0);
        assert_eq!(s.throttled_windows, 1);
        assert_eq!(s.migrate_flagged_windows, 2);
        assert_eq!(
            s.violations,
            ViolationCounts {
                energy_cap: 1,
                thermal_cap: 0,
                grid_stress: 2
            }
        );
        assert_eq!(s.violations.total(), 3);
        assert!((s.delta.energy_j + 12_000.0).abs() < 1e-9);
        assert!((s.delta.work_units + 2400.0).abs() < 1e-9);
        let pct = s.delta.work_units_pct.unwrap();
        assert!((pct - (-2400.0 / 9000.0 * 100.0)).abs() < 1e-9);
        // throttling lowers ENST here (work drops faster than energy)
        assert!(s.delta.enst.unwrap() < 0.0);
        assert!(s.delta_cost_usd_per_1e9_work_units.unwrap() > 0.0);
    }

    #[test]
    fn weighted_price_uses_record_prices() {
        let base = baseline();
        let s = compute_policy_impact(&base, &base, 50.0);
        let expected = (48_000.0 * 50.0 + 12_000.0 * 100.0 + 18_000.0 * 50.0) / 78_000.0;
        assert!((s.baseline.avg_price_usd_per_mwh - expected).abs() < 1e-9);
        assert!((s.baseline.cost_usd - 78_000.0 / 3.6e9 * expected).abs() < 1e-12);
        assert_eq!(s.delta.cost_usd, 0.0);
        assert_eq!(s.delta_cost_usd_per_1e9_work_units, Some(0.0));
        assert_eq!(s.throttled_windows, 0);
    }

    #[test]
    fn streaming_matches_batch() {
        let base = baseline();
        let p = policy();
        let mut replay = ReplaySummary::new(p.clone(), 50.0);
        let sim: Vec<_> = base.iter().map(|r| replay.push(r)).collect();
        assert_eq!(replay.windows(), 3);
        let streamed = replay.finish();
        let batch = compute_policy_impact(&base, &sim, 50.0);
        assert_eq!(streamed, batch);
    }

    #[test]
    fn empty_inputs_have_no_enst() {
        let none: Vec<TsvRecord> = Vec::new();
        let s = compute_policy_impact(&none, &none, 42.0);
        assert_eq!(s.baseline.enst, None);
        assert_eq!(s.baseline.avg_price_usd_per_mwh, 42.0);
        assert_eq!(s.baseline.cost_usd, 0.0);
        assert_eq!(s.delta.enst, None);
        assert_eq!(s.delta.energy_j_pct, None);
        assert_eq!(s.delta_cost_usd_per_1e9_work_units, None);
    }

    #[test]
    fn summary_json_shape() {
        let base = baseline();
        let sim: Vec<_> = replay_records(base.clone(), &policy()).collect();
        let s = compute_policy_impact(&base, &sim, 50.0);
        let v = serde_json::to_value(&s).unwrap();
        for key in [
            "baseline",
            "policy",
            "delta",
            "delta_cost_usd_per_1e9_work_units",
            "violations",
            "throttled_windows",
            "migrate_flagged_windows",
        ] {
            assert!(v.get(key).is_some(), "missing {key}");
        }
        assert_eq!(v["violations"]["grid_stress"], 2);
    }
}
