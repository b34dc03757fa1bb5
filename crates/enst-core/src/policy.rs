//! What-if power, thermal and grid policies evaluated per window.
//!
//! Evaluation is stateless: each record is checked against the configured caps
//! on its own. Throttling scales work linearly but energy only partially,
//! since idle draw does not disappear when jobs slow down.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::enst::compute_enst;
use crate::error::{EnstError, Result};
use crate::tsv::TsvRecord;

/// Throttle factor applied when a policy does not specify one.
pub const DEFAULT_THROTTLE_FACTOR: f64 = 0.5;
/// Share of energy that remains even at a throttle factor of zero.
pub const IDLE_ENERGY_SHARE: f64 = 0.5;

fn default_throttle_factor() -> f64 {
    DEFAULT_THROTTLE_FACTOR
}

/// Caps to evaluate; an absent cap is never checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_cap_w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thermal_cap_w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_stress_cap: Option<f64>,
    #[serde(default = "default_throttle_factor")]
    pub throttle_factor: f64,
    /// Override of `throttle_factor` for `energy_cap` violations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_cap_throttle_factor: Option<f64>,
    /// Override of `throttle_factor` for `thermal_cap` violations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thermal_cap_throttle_factor: Option<f64>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            energy_cap_w: None,
            thermal_cap_w: None,
            grid_stress_cap: None,
            throttle_factor: DEFAULT_THROTTLE_FACTOR,
            energy_cap_throttle_factor: None,
            thermal_cap_throttle_factor: None,
        }
    }
}

impl Policy {
    /// Parse and validate a policy JSON object.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let policy: Self = serde_json::from_str(raw)
            .map_err(|e| EnstError::InvalidPolicy(format!("failed to parse policy JSON: {e}")))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Read, parse and validate a policy file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject factors outside `(0, 1]` and negative or non-finite caps.
    pub fn validate(&self) -> Result<()> {
        let factors = [
            ("throttle_factor", Some(self.throttle_factor)),
            ("energy_cap_throttle_factor", self.energy_cap_throttle_factor),
            ("thermal_cap_throttle_factor", self.thermal_cap_throttle_factor),
        ];
        for (name, value) in factors {
            if let Some(f) = value.filter(|f| !(f.is_finite() && *f > 0.0 && *f <= 1.0)) {
                return Err(EnstError::InvalidPolicy(format!(
                    "{name} must be in (0, 1], got {f}"
                )));
            }
        }
        let caps = [
            ("energy_cap_w", self.energy_cap_w),
            ("thermal_cap_w", self.thermal_cap_w),
            ("grid_stress_cap", self.grid_stress_cap),
        ];
        for (name, value) in caps {
            if let Some(c) = value.filter(|c| !(c.is_finite() && *c >= 0.0)) {
                return Err(EnstError::InvalidPolicy(format!(
                    "{name} must be a finite value >= 0, got {c}"
                )));
            }
        }
        Ok(())
    }

    /// True when no cap is configured.
    pub fn is_empty(&self) -> bool {
        self.energy_cap_w.is_none() && self.thermal_cap_w.is_none() && self.grid_stress_cap.is_none()
    }
}

/// A cap that a record exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    EnergyCap,
    ThermalCap,
    GridStress,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EnergyCap => "energy_cap",
            Self::ThermalCap => "thermal_cap",
            Self::GridStress => "grid_stress",
        })
    }
}

/// Outcome of evaluating one record against a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub throttle_applied: bool,
    /// Most restrictive triggered factor, `1.0` when nothing throttles.
    pub throttle_factor: f64,
    pub migrate_flag: bool,
    pub violations: Vec<Violation>,
}

impl PolicyEvaluation {
    /// No violations, no throttle, no migration.
    pub fn clear() -> Self {
        Self {
            throttle_applied: false,
            throttle_factor: 1.0,
            migrate_flag: false,
            violations: Vec::new(),
        }
    }
}

/// Check one record against every configured cap.
///
/// Missing record values never trigger a cap. Grid stress sets the migrate
/// flag only; it never throttles.
pub fn evaluate_policy(record: &TsvRecord, policy: &Policy) -> PolicyEvaluation {
    let mut eval = PolicyEvaluation::clear();

    let over_energy = policy
        .energy_cap_w
        .zip(record.power_w)
        .is_some_and(|(cap, power)| power > cap);
    if over_energy {
        let factor = policy
            .energy_cap_throttle_factor
            .unwrap_or(policy.throttle_factor);
        eval.throttle_applied = true;
        eval.throttle_factor = eval.throttle_factor.min(factor);
        eval.violations.push(Violation::EnergyCap);
    }

    let under_headroom = policy
        .thermal_cap_w
        .zip(record.thermal_headroom_w)
        .is_some_and(|(cap, headroom)| headroom < cap);
    if under_headroom {
        let factor = policy
            .thermal_cap_throttle_factor
            .unwrap_or(policy.throttle_factor);
        eval.throttle_applied = true;
        eval.throttle_factor = eval.throttle_factor.min(factor);
        eval.violations.push(Violation::ThermalCap);
    }

    let grid_stressed = policy
        .grid_stress_cap
        .zip(record.grid_stress_index)
        .is_some_and(|(cap, stress)| stress > cap);
    if grid_stressed {
        eval.migrate_flag = true;
        eval.violations.push(Violation::GridStress);
    }

    eval
}

fn scale(value: &mut Option<f64>, factor: f64) {
    if let Some(v) = value.as_mut() {
        *v *= factor;
    }
}

/// Energy multiplier for a throttle factor: `0.5 + 0.5 × factor`.
pub fn energy_scale(factor: f64) -> f64 {
    IDLE_ENERGY_SHARE + factor * (1.0 - IDLE_ENERGY_SHARE)
}

/// Apply an evaluation to a record, returning the simulated record.
///
/// Throttled records get work and resource-seconds scaled by the factor,
/// energy by [`energy_scale`], ENST recomputed and throttle metadata attached.
/// Migrate-only records are copied with the flag attached. Records with no
/// violation are returned as plain copies.
pub fn apply_throttle(record: &TsvRecord, evaluation: &PolicyEvaluation) -> TsvRecord {
    let mut out = record.clone();
    if evaluation.throttle_applied {
        let f = evaluation.throttle_factor;
        scale(&mut out.work_units, f);
        scale(&mut out.validated_work_units, f);
        scale(&mut out.cpu_core_seconds, f);
        scale(&mut out.gpu_seconds, f);
        scale(&mut out.energy_j, energy_scale(f));
        out.enst = compute_enst(&out);
        out.throttle_applied = Some(true);
        out.throttle_factor = Some(f);
    }
    if evaluation.throttle_applied || evaluation.migrate_flag {
        out.migrate_flag = Some(evaluation.migrate_flag);
        out.policy_violations = Some(evaluation.violations.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TsvRecord {
        let mut r = TsvRecord::new("s", 0, 60_000_000);
        r.power_w = Some(500.0);
        r.energy_j = Some(30_000.0);
        r.thermal_headroom_w = Some(200.0);
        r.grid_stress_index = Some(0.4);
        r.work_units = Some(6000.0);
        r.cpu_core_seconds = Some(6000.0);
        r.enst = compute_enst(&r);
        r
    }

    #[test]
    fn energy_cap_throttles() {
        let p = Policy {
            energy_cap_w: Some(400.0),
            ..Policy::default()
        };
        let e = evaluate_policy(&record(), &p);
        assert!(e.throttle_applied);
        assert_eq!(e.throttle_factor, 0.5);
        assert_eq!(e.violations, vec![Violation::EnergyCap]);
        assert!(!e.migrate_flag);
    }

    #[test]
    fn within_caps_is_clear() {
        let p = Policy {
            energy_cap_w: Some(600.0),
            thermal_cap_w: Some(100.0),
            grid_stress_cap: Some(0.5),
            ..Policy::default()
        };
        let e = evaluate_policy(&record(), &p);
        assert_eq!(e, PolicyEvaluation::clear());
    }

    #[test]
    fn equality_is_not_a_violation() {
        let p = Policy {
            energy_cap_w: Some(500.0),
            thermal_cap_w: Some(200.0),
            grid_stress_cap: Some(0.4),
            ..Policy::default()
        };
        assert!(evaluate_policy(&record(), &p).violations.is_empty());
    }

    #[test]
    fn grid_stress_migrates_without_throttle() {
        let p = Policy {
            grid_stress_cap: Some(0.1),
            ..Policy::default()
        };
        let e = evaluate_policy(&record(), &p);
        assert!(e.migrate_flag);
        assert!(!e.throttle_applied);
        assert_eq!(e.throttle_factor, 1.0);
        assert_eq!(e.violations, vec![Violation::GridStress]);
    }

    #[test]
    fn compound_violations_take_min_factor() {
        let p = Policy {
            energy_cap_w: Some(100.0),
            thermal_cap_w: Some(300.0),
            grid_stress_cap: Some(0.1),
            throttle_factor: 0.8,
            thermal_cap_throttle_factor: Some(0.3),
            ..Policy::default()
        };
        let e = evaluate_policy(&record(), &p);
        assert!(e.throttle_applied && e.migrate_flag);
        assert_eq!(e.throttle_factor, 0.3);
        assert_eq!(
            e.violations,
            vec![Violation::EnergyCap, Violation::ThermalCap, Violation::GridStress]
        );
    }

    #[test]
    fn missing_values_never_trigger() {
        let r = TsvRecord::new("s", 0, 60_000_000);
        let p = Policy {
            energy_cap_w: Some(0.0),
            thermal_cap_w: Some(1e9),
            grid_stress_cap: Some(0.0),
            ..Policy::default()
        };
        assert_eq!(evaluate_policy(&r, &p), PolicyEvaluation::clear());
    }

    #[test]
    fn throttle_scales_work_and_energy() {
        let r = record();
        for f in [0.1, 0.25, 0.5, 0.9, 1.0] {
            let eval = PolicyEvaluation {
                throttle_applied: true,
                throttle_factor: f,
                migrate_flag: false,
                violations: vec![Violation::EnergyCap],
            };
            let t = apply_throttle(&r, &eval);
            assert!((t.work_units.unwrap() - 6000.0 * f).abs() < 1e-9);
            assert!((t.cpu_core_seconds.unwrap() - 6000.0 * f).abs() < 1e-9);
            let energy = t.energy_j.unwrap();
            assert!((energy - 30_000.0 * (0.5 + 0.5 * f)).abs() < 1e-9);
            assert!(energy >= 15_000.0);
            assert_eq!(t.enst, compute_enst(&t));
            assert_eq!(t.throttle_applied, Some(true));
            assert_eq!(t.throttle_factor, Some(f));
        }
    }

    #[test]
    fn untouched_record_is_plain_copy() {
        let r = record();
        let t = apply_throttle(&r, &PolicyEvaluation::clear());
        assert_eq!(t, r);
        assert_eq!(t.throttle_applied, None);
    }

    #[test]
    fn migrate_only_keeps_quantities() {
        let r = record();
        let eval = PolicyEvaluation {
            throttle_applied: false,
            throttle_factor: 1.0,
            migrate_flag: true,
            violations: vec![Violation::GridStress],
        };
        let t = apply_throttle(&r, &eval);
        assert_eq!(t.energy_j, r.energy_j);
        assert_eq!(t.work_units, r.work_units);
        assert_eq!(t.migrate_flag, Some(true));
        assert_eq!(t.throttle_applied, None);
        assert_eq!(t.policy_violations, Some(vec![Violation::GridStress]));
    }

    #[test]
    fn policy_json_defaults_and_validation() {
        let p = Policy::from_json_str(r#"{"energy_cap_w": 250}"#).unwrap();
        assert_eq!(p.throttle_factor, DEFAULT_THROTTLE_FACTOR);
        assert_eq!(p.energy_cap_w, Some(250.0));
        assert!(p.thermal_cap_w.is_none());
        assert!(Policy::from_json_str("{}").unwrap().is_empty());

        for bad in [
            r#"{"throttle_factor": 0}"#,
            r#"{"throttle_factor": 1.5}"#,
            r#"{"energy_cap_w": -1}"#,
            r#"{"thermal_cap_throttle_factor": -0.2}"#,
            r#"{"energy_cap_w": "high"}"#,
            "not json",
        ] {
            assert!(
                matches!(Policy::from_json_str(bad), Err(EnstError::InvalidPolicy(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn policy_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, r#"{"grid_stress_cap": 0.7, "throttle_factor": 0.6}"#).unwrap();
        let p = Policy::load(&path).unwrap();
        assert_eq!(p.grid_stress_cap, Some(0.7));
        assert_eq!(p.throttle_factor, 0.6);
        assert!(matches!(
            Policy::load(&dir.path().join("missing.json")),
            Err(EnstError::Io(_))
        ));
    }
}
