//! Work-unit estimation under two interchangeable policies.
//!
//! The caller picks a [`WorkUnitsMode`]; every result carries the
//! [`WorkUnitsKind`] that was actually used, so a domain request that had to
//! fall back to infrastructure accounting is always visible.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EnstError;
use crate::tsv::TsvRecord;

/// Core-units assumed per site when a trace only reports CPU utilization.
///
/// Uncalibrated: raw traces carry no core count, so this is a fixed scale
/// rather than a physical quantity. Compare sites only under the same value.
pub const ASSUMED_CORE_UNITS: f64 = 100.0;
/// GPU-units assumed per site when a trace only reports GPU utilization.
///
/// Same caveat as [`ASSUMED_CORE_UNITS`].
pub const ASSUMED_GPU_UNITS: f64 = 8.0;
/// Weight of one GPU-second relative to one core-second.
pub const DEFAULT_GPU_WEIGHT: f64 = 1.0;

/// Requested estimation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkUnitsMode {
    #[default]
    Infra,
    Domain,
}

impl FromStr for WorkUnitsMode {
    type Err = EnstError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "infra" => Ok(Self::Infra),
            "domain" => Ok(Self::Domain),
            other => Err(EnstError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for WorkUnitsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Infra => "infra",
            Self::Domain => "domain",
        })
    }
}

/// Mode actually used to produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkUnitsKind {
    Infra,
    Domain,
    InfraFallback,
}

impl WorkUnitsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Infra => "infra",
            Self::Domain => "domain",
            Self::InfraFallback => "infra_fallback",
        }
    }
}

impl fmt::Display for WorkUnitsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A work-unit value and the mode that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkUnits {
    pub value: f64,
    pub mode: WorkUnitsKind,
}

/// `cpu_core_seconds + gpu_seconds × gpu_weight`.
///
/// Missing resource-seconds are derived from utilization × window duration ×
/// the assumed unit counts; missing utilization counts as idle.
pub fn compute_work_units_infra(record: &TsvRecord, gpu_weight: f64) -> WorkUnits {
    let duration = record.duration_secs();
    let cpu_core_seconds = record
        .cpu_core_seconds
        .unwrap_or_else(|| record.cpu_util.unwrap_or(0.0) * duration * ASSUMED_CORE_UNITS);
    let gpu_seconds = record
        .gpu_seconds
        .unwrap_or_else(|| record.gpu_util.unwrap_or(0.0) * duration * ASSUMED_GPU_UNITS);
    WorkUnits {
        value: cpu_core_seconds + gpu_seconds * gpu_weight,
        mode: WorkUnitsKind::Infra,
    }
}

/// Domain-native progress: `validated_steps`, else `timesteps`, else an
/// infra estimate tagged [`WorkUnitsKind::InfraFallback`].
pub fn compute_work_units_domain(record: &TsvRecord, gpu_weight: f64) -> WorkUnits {
    match record.validated_steps.or(record.timesteps) {
        Some(steps) => WorkUnits {
            value: steps as f64,
            mode: WorkUnitsKind::Domain,
        },
        None => WorkUnits {
            value: compute_work_units_infra(record, gpu_weight).value,
            mode: WorkUnitsKind::InfraFallback,
        },
    }
}

/// Dispatch on the requested mode.
pub fn compute_work_units(record: &TsvRecord, mode: WorkUnitsMode, gpu_weight: f64) -> WorkUnits {
    match mode {
        WorkUnitsMode::Infra => compute_work_units_infra(record, gpu_weight),
        WorkUnitsMode::Domain => compute_work_units_domain(record, gpu_weight),
    }
}
