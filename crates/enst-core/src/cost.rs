//! Energy → currency conversion and the delta-cost model.

use serde::{Deserialize, Serialize};

use crate::tsv::TsvRecord;

/// Joules in one megawatt-hour.
pub const J_PER_MWH: f64 = 3.6e9;
/// Work quantity used for normalized cost comparisons.
pub const REFERENCE_WORK_UNITS: f64 = 1e9;
/// Price used when neither the record nor the caller supplies one.
pub const DEFAULT_PRICE_USD_PER_MWH: f64 = 50.0;

/// A quantity that may be unbounded (work at zero throughput).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amount {
    Finite(f64),
    Unbounded,
}

impl Amount {
    pub fn finite(self) -> Option<f64> {
        match self {
            Self::Finite(v) => Some(v),
            Self::Unbounded => None,
        }
    }

    pub fn is_unbounded(self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

/// `(energy_j / 3.6e9) × price`; `0` for missing or non-positive energy.
pub fn cost_usd(energy_j: Option<f64>, price_usd_per_mwh: f64) -> f64 {
    match energy_j {
        Some(e) if e > 0.0 => e / J_PER_MWH * price_usd_per_mwh,
        _ => 0.0,
    }
}

/// Joules needed to produce `work_units` at the given ENST.
pub fn energy_for_work(work_units: f64, enst: Option<f64>) -> Amount {
    match enst {
        Some(e) if e > 0.0 => Amount::Finite(work_units / e),
        _ => Amount::Unbounded,
    }
}

/// Cost of producing `work_units` at the given ENST; unbounded energy stays unbounded.
pub fn cost_for_work(work_units: f64, enst: Option<f64>, price_usd_per_mwh: f64) -> Amount {
    match energy_for_work(work_units, enst) {
        Amount::Finite(energy) => Amount::Finite(cost_usd(Some(energy), price_usd_per_mwh)),
        Amount::Unbounded => Amount::Unbounded,
    }
}

/// Policy cost minus baseline cost for `reference_work` units.
///
/// `None` when either regime cannot produce work at all; the pair is
/// incomparable rather than infinitely apart.
pub fn delta_cost_per_reference_work(
    enst_baseline: Option<f64>,
    enst_policy: Option<f64>,
    price_usd_per_mwh: f64,
    reference_work: f64,
) -> Option<f64> {
    let baseline = cost_for_work(reference_work, enst_baseline, price_usd_per_mwh).finite()?;
    let policy = cost_for_work(reference_work, enst_policy, price_usd_per_mwh).finite()?;
    Some(policy - baseline)
}

/// A price and whether it came from the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub price: f64,
    pub defaulted: bool,
}

/// Record price when usable, else `default_price` flagged as defaulted.
pub fn resolve_price(record: &TsvRecord, default_price: f64) -> ResolvedPrice {
    match record.price_usd_per_mwh {
        Some(p) if p.is_finite() && p >= 0.0 => ResolvedPrice {
            price: p,
            defaulted: false,
        },
        _ => ResolvedPrice {
            price: default_price,
            defaulted: true,
        },
    }
}

/// Running energy-weighted price.
///
/// Records without positive energy carry no weight but still count toward
/// [`defaulted`](Self::defaulted) when their price was missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceAccumulator {
    weighted: f64,
    energy_j: f64,
    defaulted: usize,
}

impl PriceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record, resolving its price against `default_price`.
    pub fn add(&mut self, record: &TsvRecord, default_price: f64) {
        let price = resolve_price(record, default_price);
        if price.defaulted {
            self.defaulted += 1;
        }
        if let Some(energy) = record.energy_j.filter(|e| *e > 0.0) {
            self.weighted += energy * price.price;
            self.energy_j += energy;
        }
    }

    /// Total positive energy folded so far.
    pub fn energy_j(&self) -> f64 {
        self.energy_j
    }

    /// Records whose price fell back to the default.
    pub fn defaulted(&self) -> usize {
        self.defaulted
    }

    /// Weighted mean, or `default_price` when no energy was seen.
    pub fn average(&self, default_price: f64) -> f64 {
        if self.energy_j > 0.0 {
            self.weighted / self.energy_j
        } else {
            default_price
        }
    }
}

/// Energy-weighted mean price over `records`.
///
/// Falls back to `default_price` when total energy is zero.
pub fn weighted_average_price<'a, I>(records: I, default_price: f64) -> f64
where
    I: IntoIterator<Item = &'a TsvRecord>,
{
    let mut acc = PriceAccumulator::new();
    for r in records {
        acc.add(r, default_price);
    }
    acc.average(default_price)
}
