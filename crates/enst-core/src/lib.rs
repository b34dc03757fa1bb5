//! # enst-core
//!
//! **Energy-normalized throughput for compute sites.**
//!
//! `enst-core` turns raw utilization and power telemetry into per-window
//! records, estimates the useful work done in each window, and reports
//! ENST (work units per joule) per site. A policy engine replays the same
//! records under energy, thermal and grid-stress caps and reports what the
//! caps would have cost.
//!
//! ## Quick Start
//!
//! ```
//! use enst_core::{EnstLeaderboard, Pipeline, PipelineConfig};
//! use serde_json::json;
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
//! pipeline.add_usage_sample(&json!({"timestamp": 0, "site_id": "a", "cpu_util": 0.4}));
//! pipeline.add_power_sample(&json!({"timestamp": 0, "site_id": "a", "power_w": 250.0}));
//!
//! let mut board = EnstLeaderboard::new(enst_core::DEFAULT_PRICE_USD_PER_MWH);
//! for record in pipeline.run() {
//!     board.add_record(&record);
//! }
//! println!("{}", board.to_csv());
//! ```
//!
//! ## Architecture
//!
//! Samples → Aggregators (per window) → TSV join → Work units + ENST → Leaderboard / Policy replay
//!
//! - **Aggregation**: [`UsageAggregator`] and [`PowerAggregator`] bucket
//!   samples by `(site_id, window_start)`. Power is integrated to joules
//!   with the trapezoidal rule.
//! - **TSV**: [`TsvNormalizer`] full-outer-joins both sides into
//!   [`TsvRecord`]s. Missing data stays `None`, never zero.
//! - **ENST**: [`compute_enst_stream`] lazily annotates each record with
//!   work units ([`WorkUnitsMode::Infra`] or [`WorkUnitsMode::Domain`]) and
//!   ENST.
//! - **Policy**: [`evaluate_policy`] and [`apply_throttle`] simulate caps;
//!   [`compute_policy_impact`] compares the two regimes.

pub mod cost;
pub mod enst;
pub mod error;
pub mod impact;
pub mod leaderboard;
pub mod pipeline;
pub mod policy;
pub mod power;
pub mod sample;
pub mod tsv;
pub mod usage;
pub mod window;
pub mod work_units;

pub use cost::{
    Amount, DEFAULT_PRICE_USD_PER_MWH, J_PER_MWH, PriceAccumulator, REFERENCE_WORK_UNITS,
    ResolvedPrice, cost_for_work, cost_usd, delta_cost_per_reference_work, energy_for_work,
    resolve_price, weighted_average_price,
};
pub use enst::{EnstOptions, EnstStream, EnstStreamExt, annotate, compute_enst, compute_enst_stream};
pub use error::{EnstError, Result};
pub use impact::{
    ImpactDelta, ImpactSummary, RegimeTotals, ReplaySummary, ViolationCounts,
    compute_policy_impact, replay_records,
};
pub use leaderboard::{CSV_HEADER, EnstLeaderboard, LeaderboardRow, to_csv};
pub use pipeline::{DEFAULT_WINDOW_SECS, IngestStats, Pipeline, PipelineConfig};
pub use policy::{
    DEFAULT_THROTTLE_FACTOR, Policy, PolicyEvaluation, Violation, apply_throttle, energy_scale,
    evaluate_policy,
};
pub use power::{PowerAggregator, PowerWindow, integrate_energy};
pub use sample::{PowerSample, UsageSample};
pub use tsv::{DEFAULT_CLUSTER_ID, DEFAULT_DATA_SOURCE, TsvNormalizer, TsvRecord};
pub use usage::{UsageAggregator, UsageWindow};
pub use window::{TimestampUnit, WindowKey, WindowKeyer, to_micros};
pub use work_units::{
    ASSUMED_CORE_UNITS, ASSUMED_GPU_UNITS, DEFAULT_GPU_WEIGHT, WorkUnits, WorkUnitsKind,
    WorkUnitsMode, compute_work_units, compute_work_units_domain, compute_work_units_infra,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
