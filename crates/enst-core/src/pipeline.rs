//! Pipeline configuration and the sample → TSV → ENST driver.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cost::DEFAULT_PRICE_USD_PER_MWH;
use crate::enst::{EnstOptions, compute_enst_stream};
use crate::error::{EnstError, Result};
use crate::power::PowerAggregator;
use crate::tsv::{DEFAULT_DATA_SOURCE, TsvNormalizer, TsvRecord};
use crate::usage::UsageAggregator;
use crate::window::WindowKeyer;
use crate::work_units::{DEFAULT_GPU_WEIGHT, WorkUnitsMode};

/// Default aggregation window.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Settings shared by every pipeline stage.
///
/// Every field has a default, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub window_secs: u64,
    pub mode: WorkUnitsMode,
    pub gpu_weight: f64,
    pub default_price_usd_per_mwh: f64,
    pub data_source: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            mode: WorkUnitsMode::Infra,
            gpu_weight: DEFAULT_GPU_WEIGHT,
            default_price_usd_per_mwh: DEFAULT_PRICE_USD_PER_MWH,
            data_source: DEFAULT_DATA_SOURCE.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| EnstError::InvalidConfig(format!("failed to parse config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_secs == 0 {
            return Err(EnstError::InvalidConfig(
                "window_secs must be positive".to_string(),
            ));
        }
        if !self.gpu_weight.is_finite() || self.gpu_weight < 0.0 {
            return Err(EnstError::InvalidConfig(format!(
                "gpu_weight must be a finite non-negative number, got {}",
                self.gpu_weight
            )));
        }
        if !self.default_price_usd_per_mwh.is_finite() || self.default_price_usd_per_mwh < 0.0 {
            return Err(EnstError::InvalidConfig(format!(
                "default_price_usd_per_mwh must be a finite non-negative number, got {}",
                self.default_price_usd_per_mwh
            )));
        }
        Ok(())
    }

    pub fn keyer(&self) -> Result<WindowKeyer> {
        WindowKeyer::new(self.window_secs)
    }

    pub fn enst_options(&self) -> EnstOptions {
        EnstOptions {
            mode: self.mode,
            gpu_weight: self.gpu_weight,
        }
    }
}

/// Counters reported after a pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub usage_samples: usize,
    pub usage_skipped: usize,
    pub power_samples: usize,
    pub power_skipped: usize,
}

/// Owns both aggregators for one run.
///
/// Samples can arrive in any order and interleaved across sites. Nothing is
/// emitted until [`Pipeline::normalize`] or [`Pipeline::run`] consumes it.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    usage: UsageAggregator,
    power: PowerAggregator,
    stats: IngestStats,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let keyer = config.keyer()?;
        Ok(Self {
            usage: UsageAggregator::new(keyer),
            power: PowerAggregator::new(keyer),
            config,
            stats: IngestStats::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Feed one raw usage sample. Returns `false` if it was dropped.
    pub fn add_usage_sample(&mut self, raw: &Value) -> bool {
        let kept = self.usage.add_sample(raw);
        if kept {
            self.stats.usage_samples += 1;
        } else {
            self.stats.usage_skipped += 1;
        }
        kept
    }

    /// Feed one raw power sample. Returns `false` if it was dropped.
    pub fn add_power_sample(&mut self, raw: &Value) -> bool {
        let kept = self.power.add_sample(raw);
        if kept {
            self.stats.power_samples += 1;
        } else {
            self.stats.power_skipped += 1;
        }
        kept
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Join usage and power windows into TSV records, without ENST.
    pub fn normalize(self) -> impl Iterator<Item = TsvRecord> {
        log::debug!(
            "normalizing {} usage and {} power windows",
            self.usage.len(),
            self.power.len()
        );
        let mut normalizer = TsvNormalizer::new(self.config.data_source);
        normalizer.extend_usage(self.usage.emit());
        normalizer.extend_power(self.power.emit());
        normalizer.emit()
    }

    /// Full run: normalized records annotated with work units and ENST.
    pub fn run(self) -> impl Iterator<Item = TsvRecord> {
        let options = self.config.enst_options();
        compute_enst_stream(self.normalize(), options)
    }
}
