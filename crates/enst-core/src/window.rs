//! Canonical time-bucket keys shared by every aggregator.
//!
//! Traces arrive with timestamps in seconds, milliseconds or microseconds,
//! often mixed within one site. [`TimestampUnit::classify`] resolves the unit
//! from magnitude alone, and everything downstream works in integer
//! microseconds.

use serde::{Deserialize, Serialize};

use crate::error::{EnstError, Result};

/// Raw timestamps below this value are read as seconds.
pub const SECONDS_UPPER_BOUND: f64 = 1e10;
/// Raw timestamps below this value (and at least [`SECONDS_UPPER_BOUND`]) are milliseconds.
pub const MILLIS_UPPER_BOUND: f64 = 1e13;

const MICROS_PER_SEC: i64 = 1_000_000;

/// Unit inferred for a raw timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampUnit {
    Seconds,
    Milliseconds,
    Microseconds,
}

impl TimestampUnit {
    /// Magnitude heuristic: `< 1e10` seconds, `< 1e13` milliseconds, else microseconds.
    ///
    /// 1e10 seconds is year 2286 and 1e13 milliseconds is the same instant, so
    /// any plausible trace timestamp falls unambiguously into one band.
    pub fn classify(raw: f64) -> Self {
        let magnitude = raw.abs();
        if magnitude < SECONDS_UPPER_BOUND {
            Self::Seconds
        } else if magnitude < MILLIS_UPPER_BOUND {
            Self::Milliseconds
        } else {
            Self::Microseconds
        }
    }

    fn micros_per_unit(self) -> f64 {
        match self {
            Self::Seconds => 1_000_000.0,
            Self::Milliseconds => 1_000.0,
            Self::Microseconds => 1.0,
        }
    }
}

/// Convert a raw timestamp of any supported granularity to integer microseconds.
///
/// Returns `None` for non-finite input and for values outside the `i64`
/// microsecond range.
pub fn to_micros(raw: f64) -> Option<i64> {
    if !raw.is_finite() {
        return None;
    }
    let unit = TimestampUnit::classify(raw);
    let micros = (raw * unit.micros_per_unit()).round();
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range.
    if micros < i64::MIN as f64 || micros >= i64::MAX as f64 {
        return None;
    }
    Some(micros as i64)
}

/// Identifies one aggregation bucket.
///
/// Ordering is by site then window start, which is also the emission order of
/// every aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowKey {
    pub site_id: String,
    /// Window start in microseconds.
    pub window_start: i64,
}

/// Maps `(timestamp, site)` to a [`WindowKey`] for a fixed window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowKeyer {
    window_us: i64,
}

impl WindowKeyer {
    /// Build a keyer for windows of `window_secs` seconds.
    pub fn new(window_secs: u64) -> Result<Self> {
        if window_secs == 0 {
            return Err(EnstError::InvalidConfig(
                "window size must be at least 1 second".to_string(),
            ));
        }
        let window_us = i64::try_from(window_secs)
            .ok()
            .and_then(|s| s.checked_mul(MICROS_PER_SEC))
            .ok_or_else(|| {
                EnstError::InvalidConfig(format!("window size {window_secs}s is too large"))
            })?;
        Ok(Self { window_us })
    }

    /// Window length in microseconds.
    pub fn window_us(&self) -> i64 {
        self.window_us
    }

    /// Window length in whole seconds.
    pub fn window_secs(&self) -> u64 {
        (self.window_us / MICROS_PER_SEC) as u64
    }

    /// Floor a microsecond timestamp to its window start.
    ///
    /// Saturates at `i64::MIN` for the partial window below the range.
    pub fn window_start(&self, ts_us: i64) -> i64 {
        ts_us.div_euclid(self.window_us).saturating_mul(self.window_us)
    }

    /// Key for an already-normalized microsecond timestamp.
    pub fn key_micros(&self, ts_us: i64, site_id: &str) -> WindowKey {
        WindowKey {
            site_id: site_id.to_string(),
            window_start: self.window_start(ts_us),
        }
    }

    /// Key for a raw timestamp in any supported unit.
    pub fn key(&self, raw_ts: f64, site_id: &str) -> Option<WindowKey> {
        to_micros(raw_ts).map(|ts| self.key_micros(ts, site_id))
    }

    /// `(window_start, window_end)` for a key. The end saturates at `i64::MAX`.
    pub fn bounds(&self, key: &WindowKey) -> (i64, i64) {
        (
            key.window_start,
            key.window_start.saturating_add(self.window_us),
        )
    }
}
