//! Per-site ENST ranking.
//!
//! Records are folded into one entry per `(site_id, cluster_id)`. Reading the
//! leaderboard finalizes each entry and sorts by ENST, highest first.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::cost::{PriceAccumulator, cost_usd};
use crate::tsv::TsvRecord;
use crate::usage::mean;
use crate::work_units::WorkUnitsKind;

/// CSV header written by [`to_csv`].
pub const CSV_HEADER: &str = "window_start,window_end,site_id,cluster_id,energy_j,work_units,work_units_mode,enst_units_per_j,pue,thermal_headroom_w,grid_stress_index,price_usd_per_mwh,cost_usd,notes";

/// Note emitted when at least one window fell back to the default price.
pub const NOTE_PRICE_DEFAULTED: &str = "missing_price_defaulted";

/// One window as folded into an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub ts_start: i64,
    pub ts_end: i64,
    pub energy_j: Option<f64>,
    pub work_units: Option<f64>,
    pub enst: Option<f64>,
}

#[derive(Debug, Clone)]
struct LeaderboardEntry {
    site_id: String,
    cluster_id: String,
    total_work_units: f64,
    windows: Vec<WindowSnapshot>,
    pue: Vec<f64>,
    thermal: Vec<f64>,
    grid: Vec<f64>,
    price: PriceAccumulator,
    data_sources: BTreeSet<String>,
    modes: BTreeSet<WorkUnitsKind>,
}

impl LeaderboardEntry {
    fn new(site_id: &str, cluster_id: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            cluster_id: cluster_id.to_string(),
            total_work_units: 0.0,
            windows: Vec::new(),
            pue: Vec::new(),
            thermal: Vec::new(),
            grid: Vec::new(),
            price: PriceAccumulator::new(),
            data_sources: BTreeSet::new(),
            modes: BTreeSet::new(),
        }
    }
}

/// Finalized row for one `(site_id, cluster_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub window_start: Option<i64>,
    pub window_end: Option<i64>,
    pub site_id: String,
    pub cluster_id: String,
    pub energy_j: f64,
    pub work_units: f64,
    /// Single mode, or `mixed` when windows disagree; empty when none was set.
    pub work_units_mode: String,
    pub enst_units_per_j: f64,
    pub pue: Option<f64>,
    pub thermal_headroom_w: Option<f64>,
    pub grid_stress_index: Option<f64>,
    pub price_usd_per_mwh: f64,
    pub cost_usd: f64,
    pub notes: String,
    pub window_count: usize,
    pub price_defaulted_windows: usize,
}

/// Accumulates ENST records into a per-site ranking.
#[derive(Debug, Clone)]
pub struct EnstLeaderboard {
    default_price: f64,
    entries: Vec<LeaderboardEntry>,
    index: HashMap<(String, String), usize>,
}

impl EnstLeaderboard {
    pub fn new(default_price: f64) -> Self {
        Self {
            default_price,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Fold one record into its `(site_id, cluster_id)` entry.
    pub fn add_record(&mut self, record: &TsvRecord) {
        let key = (record.site_id.clone(), record.cluster_id.clone());
        let idx = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.entries
                    .push(LeaderboardEntry::new(&record.site_id, &record.cluster_id));
                let i = self.entries.len() - 1;
                self.index.insert(key, i);
                i
            }
        };
        let entry = &mut self.entries[idx];

        if let Some(w) = record.work_units {
            entry.total_work_units += w;
        }
        entry.windows.push(WindowSnapshot {
            ts_start: record.ts_start,
            ts_end: record.ts_end,
            energy_j: record.energy_j,
            work_units: record.work_units,
            enst: record.enst,
        });
        if let Some(v) = record.pue {
            entry.pue.push(v);
        }
        if let Some(v) = record.thermal_headroom_w {
            entry.thermal.push(v);
        }
        if let Some(v) = record.grid_stress_index {
            entry.grid.push(v);
        }

        entry.price.add(record, self.default_price);
        if !record.data_source.is_empty() {
            entry.data_sources.insert(record.data_source.clone());
        }
        if let Some(mode) = record.work_units_mode {
            entry.modes.insert(mode);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finalized rows sorted by ENST, highest first.
    ///
    /// The sort is stable: entries with exactly equal ENST keep the order in
    /// which they were first seen.
    pub fn get_leaderboard(&self) -> Vec<LeaderboardRow> {
        let mut rows: Vec<LeaderboardRow> = self
            .entries
            .iter()
            .map(|e| finalize(e, self.default_price))
            .collect();
        rows.sort_by(|a, b| b.enst_units_per_j.total_cmp(&a.enst_units_per_j));
        rows
    }

    /// Shortcut for `to_csv(&self.get_leaderboard())`.
    pub fn to_csv(&self) -> String {
        to_csv(&self.get_leaderboard())
    }
}

fn finalize(e: &LeaderboardEntry, default_price: f64) -> LeaderboardRow {
    let energy_j = e.price.energy_j();
    let enst = if energy_j > 0.0 {
        e.total_work_units / energy_j
    } else {
        0.0
    };
    let price = e.price.average(default_price);

    let mut notes = Vec::new();
    if e.price.defaulted() > 0 {
        notes.push(NOTE_PRICE_DEFAULTED.to_string());
    }
    if !e.data_sources.is_empty() {
        let tags: Vec<&str> = e.data_sources.iter().map(String::as_str).collect();
        notes.push(format!("data_source={}", tags.join("|")));
    }

    let mode = match e.modes.len() {
        0 => String::new(),
        1 => e.modes.iter().next().map(|m| m.to_string()).unwrap_or_default(),
        _ => "mixed".to_string(),
    };

    LeaderboardRow {
        window_start: e.windows.iter().map(|w| w.ts_start).min(),
        window_end: e.windows.iter().map(|w| w.ts_end).max(),
        site_id: e.site_id.clone(),
        cluster_id: e.cluster_id.clone(),
        energy_j,
        work_units: e.total_work_units,
        work_units_mode: mode,
        enst_units_per_j: enst,
        pue: mean(&e.pue),
        thermal_headroom_w: mean(&e.thermal),
        grid_stress_index: mean(&e.grid),
        price_usd_per_mwh: price,
        cost_usd: cost_usd(Some(energy_j), price),
        notes: notes.join(";"),
        window_count: e.windows.len(),
        price_defaulted_windows: e.price.defaulted(),
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn opt_fixed(value: Option<f64>, places: usize) -> String {
    value.map(|v| format!("{v:.places$}")).unwrap_or_default()
}

fn opt_int(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Render rows as CSV with the fixed column precision of the report format.
pub fn to_csv(rows: &[LeaderboardRow]) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + rows.len() * 128);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for r in rows {
        let _ = writeln!(
            out,
            "{},{},{},{},{:.2},{:.2},{},{:.6},{},{},{},{:.2},{:.2},{}",
            opt_int(r.window_start),
            opt_int(r.window_end),
            csv_field(&r.site_id),
            csv_field(&r.cluster_id),
            r.energy_j,
            r.work_units,
            r.work_units_mode,
            r.enst_units_per_j,
            opt_fixed(r.pue, 2),
            opt_fixed(r.thermal_headroom_w, 2),
            opt_fixed(r.grid_stress_index, 4),
            r.price_usd_per_mwh,
            r.cost_usd,
            csv_field(&r.notes),
        );
    }
    out
}
