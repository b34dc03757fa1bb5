//! `enst replay`: simulate a power policy over ENST records.

use std::io::Write;
use std::path::Path;

use enst_core::{PipelineConfig, Policy, ReplaySummary};

use super::{fail, fail_config, open_output, read_records, write_json};

pub struct ReplayCommandConfig<'a> {
    pub config: &'a PipelineConfig,
    pub input: &'a str,
    pub policy_path: &'a str,
    pub output_path: Option<&'a str>,
    pub records_path: Option<&'a str>,
}

pub fn run(cmd: ReplayCommandConfig<'_>) {
    let policy = Policy::load(Path::new(cmd.policy_path)).unwrap_or_else(|e| fail_config(&e));
    if policy.is_empty() {
        log::warn!("{}: policy has no caps; replay is a plain copy", cmd.policy_path);
    }

    let records = read_records(cmd.input).unwrap_or_else(|e| fail(cmd.input, e));
    let mut sink = cmd.records_path.map(|p| {
        open_output(Some(p)).unwrap_or_else(|e| fail("cannot open records output", e))
    });

    let mut summary = ReplaySummary::new(policy, cmd.config.default_price_usd_per_mwh);
    for record in records {
        let simulated = summary.push(&record);
        if let Some(out) = sink.as_mut() {
            let line = simulated
                .to_json_line()
                .unwrap_or_else(|e| fail("serialize failed", e));
            if let Err(e) = writeln!(out, "{line}") {
                fail("write failed", e);
            }
        }
    }
    if let Some(mut out) = sink {
        if let Err(e) = out.flush() {
            fail("write failed", e);
        }
    }

    let windows = summary.windows();
    let impact = summary.finish();
    log::info!(
        "replayed {windows} windows: {} throttled, {} flagged for migration, {} violations",
        impact.throttled_windows,
        impact.migrate_flagged_windows,
        impact.violations.total()
    );
    if let Err(e) = write_json(cmd.output_path, &impact) {
        fail("write failed", e);
    }
}
