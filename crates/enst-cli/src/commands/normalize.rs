//! `enst normalize`: raw samples → TSV records.

use enst_core::{Pipeline, PipelineConfig};

use super::{fail, fail_config, open_output, read_values, write_records};

/// Feed both sample files into a fresh pipeline.
pub fn ingest(config: PipelineConfig, usage_path: &str, power_path: &str) -> Pipeline {
    let mut pipeline = Pipeline::new(config).unwrap_or_else(|e| fail_config(&e));

    let mut usage = read_values(usage_path).unwrap_or_else(|e| fail(usage_path, e));
    for (_, value) in usage.by_ref() {
        pipeline.add_usage_sample(&value);
    }
    let mut power = read_values(power_path).unwrap_or_else(|e| fail(power_path, e));
    for (_, value) in power.by_ref() {
        pipeline.add_power_sample(&value);
    }
    let bad_lines = usage.skipped() + power.skipped();
    if bad_lines > 0 {
        log::warn!("{bad_lines} unreadable input lines skipped");
    }

    let stats = pipeline.stats();
    log::info!(
        "ingested {} usage samples ({} skipped), {} power samples ({} skipped)",
        stats.usage_samples,
        stats.usage_skipped,
        stats.power_samples,
        stats.power_skipped
    );
    pipeline
}

pub fn run(config: PipelineConfig, usage_path: &str, power_path: &str, output_path: Option<&str>) {
    let pipeline = ingest(config, usage_path, power_path);
    let mut out = open_output(output_path).unwrap_or_else(|e| fail("cannot open output", e));
    match write_records(&mut out, pipeline.normalize()) {
        Ok(n) => log::info!("wrote {n} TSV records"),
        Err(e) => fail("write failed", e),
    }
}
