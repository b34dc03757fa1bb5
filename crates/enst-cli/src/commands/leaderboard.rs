//! `enst leaderboard`: ENST records → ranked CSV.

use std::io::Write;

use enst_core::{EnstLeaderboard, PipelineConfig, to_csv};

use super::{fail, open_output, read_records};

pub fn run(config: &PipelineConfig, input: &str, output_path: Option<&str>) {
    let records = read_records(input).unwrap_or_else(|e| fail(input, e));

    let mut board = EnstLeaderboard::new(config.default_price_usd_per_mwh);
    let mut count = 0usize;
    for record in records {
        board.add_record(&record);
        count += 1;
    }
    let rows = board.get_leaderboard();
    log::info!("ranked {} site/cluster entries from {count} records", rows.len());
    if let Some(top) = rows.first() {
        log::info!(
            "top: {}/{} at {:.6} units/J",
            top.site_id,
            top.cluster_id,
            top.enst_units_per_j
        );
    }

    let mut out = open_output(output_path).unwrap_or_else(|e| fail("cannot open output", e));
    if let Err(e) = out.write_all(to_csv(&rows).as_bytes()).and_then(|()| out.flush()) {
        fail("write failed", e);
    }
}
