//! `enst run`: samples → ENST records (+ leaderboard) in one pass.

use std::io::Write;

use enst_core::{EnstLeaderboard, PipelineConfig, to_csv};

use super::normalize::ingest;
use super::{fail, open_output, write_records};

pub struct RunCommandConfig<'a> {
    pub config: PipelineConfig,
    pub usage_path: &'a str,
    pub power_path: &'a str,
    pub output_path: Option<&'a str>,
    pub leaderboard_path: Option<&'a str>,
}

pub fn run(cmd: RunCommandConfig<'_>) {
    let default_price = cmd.config.default_price_usd_per_mwh;
    let mode = cmd.config.mode;
    let pipeline = ingest(cmd.config, cmd.usage_path, cmd.power_path);

    let mut board = cmd
        .leaderboard_path
        .map(|_| EnstLeaderboard::new(default_price));
    let mut out = open_output(cmd.output_path).unwrap_or_else(|e| fail("cannot open output", e));
    let records = pipeline.run().inspect(|r| {
        if let Some(b) = board.as_mut() {
            b.add_record(r);
        }
    });
    match write_records(&mut out, records) {
        Ok(n) => log::info!("wrote {n} ENST records in {mode} mode"),
        Err(e) => fail("write failed", e),
    }

    if let (Some(board), Some(path)) = (board, cmd.leaderboard_path) {
        let rows = board.get_leaderboard();
        let mut lb = open_output(Some(path)).unwrap_or_else(|e| fail(path, e));
        if let Err(e) = lb.write_all(to_csv(&rows).as_bytes()).and_then(|()| lb.flush()) {
            fail(path, e);
        }
        log::info!("leaderboard with {} entries written to {path}", rows.len());
    }
}
