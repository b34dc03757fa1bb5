//! `enst enst`: annotate TSV records with work units and ENST.

use enst_core::{EnstStreamExt, PipelineConfig};

use super::{fail, open_output, read_records, write_records};

pub fn run(config: &PipelineConfig, input: &str, output_path: Option<&str>) {
    let records = read_records(input).unwrap_or_else(|e| fail(input, e));
    let mut out = open_output(output_path).unwrap_or_else(|e| fail("cannot open output", e));

    let mut with_enst = 0usize;
    let annotated = records.enst_stream(config.enst_options()).inspect(|r| {
        if r.enst.is_some() {
            with_enst += 1;
        }
    });
    match write_records(&mut out, annotated) {
        Ok(n) => log::info!(
            "annotated {n} records in {} mode ({with_enst} with ENST)",
            config.mode
        ),
        Err(e) => fail("write failed", e),
    }
}
