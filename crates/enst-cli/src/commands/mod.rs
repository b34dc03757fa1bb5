pub mod enst;
pub mod leaderboard;
pub mod normalize;
pub mod replay;
pub mod run;

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use enst_core::{EnstError, PipelineConfig, TsvRecord, WorkUnitsMode};
use flate2::read::GzDecoder;
use serde::Serialize;
use serde_json::{Map, Value};

/// Exit status for configuration errors detected before any record is read.
pub const EXIT_INVALID_CONFIG: i32 = 2;

/// CSV columns that stay strings even when they look numeric.
const TEXT_COLUMNS: &[&str] = &[
    "site_id",
    "site",
    "system",
    "machine",
    "cluster_id",
    "cluster",
    "partition",
    "data_source",
    "work_units_mode",
];

/// Command-line values that override the config file.
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub window_secs: Option<u64>,
    pub mode: Option<String>,
    pub gpu_weight: Option<f64>,
    pub default_price: Option<f64>,
    pub data_source: Option<String>,
}

/// Print a configuration error and exit with [`EXIT_INVALID_CONFIG`].
pub fn fail_config(err: &EnstError) -> ! {
    eprintln!("Error: {err}");
    std::process::exit(EXIT_INVALID_CONFIG);
}

/// Print an error and exit with status 1.
pub fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error: {context}: {err}");
    std::process::exit(1);
}

/// Merge the optional config file with command-line overrides.
pub fn build_config(path: Option<&str>, overrides: &ConfigOverrides) -> enst_core::Result<PipelineConfig> {
    let mut config = match path {
        Some(p) => PipelineConfig::load(Path::new(p))?,
        None => PipelineConfig::default(),
    };
    if let Some(w) = overrides.window_secs {
        config.window_secs = w;
    }
    if let Some(ref m) = overrides.mode {
        config.mode = WorkUnitsMode::from_str(m)?;
    }
    if let Some(g) = overrides.gpu_weight {
        config.gpu_weight = g;
    }
    if let Some(p) = overrides.default_price {
        config.default_price_usd_per_mwh = p;
    }
    if let Some(ref s) = overrides.data_source {
        config.data_source = s.clone();
    }
    config.validate()?;
    Ok(config)
}

/// [`build_config`], exiting with status 2 on any error.
pub fn resolve_config(path: Option<&str>, overrides: &ConfigOverrides) -> PipelineConfig {
    match build_config(path, overrides) {
        Ok(config) => {
            log::debug!("pipeline config: {config:?}");
            config
        }
        Err(e) => fail_config(&e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Ndjson,
    Csv,
}

impl InputFormat {
    /// `.csv` (optionally followed by `.gz`) is CSV; anything else is NDJSON.
    pub fn detect(path: &str) -> Self {
        let stem = path.strip_suffix(".gz").unwrap_or(path);
        if stem.to_ascii_lowercase().ends_with(".csv") {
            Self::Csv
        } else {
            Self::Ndjson
        }
    }
}

/// Open a file, stdin for `-`, decompressing `.gz` transparently.
pub fn open_input(path: &str) -> io::Result<Box<dyn BufRead>> {
    if path == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path)?;
    if path.ends_with(".gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Split one CSV line, honoring double-quoted fields.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn csv_cell(column: &str, raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if TEXT_COLUMNS.contains(&column) {
        return Some(Value::String(raw.to_string()));
    }
    match raw {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::from(i));
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return Some(Value::Number(n));
    }
    Some(Value::String(raw.to_string()))
}

fn csv_row(header: &[String], line: &str) -> Option<Value> {
    let cells = split_csv_line(line);
    if cells.len() != header.len() {
        return None;
    }
    let obj: Map<String, Value> = header
        .iter()
        .zip(&cells)
        .filter_map(|(col, raw)| csv_cell(col, raw).map(|v| (col.clone(), v)))
        .collect();
    Some(Value::Object(obj))
}

/// Streams JSON objects out of an NDJSON or CSV input.
///
/// Bad lines, including lines that are not UTF-8, are logged as `path:line`
/// warnings and skipped. Only an I/O error ends the stream.
pub struct ValueLines {
    path: String,
    format: InputFormat,
    reader: Box<dyn BufRead>,
    buf: Vec<u8>,
    line_no: usize,
    header: Option<Vec<String>>,
    skipped: usize,
}

impl ValueLines {
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn skip(&mut self, reason: impl std::fmt::Display) {
        self.skipped += 1;
        log::warn!("{}:{}: {reason}", self.path, self.line_no);
    }
}

impl Iterator for ValueLines {
    /// `(line number, object)`
    type Item = (usize, Value);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("{}:{}: read failed: {e}", self.path, self.line_no + 1);
                    return None;
                }
            }
            self.line_no += 1;
            let line = match String::from_utf8(std::mem::take(&mut self.buf)) {
                Ok(line) => line,
                Err(_) => {
                    self.skip("invalid UTF-8");
                    continue;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match self.format {
                InputFormat::Ndjson => match serde_json::from_str::<Value>(trimmed) {
                    Ok(v) if v.is_object() => return Some((self.line_no, v)),
                    Ok(_) => self.skip("expected a JSON object"),
                    Err(e) => self.skip(format!("invalid JSON: {e}")),
                },
                InputFormat::Csv => {
                    let Some(header) = self.header.as_deref() else {
                        self.header = Some(
                            split_csv_line(trimmed)
                                .into_iter()
                                .map(|h| h.trim().to_string())
                                .collect(),
                        );
                        continue;
                    };
                    match csv_row(header, trimmed) {
                        Some(v) => return Some((self.line_no, v)),
                        None => self.skip("column count does not match header"),
                    }
                }
            }
        }
    }
}

/// Open `path` and stream its rows as JSON objects.
pub fn read_values(path: &str) -> io::Result<ValueLines> {
    Ok(ValueLines {
        path: path.to_string(),
        format: InputFormat::detect(path),
        reader: open_input(path)?,
        buf: Vec::new(),
        line_no: 0,
        header: None,
        skipped: 0,
    })
}

/// Open `path` and stream its rows as TSV records, skipping malformed ones.
pub fn read_records(path: &str) -> io::Result<impl Iterator<Item = TsvRecord>> {
    let source = path.to_string();
    Ok(read_values(path)?.filter_map(move |(line, value)| {
        match TsvRecord::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("{source}:{line}: {e}");
                None
            }
        }
    }))
}

/// File writer, or stdout for `None` / `-`.
pub fn open_output(path: Option<&str>) -> io::Result<Box<dyn Write>> {
    match path {
        None | Some("-") => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
        Some(p) => Ok(Box::new(BufWriter::new(File::create(p)?))),
    }
}

/// Write records as NDJSON and flush. Returns the number written.
pub fn write_records<W, I>(out: &mut W, records: I) -> enst_core::Result<usize>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = TsvRecord>,
{
    let mut count = 0;
    for record in records {
        writeln!(out, "{}", record.to_json_line()?)?;
        count += 1;
    }
    out.flush()?;
    Ok(count)
}

/// Pretty-print a JSON document to `path` or stdout.
pub fn write_json(path: Option<&str>, value: &impl Serialize) -> enst_core::Result<()> {
    let mut out = open_output(path)?;
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    // -----------------------------------------------------------------------
    // config resolution
    // -----------------------------------------------------------------------

    #[test]
    fn overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "cfg.json", r#"{"window_secs": 300, "data_source": "file"}"#);
        let config = build_config(
            Some(&path),
            &ConfigOverrides {
                data_source: Some("flag".to_string()),
                mode: Some("domain".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(config.window_secs, 300);
        assert_eq!(config.data_source, "flag");
        assert_eq!(config.mode, WorkUnitsMode::Domain);
    }

    #[test]
    fn bad_mode_is_invalid_mode() {
        let err = build_config(
            None,
            &ConfigOverrides {
                mode: Some("bogus".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, EnstError::InvalidMode(_)));
    }

    #[test]
    fn zero_window_is_invalid_config() {
        let err = build_config(
            None,
            &ConfigOverrides {
                window_secs: Some(0),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, EnstError::InvalidConfig(_)));
    }

    // -----------------------------------------------------------------------
    // input decoding
    // -----------------------------------------------------------------------

    #[test]
    fn detect_format_by_suffix() {
        assert_eq!(InputFormat::detect("a.csv"), InputFormat::Csv);
        assert_eq!(InputFormat::detect("a.CSV.gz"), InputFormat::Csv);
        assert_eq!(InputFormat::detect("a.ndjson"), InputFormat::Ndjson);
        assert_eq!(InputFormat::detect("a.jsonl.gz"), InputFormat::Ndjson);
        assert_eq!(InputFormat::detect("-"), InputFormat::Ndjson);
    }

    #[test]
    fn csv_split_handles_quotes() {
        assert_eq!(split_csv_line("a,b,,c"), ["a", "b", "", "c"]);
        assert_eq!(split_csv_line(r#"x,"1,2","say ""hi""""#), ["x", "1,2", r#"say "hi""#]);
    }

    #[test]
    fn ndjson_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "in.ndjson",
            "{\"site\":\"a\",\"ts\":1}\nnot json\n\n[1,2]\n{\"site\":\"b\",\"ts\":2}\n",
        );
        let mut values = read_values(&path).unwrap();
        let got: Vec<_> = values.by_ref().map(|(line, _)| line).collect();
        assert_eq!(got, [1, 5]);
        assert_eq!(values.skipped(), 2);
    }

    #[test]
    fn non_utf8_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.ndjson");
        let mut body = b"{\"site\":\"a\",\"ts\":1}\n".to_vec();
        body.extend_from_slice(b"\xff\xfe\n");
        body.extend_from_slice(b"{\"site\":\"b\",\"ts\":2}\n{\"site\":\"c\",\"ts\":3}");
        std::fs::write(&path, body).unwrap();

        let mut values = read_values(path.to_str().unwrap()).unwrap();
        let got: Vec<_> = values.by_ref().map(|(line, _)| line).collect();
        assert_eq!(got, [1, 3, 4]);
        assert_eq!(values.skipped(), 1);
    }

    #[test]
    fn csv_rows_become_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "in.csv",
            "site_id,timestamp,cpu_util,event_marker\n007,60,0.5,true\n008,61\n009,62,,false\n",
        );
        let rows: Vec<_> = read_values(&path).unwrap().map(|(_, v)| v).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["site_id"], "007");
        assert_eq!(rows[0]["timestamp"], 60);
        assert_eq!(rows[0]["cpu_util"], 0.5);
        assert_eq!(rows[0]["event_marker"], true);
        assert!(rows[1].get("cpu_util").is_none());
    }

    #[test]
    fn gz_input_is_decompressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.ndjson.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(b"{\"site_id\":\"s\",\"ts_start\":0,\"ts_end\":60000000}\n")
            .unwrap();
        enc.finish().unwrap();

        let records: Vec<_> = read_records(path.to_str().unwrap()).unwrap().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].site_id, "s");
    }

    #[test]
    fn records_without_site_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "tsv.ndjson",
            "{\"energy_j\":1}\n{\"site_id\":\"ok\",\"energy_j\":2}\n",
        );
        let records: Vec<_> = read_records(&path).unwrap().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].site_id, "ok");
    }

    // -----------------------------------------------------------------------
    // output
    // -----------------------------------------------------------------------

    #[test]
    fn write_records_emits_one_line_each() {
        let mut buf: Vec<u8> = Vec::new();
        let n = write_records(
            &mut buf,
            vec![TsvRecord::new("a", 0, 1), TsvRecord::new("b", 0, 1)],
        )
        .unwrap();
        assert_eq!(n, 2);
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(TsvRecord::from_json_line(lines[1]).unwrap().site_id, "b");
    }

    #[test]
    fn write_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(path.to_str(), &serde_json::json!({"k": 1})).unwrap();
        let back: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["k"], 1);
    }
}
