//! Row encoders for export bodies
//!
//! Each encoder turns one [`RawRow`] into the bytes to append to the body
//! and keeps a running byte count used for the export size cap. The count
//! is the serialized size of the rows: cell lengths for CSV, object
//! length plus newline for JSONL.

use bytes::Bytes;
use chrono::SecondsFormat;

use beacon_common::{Error, RawRow, Result, Value};

use crate::request::ExportFormat;

pub enum RowEncoder {
    Csv(CsvEncoder),
    Jsonl(JsonlEncoder),
}

impl RowEncoder {
    pub fn new(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Csv => RowEncoder::Csv(CsvEncoder::new()),
            ExportFormat::Jsonl => RowEncoder::Jsonl(JsonlEncoder::default()),
        }
    }

    /// Encode one row; the CSV header is emitted ahead of the first row
    pub fn encode(&mut self, row: &RawRow) -> Result<Bytes> {
        match self {
            RowEncoder::Csv(csv) => csv.encode(row),
            RowEncoder::Jsonl(jsonl) => jsonl.encode(row),
        }
    }

    /// Bytes counted towards the size cap so far
    pub fn total_bytes(&self) -> u64 {
        match self {
            RowEncoder::Csv(csv) => csv.total_bytes,
            RowEncoder::Jsonl(jsonl) => jsonl.total_bytes,
        }
    }
}

// ============================================================================
// CSV
// ============================================================================

/// CSV with a header taken from the first row's columns
pub struct CsvEncoder {
    header: Option<Vec<String>>,
    total_bytes: u64,
}

impl CsvEncoder {
    pub fn new() -> Self {
        Self {
            header: None,
            total_bytes: 0,
        }
    }

    fn encode(&mut self, row: &RawRow) -> Result<Bytes> {
        let mut out = Vec::new();
        if self.header.is_none() {
            let header: Vec<String> = row.keys().map(str::to_string).collect();
            write_record(&mut out, &header)?;
            self.header = Some(header);
        }

        let record: Vec<String> = match &self.header {
            Some(header) => header
                .iter()
                .map(|column| row.get(column).map(cell_text).unwrap_or_default())
                .collect(),
            None => Vec::new(),
        };
        write_record(&mut out, &record)?;

        self.total_bytes += record.iter().map(|cell| cell.len() as u64).sum::<u64>();
        Ok(Bytes::from(out))
    }
}

/// Append one quoted and terminated record to `out`
fn write_record(out: &mut Vec<u8>, record: &[String]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    writer.write_record(record).map_err(csv_error)?;
    writer.flush()?;
    Ok(())
}

impl Default for CsvEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn csv_error(e: csv::Error) -> Error {
    Error::Serialization(format!("error writing CSV: {}", e))
}

/// Render a cell as text, neutralized against spreadsheet formulas
pub fn cell_text(value: &Value) -> String {
    let text = match value {
        Value::Null => return String::new(),
        Value::String(s) => s.clone(),
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Nanos, true),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        Value::Json(v) => v.to_string(),
    };
    sanitize_cell(text)
}

/// Prefix `'` when the first non-whitespace character could start a formula
pub fn sanitize_cell(text: String) -> String {
    match text.chars().find(|c| !c.is_whitespace()) {
        Some('=' | '+' | '-' | '@') => format!("'{}", text),
        _ => text,
    }
}

// ============================================================================
// JSONL
// ============================================================================

/// One JSON object per line
#[derive(Default)]
pub struct JsonlEncoder {
    total_bytes: u64,
}

impl JsonlEncoder {
    fn encode(&mut self, row: &RawRow) -> Result<Bytes> {
        let mut line = serde_json::to_vec(row)
            .map_err(|e| Error::Serialization(format!("error marshaling JSON: {}", e)))?;
        line.push(b'\n');
        self.total_bytes += line.len() as u64;
        Ok(Bytes::from(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn body(format: ExportFormat, rows: &[RawRow]) -> (String, u64) {
        let mut encoder = RowEncoder::new(format);
        let mut out = Vec::new();
        for row in rows {
            out.extend_from_slice(&encoder.encode(row).unwrap());
        }
        (String::from_utf8(out).unwrap(), encoder.total_bytes())
    }

    #[test]
    fn test_csv_header_and_order() {
        let rows = vec![
            RawRow::new().with("timestamp", 1u64).with("id", "a").with("body", "hello, world"),
            RawRow::new().with("body", "second").with("timestamp", 2u64).with("id", "b"),
            RawRow::new().with("timestamp", 3u64).with("extra", "ignored"),
        ];
        let (text, _) = body(ExportFormat::Csv, &rows);
        assert_eq!(
            text,
            "timestamp,id,body\n1,a,\"hello, world\"\n2,b,second\n3,,\n"
        );
    }

    #[test]
    fn test_csv_chunks_do_not_repeat_bytes() {
        let mut encoder = RowEncoder::new(ExportFormat::Csv);
        let first = encoder
            .encode(&RawRow::new().with("id", "a").with("n", 1i64))
            .unwrap();
        let second = encoder
            .encode(&RawRow::new().with("id", "b").with("n", 2i64))
            .unwrap();
        assert_eq!(&first[..], b"id,n\na,1\n");
        assert_eq!(&second[..], b"b,2\n");
    }

    #[test]
    fn test_csv_formula_guard() {
        let row = RawRow::new()
            .with("a", "=SUM(1,1)")
            .with("b", "+7")
            .with("c", "@ref")
            .with("d", " -1")
            .with("e", "ok")
            .with("f", -3i64);
        let cells: Vec<String> = row.iter().map(|(_, v)| cell_text(v)).collect();
        assert_eq!(cells, ["'=SUM(1,1)", "'+7", "'@ref", "' -1", "ok", "'-3"]);
    }

    #[test]
    fn test_cell_text_types() {
        let ts = Utc.timestamp_opt(1_700_000_000, 5).unwrap();
        assert_eq!(cell_text(&Value::Timestamp(ts)), "2023-11-14T22:13:20.000000005Z");
        assert_eq!(cell_text(&Value::Float(1.5)), "1.5");
        assert_eq!(cell_text(&Value::Bool(true)), "true");
        assert_eq!(cell_text(&Value::Bytes(b"raw".to_vec())), "raw");
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(
            cell_text(&Value::Json(serde_json::json!({"k": [1, 2]}))),
            r#"{"k":[1,2]}"#
        );
    }

    #[test]
    fn test_csv_byte_accounting() {
        let rows = vec![RawRow::new().with("a", "xy").with("b", "=z")];
        let (_, total) = body(ExportFormat::Csv, &rows);
        // "xy" + "'=z"
        assert_eq!(total, 5);
    }

    #[test]
    fn test_jsonl_lines() {
        let rows = vec![
            RawRow::new().with("id", "a").with("n", 1i64),
            RawRow::new().with("id", "b").with("n", 2i64),
        ];
        let (text, total) = body(ExportFormat::Jsonl, &rows);
        assert_eq!(text, "{\"id\":\"a\",\"n\":1}\n{\"id\":\"b\",\"n\":2}\n");
        assert_eq!(total, text.len() as u64);
    }

    proptest! {
        #[test]
        fn prop_formula_cells_are_quoted(text in "\\PC{0,16}") {
            let cell = sanitize_cell(text.clone());
            match text.trim_start().chars().next() {
                Some('=' | '+' | '-' | '@') => prop_assert_eq!(cell, format!("'{}", text)),
                _ => prop_assert_eq!(cell, text),
            }
        }

        #[test]
        fn prop_jsonl_round_trip(values in proptest::collection::vec(("[a-z]{1,6}", any::<i64>()), 1..8)) {
            let rows: Vec<RawRow> = values
                .iter()
                .map(|(s, n)| RawRow::new().with("s", s.as_str()).with("n", *n))
                .collect();
            let (text, _) = body(ExportFormat::Jsonl, &rows);
            let parsed: Vec<serde_json::Value> = text
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect();
            prop_assert_eq!(parsed.len(), rows.len());
            for (json, (s, n)) in parsed.iter().zip(&values) {
                prop_assert_eq!(json["s"].as_str(), Some(s.as_str()));
                prop_assert_eq!(json["n"].as_i64(), Some(*n));
            }
        }

        #[test]
        fn prop_csv_round_trip(values in proptest::collection::vec("[a-z ,\"]{0,8}", 1..8)) {
            let rows: Vec<RawRow> = values
                .iter()
                .map(|v| RawRow::new().with("col", v.as_str()).with("k", "x"))
                .collect();
            let (text, _) = body(ExportFormat::Csv, &rows);
            let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
            let headers = reader.headers().unwrap().clone();
            prop_assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["col", "k"]);
            let parsed: Vec<String> = reader
                .records()
                .map(|r| r.unwrap()[0].to_string())
                .collect();
            prop_assert_eq!(parsed, values);
        }
    }
}
