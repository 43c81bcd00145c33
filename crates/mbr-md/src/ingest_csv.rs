//! CSV ingestion for OHLCV bars.
//!
//! Decodes a CSV file (or in-memory CSV text) into [`RawBarRecord`]s for
//! the normalizer. The **read** side only: no normalization, no quality
//! gating — every typed check happens downstream in `normalizer`.
//!
//! ## Column contract (case-insensitive, order-independent)
//!
//! | Column      | Example                  | Notes                         |
//! |-------------|--------------------------|-------------------------------|
//! | `timestamp` | `2026-01-01T00:01:00Z`   | RFC-3339, explicit offset     |
//! | `open`      | `182.34`                 | Decimal string; no floats     |
//! | `high`      | `185.00`                 |                               |
//! | `low`       | `181.00`                 |                               |
//! | `close`     | `184.50`                 |                               |
//! | `volume`    | `1000000`                | Decimal string ≥ 0            |
//! | `symbol`    | `BTC-USD`                | Optional; caller default      |
//! | `timeframe` | `1m`                     | Optional; defaults to `1m`    |
//! | `is_closed` | `true` / `1` / `yes`     | Optional; defaults to true    |
//! | `source`    | `exchange-a`             | Optional                      |
//!
//! This mirrors the bar parquet layout; a parquet reader is an external
//! collaborator that produces the same records.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::normalizer::RawBarRecord;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced by CSV decoding.
#[derive(Debug)]
pub enum CsvIngestError {
    /// An I/O error opening or reading the file.
    Io(String),
    /// The header row is missing a required column.
    MissingHeader(String),
}

impl fmt::Display for CsvIngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsvIngestError::Io(msg) => write!(f, "csv io error: {msg}"),
            CsvIngestError::MissingHeader(col) => {
                write!(f, "csv missing required header column: '{col}'")
            }
        }
    }
}

impl std::error::Error for CsvIngestError {}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Decode a CSV file into raw bar records.
///
/// `default_symbol` supplies the symbol for files without a `symbol`
/// column (the common single-instrument export layout).
pub fn parse_csv_file(
    path: &Path,
    default_symbol: &str,
) -> Result<Vec<RawBarRecord>, CsvIngestError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| CsvIngestError::Io(format!("open '{}': {e}", path.display())))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)
        .map_err(|e| CsvIngestError::Io(format!("read '{}': {e}", path.display())))?;
    parse_csv_str(&buf, default_symbol)
}

/// Decode CSV text into raw bar records. See [`parse_csv_file`].
pub fn parse_csv_str(
    src: &str,
    default_symbol: &str,
) -> Result<Vec<RawBarRecord>, CsvIngestError> {
    let mut lines = src.lines();

    let header_line = match lines.next() {
        Some(l) => l,
        None => return Ok(Vec::new()),
    };
    let col_idx = build_col_index(header_line)?;

    let mut out = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // Minimal CSV split: comma-separated, no quoting (sufficient for OHLCV).
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let get = |name: &str| -> Option<String> {
            col_idx
                .get(name)
                .and_then(|&i| fields.get(i))
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };

        out.push(RawBarRecord {
            symbol: get("symbol").or_else(|| Some(default_symbol.to_string())),
            timeframe: get("timeframe").or_else(|| Some("1m".to_string())),
            ts: get("timestamp"),
            open: get("open"),
            high: get("high"),
            low: get("low"),
            close: get("close"),
            volume: get("volume"),
            is_closed: get("is_closed").map(|v| parse_is_closed(&v)),
            source: get("source"),
        });
    }
    Ok(out)
}

fn build_col_index(header_line: &str) -> Result<HashMap<String, usize>, CsvIngestError> {
    let mut idx = HashMap::new();
    for (i, name) in header_line.split(',').enumerate() {
        idx.insert(name.trim().to_ascii_lowercase(), i);
    }
    for required in REQUIRED_COLUMNS {
        if !idx.contains_key(required) {
            return Err(CsvIngestError::MissingHeader(required.to_string()));
        }
    }
    Ok(idx)
}

/// `true` / `1` / `yes` (case-insensitive) mean closed; anything else open.
fn parse_is_closed(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
