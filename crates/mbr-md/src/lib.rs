//! mbr-md
//!
//! Bar ingestion and normalization. Converts raw records from any data
//! source into canonical [`mbr_core::Bar`] values sorted by `(symbol, ts)`
//! with the quality invariants enforced: strict per-symbol monotonicity,
//! 60 s close-to-close adjacency within contiguous segments, unique
//! `(symbol, ts, timeframe)`, sane OHLC, and the readiness gate (only
//! closed bars are delivered).
//!
//! This crate does **not**:
//! - fetch data (adapters implement `BarDataSource`)
//! - run strategies or touch orders
//! - write artifacts

pub mod ingest_csv;
pub mod normalizer;
pub mod replay;
pub mod stream;

pub use ingest_csv::{parse_csv_file, parse_csv_str, CsvIngestError};
pub use normalizer::{
    normalize_batch, parse_record, DedupWinner, DuplicateEvent, GapEvent, GapPolicy, MdError,
    NormalizeReport, NormalizedBatch, NormalizerConfig, RawBarRecord,
};
pub use replay::ReplayDataSource;
pub use stream::BarStream;
