//! Append-only artifact streams and the run manifest.
//!
//! The writer keeps one ordered stream per artifact class. Every appended
//! event is serialized once to its canonical JSON line; the line feeds a
//! running SHA-256 for its stream and is retained for materialization.
//! The manifest carries per-stream `{count, sha256}` plus run metadata
//! that is itself environment-independent.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::events::ArtifactEvent;

/// Stream names in canonical (manifest) order.
pub const STREAM_NAMES: [&str; 5] = ["orders", "fills", "positions", "pnl", "risk_events"];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while appending or materializing artifacts.
#[derive(Debug)]
pub enum ArtifactError {
    Serialize(String),
    Io(String),
}

impl std::fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactError::Serialize(msg) => write!(f, "artifact serialization failed: {msg}"),
            ArtifactError::Io(msg) => write!(f, "artifact io failed: {msg}"),
        }
    }
}

impl std::error::Error for ArtifactError {}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Environment-independent run metadata recorded in the manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub schema_version: i32,
    pub mode: String,
    pub strategy: String,
    pub symbols: Vec<String>,
}

/// Per-stream summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub count: u64,
    pub sha256: String,
}

/// The run manifest. Two runs over identical inputs, bundle, and policy
/// merge output serialize to byte-identical manifests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: i32,
    pub mode: String,
    pub strategy: String,
    pub symbols: Vec<String>,
    pub streams: BTreeMap<String, StreamSummary>,
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct StreamState {
    count: u64,
    hasher: Sha256,
    lines: Vec<String>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            count: 0,
            hasher: Sha256::new(),
            lines: Vec::new(),
        }
    }
}

/// Append-only writer for one run.
pub struct ArtifactWriter {
    meta: RunMeta,
    streams: BTreeMap<&'static str, StreamState>,
    errors: Vec<String>,
}

impl ArtifactWriter {
    pub fn new(meta: RunMeta) -> Self {
        let mut streams = BTreeMap::new();
        for name in STREAM_NAMES {
            streams.insert(name, StreamState::new());
        }
        Self {
            meta,
            streams,
            errors: Vec::new(),
        }
    }

    /// Serialize and append one event to its stream.
    pub fn append(&mut self, event: &ArtifactEvent) -> Result<(), ArtifactError> {
        let line = serde_json::to_string(event)
            .map_err(|e| ArtifactError::Serialize(e.to_string()))?;
        let stream = self
            .streams
            .get_mut(event.stream())
            .expect("all stream names pre-registered");
        stream.hasher.update(line.as_bytes());
        stream.hasher.update(b"\n");
        stream.count += 1;
        stream.lines.push(line);
        Ok(())
    }

    /// Record a run error for the manifest (`class: message`).
    pub fn record_error(&mut self, class: &str, message: &str) {
        self.errors.push(format!("{class}: {message}"));
    }

    /// Events appended to a stream so far.
    pub fn count(&self, stream: &str) -> u64 {
        self.streams.get(stream).map_or(0, |s| s.count)
    }

    /// The serialized lines of one stream (test and inspection surface).
    pub fn lines(&self, stream: &str) -> &[String] {
        self.streams
            .get(stream)
            .map_or(&[][..], |s| s.lines.as_slice())
    }

    /// Build the manifest from the current stream states.
    pub fn manifest(&self) -> Manifest {
        let streams = self
            .streams
            .iter()
            .map(|(name, state)| {
                (
                    name.to_string(),
                    StreamSummary {
                        count: state.count,
                        sha256: hex::encode(state.hasher.clone().finalize()),
                    },
                )
            })
            .collect();
        Manifest {
            schema_version: 1,
            mode: self.meta.mode.clone(),
            strategy: self.meta.strategy.clone(),
            symbols: self.meta.symbols.clone(),
            streams,
            errors: self.errors.clone(),
        }
    }

    /// Materialize `<stream>.jsonl` files plus `manifest.json` into
    /// `run_dir` (backtest mode). Returns the manifest path.
    pub fn write_to_dir(&self, run_dir: &Path) -> Result<PathBuf, ArtifactError> {
        fs::create_dir_all(run_dir)
            .map_err(|e| ArtifactError::Io(format!("create '{}': {e}", run_dir.display())))?;

        for (name, state) in &self.streams {
            let path = run_dir.join(format!("{name}.jsonl"));
            let mut body = String::new();
            for line in &state.lines {
                body.push_str(line);
                body.push('\n');
            }
            fs::write(&path, body)
                .map_err(|e| ArtifactError::Io(format!("write '{}': {e}", path.display())))?;
        }

        let manifest_path = run_dir.join("manifest.json");
        let json = serde_json::to_string_pretty(&self.manifest())
            .map_err(|e| ArtifactError::Serialize(e.to_string()))?;
        fs::write(&manifest_path, format!("{json}\n")).map_err(|e| {
            ArtifactError::Io(format!("write '{}': {e}", manifest_path.display()))
        })?;
        Ok(manifest_path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{canonical_ts, LimitHitEvent, PnlSnapshotEvent};
    use chrono::{TimeZone, Utc};
    use mbr_core::types::PortfolioState;
    use mbr_core::MICROS_SCALE;

    fn meta() -> RunMeta {
        RunMeta {
            schema_version: 1,
            mode: "backtest".to_string(),
            strategy: "test".to_string(),
            symbols: vec!["BTC-USD".to_string()],
        }
    }

    fn pnl_event(minute: u32, cash_units: i64) -> ArtifactEvent {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, minute, 0).unwrap();
        let pf = PortfolioState::new(ts, cash_units * MICROS_SCALE);
        ArtifactEvent::PnlSnapshot(PnlSnapshotEvent::from_portfolio(&pf))
    }

    #[test]
    fn empty_streams_have_stable_empty_hash() {
        let w1 = ArtifactWriter::new(meta());
        let w2 = ArtifactWriter::new(meta());
        assert_eq!(w1.manifest(), w2.manifest());
        // SHA-256 of zero bytes.
        assert_eq!(
            w1.manifest().streams["orders"].sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn append_routes_to_stream_and_counts() {
        let mut w = ArtifactWriter::new(meta());
        w.append(&pnl_event(1, 100)).unwrap();
        w.append(&pnl_event(2, 101)).unwrap();
        assert_eq!(w.count("pnl"), 2);
        assert_eq!(w.count("orders"), 0);
        assert_eq!(w.lines("pnl").len(), 2);
    }

    #[test]
    fn identical_appends_yield_identical_manifests() {
        let mut w1 = ArtifactWriter::new(meta());
        let mut w2 = ArtifactWriter::new(meta());
        for w in [&mut w1, &mut w2] {
            w.append(&pnl_event(1, 100)).unwrap();
            w.append(&pnl_event(2, 99)).unwrap();
        }
        assert_eq!(w1.manifest(), w2.manifest());
        assert_eq!(
            serde_json::to_string(&w1.manifest()).unwrap(),
            serde_json::to_string(&w2.manifest()).unwrap()
        );
    }

    #[test]
    fn hash_depends_on_content_and_order() {
        let mut w1 = ArtifactWriter::new(meta());
        w1.append(&pnl_event(1, 100)).unwrap();
        w1.append(&pnl_event(2, 99)).unwrap();

        let mut w2 = ArtifactWriter::new(meta());
        w2.append(&pnl_event(2, 99)).unwrap();
        w2.append(&pnl_event(1, 100)).unwrap();

        assert_ne!(
            w1.manifest().streams["pnl"].sha256,
            w2.manifest().streams["pnl"].sha256
        );
    }

    #[test]
    fn errors_land_in_manifest_not_in_stream_hash() {
        let mut w1 = ArtifactWriter::new(meta());
        let mut w2 = ArtifactWriter::new(meta());
        w1.append(&pnl_event(1, 100)).unwrap();
        w2.append(&pnl_event(1, 100)).unwrap();
        w2.record_error("StrategyValidation", "bad universe");

        assert_eq!(
            w1.manifest().streams["pnl"].sha256,
            w2.manifest().streams["pnl"].sha256
        );
        assert_eq!(w2.manifest().errors, vec!["StrategyValidation: bad universe"]);
    }

    #[test]
    fn materializes_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ArtifactWriter::new(meta());
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap();
        w.append(&pnl_event(1, 100)).unwrap();
        w.append(&ArtifactEvent::LimitHit(LimitHitEvent::new(ts, "broker", "429")))
            .unwrap();

        let manifest_path = w.write_to_dir(dir.path()).unwrap();
        assert!(manifest_path.exists());
        for name in STREAM_NAMES {
            assert!(dir.path().join(format!("{name}.jsonl")).exists(), "{name}");
        }

        let pnl_body = fs::read_to_string(dir.path().join("pnl.jsonl")).unwrap();
        assert_eq!(pnl_body.lines().count(), 1);
        let manifest: Manifest =
            serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
        assert_eq!(manifest.streams["risk_events"].count, 1);
    }

    #[test]
    fn canonical_ts_in_stream_lines() {
        let mut w = ArtifactWriter::new(meta());
        w.append(&pnl_event(1, 100)).unwrap();
        assert!(w.lines("pnl")[0].contains(&canonical_ts(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap()
        )));
    }
}
