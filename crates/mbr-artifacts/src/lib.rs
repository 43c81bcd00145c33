//! mbr-artifacts
//!
//! Append-only artifact streams (`orders`, `fills`, `positions`, `pnl`,
//! `risk_events`) with canonical serialization and a hash-stable run
//! manifest.
//!
//! Canonical form: one JSON object per line, declaration-ordered fields,
//! money as fixed six-decimal strings, timestamps as RFC-3339 UTC
//! truncated to microseconds. Nothing environment-dependent — no wall
//! clock, no host, no paths, no random ids — enters a hashed stream or
//! the manifest, so two runs over identical inputs produce byte-identical
//! output.

mod events;
mod writer;

pub use events::{
    canonical_ts, ArtifactEvent, FillEvent, LimitHitEvent, OrderEvent, PnlSnapshotEvent,
    PositionRow, PositionsSnapshotEvent, RiskEventRecord,
};
pub use writer::{ArtifactError, ArtifactWriter, Manifest, RunMeta, StreamSummary, STREAM_NAMES};
