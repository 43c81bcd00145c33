//! mbr-engine
//!
//! The mode-agnostic per-bar event loop. Two engine variants share one
//! runtime core:
//!
//! - [`SingleStrategyEngine`] — per-bar signal intents over one symbol or
//!   a small fixed universe.
//! - [`RebalancingEngine`] — target-weight pipeline reduced to delta
//!   orders under a turnover cap.
//!
//! Pipeline per closed bar: mark → strategy → intents → risk gate →
//! order state machine → broker port → fills → portfolio/risk update →
//! artifacts. Scheduling is single-threaded cooperative; the engine
//! suspends only at port boundaries, and bars are consumed in strictly
//! increasing `(ts, symbol)` order.

mod rebalance;
mod runtime;
mod single;
mod sizing;

pub use rebalance::RebalancingEngine;
pub use runtime::{EngineConfig, RunMode, RunReport, StopFlag};
pub use single::SingleStrategyEngine;
pub use sizing::size_signal;

use std::fmt;

use mbr_core::ports::BrokerError;
use mbr_execution::LifecycleError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal engine failures. Intent-level rejections never appear here —
/// they become risk events and the run continues.
#[derive(Debug)]
pub enum EngineError {
    /// A bar reached the engine without passing the readiness gate, or
    /// out of `(ts, symbol)` order. Upstream normalization is broken.
    BarSequence { detail: String },
    /// Lifecycle or idempotency invariant violation (programmer error).
    Lifecycle(LifecycleError),
    /// A port call exceeded the wall-clock bound.
    PortTimeout { port: &'static str, elapsed_secs: i64 },
    /// A broker failure outside the submit retry path (e.g. cancel-all
    /// during shutdown) that could not be reconciled.
    Broker { context: &'static str, source: BrokerError },
    /// Artifact serialization or materialization failed.
    Artifact(String),
    /// Orders remained non-terminal after finalize and could not be
    /// cancelled.
    NonTerminalAfterFinalize { count: usize },
}

impl EngineError {
    /// Stable class tag recorded in the manifest error list.
    pub fn class(&self) -> &'static str {
        match self {
            EngineError::BarSequence { .. } => "BarSequence",
            EngineError::Lifecycle(_) => "LifecycleInvariant",
            EngineError::PortTimeout { .. } => "PortTimeout",
            EngineError::Broker { .. } => "Broker",
            EngineError::Artifact(_) => "Artifact",
            EngineError::NonTerminalAfterFinalize { .. } => "NonTerminalAfterFinalize",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::BarSequence { detail } => write!(f, "bar sequence violation: {detail}"),
            EngineError::Lifecycle(e) => write!(f, "lifecycle invariant: {e}"),
            EngineError::PortTimeout { port, elapsed_secs } => {
                write!(f, "port '{port}' exceeded timeout ({elapsed_secs}s)")
            }
            EngineError::Broker { context, source } => {
                write!(f, "broker failure during {context}: {source}")
            }
            EngineError::Artifact(msg) => write!(f, "artifact failure: {msg}"),
            EngineError::NonTerminalAfterFinalize { count } => {
                write!(f, "{count} orders non-terminal after finalize")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<LifecycleError> for EngineError {
    fn from(e: LifecycleError) -> Self {
        EngineError::Lifecycle(e)
    }
}
