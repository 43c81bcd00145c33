//! mbr-strategy
//!
//! The strategy plugin surface: the [`Strategy`] trait and
//! [`StrategyBundle`] contract, the name → factory registry, and the
//! static import sandbox that vets a plugin's source before its factory
//! may be used.
//!
//! Strategies are pure compute: they see bars, fills, and portfolio
//! snapshots, and emit signals or target weights. They never touch ports,
//! the engine, or IO — the sandbox enforces that at the import level.

mod bundle;
mod registry;
mod sandbox;

pub use bundle::{
    ArbitrageSpec, Strategy, StrategyBundle, StrategyFactory, StrategyKind, StrategyMeta,
};
pub use registry::{validate_bundle, StrategyRegistry};
pub use sandbox::{
    scan_source, validate_strategy_source, ImportViolation, ALLOWED_PREFIXES, DENIED_PREFIXES,
};

use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the loader pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StrategyError {
    /// The plugin could not be resolved or constructed.
    Load { name: String, detail: String },
    /// The plugin source imports symbols outside the sandbox policy.
    /// Every offending import is listed, in file order.
    Sandbox {
        path: PathBuf,
        violations: Vec<ImportViolation>,
    },
    /// The extracted bundle failed schema validation.
    Validation { detail: String },
}

impl fmt::Display for StrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyError::Load { name, detail } => {
                write!(f, "strategy '{name}' failed to load: {detail}")
            }
            StrategyError::Sandbox { path, violations } => {
                let cite = |group: Vec<&ImportViolation>| {
                    group
                        .iter()
                        .map(|v| format!("'{}' (line {})", v.import, v.line))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                let denied: Vec<&ImportViolation> =
                    violations.iter().filter(|v| v.denied).collect();
                let unlisted: Vec<&ImportViolation> =
                    violations.iter().filter(|v| !v.denied).collect();

                let mut details = Vec::new();
                if !denied.is_empty() {
                    details.push(format!("forbidden imports: {}", cite(denied)));
                }
                if !unlisted.is_empty() {
                    details.push(format!("imports outside allowlist: {}", cite(unlisted)));
                }
                write!(
                    f,
                    "strategy import policy violation in {}: {}",
                    path.display(),
                    details.join("; ")
                )
            }
            StrategyError::Validation { detail } => {
                write!(f, "strategy bundle validation failed: {detail}")
            }
        }
    }
}

impl std::error::Error for StrategyError {}
