//! Strategy registry and loader pipeline.
//!
//! Rust has no runtime module import, so plugin construction is a
//! build-time registration: the host registers one bundle provider per
//! strategy name. Loading still runs the full pipeline in order —
//! resolve the plugin source on disk, sandbox-scan its imports, construct
//! the bundle from the registered provider, validate the schema — so a
//! plugin whose source violates the sandbox is rejected before its
//! factory is ever invoked.

use std::path::{Path, PathBuf};

use mbr_core::types::Timeframe;
use mbr_policy::validate_overrides;

use crate::bundle::{StrategyBundle, StrategyKind};
use crate::sandbox::validate_strategy_source;
use crate::StrategyError;

/// A provider producing a fresh bundle per load.
type BundleProvider = Box<dyn Fn() -> StrategyBundle + Send + Sync>;

struct RegistryEntry {
    name: String,
    provider: BundleProvider,
}

// ---------------------------------------------------------------------------
// StrategyRegistry
// ---------------------------------------------------------------------------

/// Catalogue of available strategies keyed by name.
///
/// Insertion order is preserved in [`StrategyRegistry::names`] output so
/// listings are deterministic.
pub struct StrategyRegistry {
    strategies_dir: PathBuf,
    entries: Vec<RegistryEntry>,
}

impl StrategyRegistry {
    /// Create a registry rooted at the plugin source directory.
    pub fn new(strategies_dir: impl Into<PathBuf>) -> Self {
        Self {
            strategies_dir: strategies_dir.into(),
            entries: Vec::new(),
        }
    }

    /// Register a bundle provider under `name`.
    ///
    /// # Errors
    /// A duplicate or empty name is a load error.
    pub fn register<F>(&mut self, name: impl Into<String>, provider: F) -> Result<(), StrategyError>
    where
        F: Fn() -> StrategyBundle + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StrategyError::Load {
                name,
                detail: "strategy name must not be empty".to_string(),
            });
        }
        if self.entries.iter().any(|e| e.name == name) {
            return Err(StrategyError::Load {
                name: name.clone(),
                detail: "a strategy with this name is already registered".to_string(),
            });
        }
        self.entries.push(RegistryEntry {
            name,
            provider: Box::new(provider),
        });
        Ok(())
    }

    /// Registered names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Resolve the plugin source path for `name`.
    fn resolve_source(&self, name: &str) -> Result<PathBuf, StrategyError> {
        let candidate = Path::new(name);
        if candidate.extension().is_some() && candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        let fallback = self.strategies_dir.join(format!("{name}.rs"));
        if fallback.is_file() {
            return Ok(fallback);
        }
        Err(StrategyError::Load {
            name: name.to_string(),
            detail: format!(
                "no plugin source at '{}'",
                fallback.display()
            ),
        })
    }

    /// Run the full loader pipeline for `name`:
    /// resolve → sandbox → construct → extract → validate.
    pub fn load_bundle(&self, name: &str) -> Result<StrategyBundle, StrategyError> {
        let source_path = self.resolve_source(name)?;
        validate_strategy_source(&source_path)?;

        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| StrategyError::Load {
                name: name.to_string(),
                detail: "plugin source found but no factory is registered".to_string(),
            })?;

        let bundle = (entry.provider)();
        validate_bundle(&bundle)?;
        tracing::debug!(strategy = %bundle.meta.name, "strategy bundle loaded");
        Ok(bundle)
    }
}

// ---------------------------------------------------------------------------
// Bundle validation
// ---------------------------------------------------------------------------

/// Validate an extracted bundle against the schema rules.
pub fn validate_bundle(bundle: &StrategyBundle) -> Result<(), StrategyError> {
    let meta = &bundle.meta;

    if meta.name.trim().is_empty() {
        return Err(StrategyError::Validation {
            detail: "meta.name must be non-empty".to_string(),
        });
    }
    if meta.universe.is_empty() {
        return Err(StrategyError::Validation {
            detail: format!("strategy '{}': meta.universe must be non-empty", meta.name),
        });
    }
    if meta.required_fields.is_empty() {
        return Err(StrategyError::Validation {
            detail: format!(
                "strategy '{}': meta.required_fields must be non-empty",
                meta.name
            ),
        });
    }
    if meta.timeframe != Timeframe::M1 {
        return Err(StrategyError::Validation {
            detail: format!(
                "strategy '{}': timeframe must be 1m, got {}",
                meta.name, meta.timeframe
            ),
        });
    }
    if meta.kind == StrategyKind::Arbitrage {
        return Err(StrategyError::Validation {
            detail: format!(
                "strategy '{}': arbitrage bundles are declared but not executable in this runtime",
                meta.name
            ),
        });
    }
    if bundle.arbitrage.is_some() && meta.kind != StrategyKind::Arbitrage {
        return Err(StrategyError::Validation {
            detail: format!(
                "strategy '{}': arbitrage spec present on a non-arbitrage bundle",
                meta.name
            ),
        });
    }

    if let Some(overrides) = &bundle.overrides {
        validate_overrides(overrides).map_err(|e| StrategyError::Validation {
            detail: format!("strategy '{}': {e}", meta.name),
        })?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
