//! Strategy bundle schema.
//!
//! A plugin exports a [`StrategyBundle`]: static metadata, a factory that
//! builds a fresh [`Strategy`] instance per run, and optional policy
//! overrides merged onto the runtime defaults by `mbr-policy`.

use chrono::{DateTime, Utc};

use mbr_core::types::{Bar, Fill, PortfolioState, Signal, TargetWeights, Timeframe};
use mbr_policy::PolicyOverrides;

// ---------------------------------------------------------------------------
// Strategy trait
// ---------------------------------------------------------------------------

/// Lifecycle hooks a strategy implements.
///
/// Determinism contract: given the same bar/fill sequence, a strategy must
/// produce the same outputs. No clocks, no RNG, no IO — the sandbox keeps
/// plugins honest at the import level, and the engine passes every input
/// explicitly.
pub trait Strategy {
    /// Called once per closed bar, in `(ts, symbol)` order. Returns the
    /// intents for this bar (possibly empty).
    fn on_bar(&mut self, bar: &Bar) -> Vec<Signal>;

    /// Called after each fill attributable to this strategy.
    fn on_fill(&mut self, _fill: &Fill) {}

    /// Called once after the final bar. After this, every order must be
    /// terminal.
    fn finalize(&mut self) {}

    /// Rebalancing strategies return target weights on their rebalance
    /// triggers; signal strategies keep the default `None`.
    fn target_weights(
        &mut self,
        _ts: DateTime<Utc>,
        _portfolio: &PortfolioState,
    ) -> Option<TargetWeights> {
        None
    }
}

/// A thread-safe factory producing a fresh strategy instance per run.
///
/// Each invocation must return an independent instance: strategies carry
/// mutable state (bar history, open-position flags) that must not leak
/// across runs.
pub type StrategyFactory = Box<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Which engine a bundle targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    /// Per-bar signals driving `SingleStrategyEngine`.
    Signal,
    /// Target-weight pipeline driving `RebalancingEngine`.
    Rebalance,
    /// Declared interface only; rejected at load time.
    Arbitrage,
}

/// Static strategy metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrategyMeta {
    pub name: String,
    pub kind: StrategyKind,
    /// Symbols the strategy trades. Must be non-empty.
    pub universe: Vec<String>,
    /// Locked to one-minute bars; the enum is the forward-compat slot.
    pub timeframe: Timeframe,
    /// Bar fields the strategy reads (e.g. `close`, `volume`). Must be
    /// non-empty.
    pub required_fields: Vec<String>,
    /// Optional trading-session tag (e.g. `24x7`, `rth`).
    pub session: Option<String>,
}

// ---------------------------------------------------------------------------
// Arbitrage interface stub
// ---------------------------------------------------------------------------

/// Multi-leg arbitrage declaration.
///
/// The runtime declares the interface so bundles can be described and
/// validated, but provides no arbitrage execution: the loader rejects
/// `StrategyKind::Arbitrage` bundles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArbitrageSpec {
    /// Symbols forming the legs, in declaration order.
    pub legs: Vec<String>,
    /// How leg bars are aligned in time (e.g. `same_close`).
    pub alignment_policy: String,
    /// Leg submission ordering (e.g. `cheapest_first`).
    pub leg_order_policy: String,
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// The declarative unit a plugin exports: metadata + strategy factory +
/// optional policy overrides.
pub struct StrategyBundle {
    pub meta: StrategyMeta,
    pub build: StrategyFactory,
    pub overrides: Option<PolicyOverrides>,
    /// Present only on `Arbitrage` bundles.
    pub arbitrage: Option<ArbitrageSpec>,
}

impl StrategyBundle {
    pub fn new(meta: StrategyMeta, build: StrategyFactory) -> Self {
        Self {
            meta,
            build,
            overrides: None,
            arbitrage: None,
        }
    }

    pub fn with_overrides(mut self, overrides: PolicyOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }
}

impl std::fmt::Debug for StrategyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyBundle")
            .field("meta", &self.meta)
            .field("overrides", &self.overrides)
            .field("arbitrage", &self.arbitrage)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
