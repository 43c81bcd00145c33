//! mbr-safety
//!
//! Live execution requires two environment assertions — `LIVE_API=1` and
//! `CONFIRM_LIVE=YES` — checked in **two places**: at the composition
//! root before a live adapter is constructed, and again inside the
//! adapter constructor via [`GatedLiveBroker`]. A missing assertion
//! either hard-fails with [`LiveSafetyGateError`] or downgrades to paper
//! with a recorded warning; which one is a deployment-time choice.
//!
//! Credential variables are opaque here — this crate reads only the two
//! gate variables, and only through an injectable lookup so tests never
//! touch the process environment.

use std::fmt;

use mbr_core::ports::Broker;

/// Gate variable: must be exactly `1`.
pub const LIVE_API_VAR: &str = "LIVE_API";
/// Gate variable: must be exactly `YES`.
pub const CONFIRM_LIVE_VAR: &str = "CONFIRM_LIVE";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Raised when live execution is requested without both gates set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveSafetyGateError {
    /// The gate variables that were missing or had the wrong value.
    pub missing: Vec<&'static str>,
}

impl fmt::Display for LiveSafetyGateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "live safety gate failed: {} must be set ({}=1, {}=YES)",
            self.missing.join(", "),
            LIVE_API_VAR,
            CONFIRM_LIVE_VAR
        )
    }
}

impl std::error::Error for LiveSafetyGateError {}

// ---------------------------------------------------------------------------
// Gate check
// ---------------------------------------------------------------------------

/// Environment lookup. Injectable so tests never mutate process state.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read the process environment (composition-root default).
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Check both gate assertions.
pub fn check_live_gates(lookup: EnvLookup<'_>) -> Result<(), LiveSafetyGateError> {
    let mut missing = Vec::new();
    if lookup(LIVE_API_VAR).as_deref() != Some("1") {
        missing.push(LIVE_API_VAR);
    }
    if lookup(CONFIRM_LIVE_VAR).as_deref() != Some("YES") {
        missing.push(CONFIRM_LIVE_VAR);
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LiveSafetyGateError { missing })
    }
}

// ---------------------------------------------------------------------------
// Deployment-time choice
// ---------------------------------------------------------------------------

/// What the composition root does when a gate assertion is missing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GateAction {
    /// Surface [`LiveSafetyGateError`] and refuse to run.
    HardFail,
    /// Run in paper mode instead, with an explicit recorded warning.
    DowngradeToPaper,
}

/// Result of resolving a live-mode request against the gates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedMode {
    /// Both gates present: live execution may proceed.
    Live,
    /// Downgraded; the warning must be surfaced on the run summary.
    PaperDowngrade { warning: String },
}

/// Composition-root gate: the **first** of the two checks.
pub fn resolve_live_mode(
    action: GateAction,
    lookup: EnvLookup<'_>,
) -> Result<ResolvedMode, LiveSafetyGateError> {
    match check_live_gates(lookup) {
        Ok(()) => Ok(ResolvedMode::Live),
        Err(e) => match action {
            GateAction::HardFail => Err(e),
            GateAction::DowngradeToPaper => {
                let warning = format!("live execution downgraded to paper: {e}");
                tracing::warn!(%warning);
                Ok(ResolvedMode::PaperDowngrade { warning })
            }
        },
    }
}

// ---------------------------------------------------------------------------
// In-adapter gate (defense in depth)
// ---------------------------------------------------------------------------

/// Wrapper that re-asserts the gates inside the adapter constructor —
/// the **second** of the two checks. A live broker implementation is
/// only reachable through this wrapper, so a composition root that
/// forgot the first check still cannot construct a live adapter.
#[derive(Debug)]
pub struct GatedLiveBroker<B: Broker> {
    inner: B,
}

impl<B: Broker> GatedLiveBroker<B> {
    /// Construct the live adapter, re-checking both gates.
    pub fn new(inner: B, lookup: EnvLookup<'_>) -> Result<Self, LiveSafetyGateError> {
        check_live_gates(lookup)?;
        Ok(Self { inner })
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    pub fn inner_mut(&mut self) -> &mut B {
        &mut self.inner
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
