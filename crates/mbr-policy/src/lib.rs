//! mbr-policy
//!
//! Default cost/risk/sizing policies and the pure, field-wise merge of
//! strategy-supplied overrides.
//!
//! Merge law: an absent override object keeps the whole default object; an
//! absent (`None`) override field keeps that default field; a present
//! field replaces exactly that field. The merge never mutates the defaults
//! and is deterministic.
//!
//! Money fields are integer micros; ratio fields are integer basis points
//! (see `mbr_core::fixedpoint`).

use std::fmt;

use serde::{Deserialize, Serialize};

use mbr_core::fixedpoint::MICROS_SCALE;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Execution cost model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostPolicy {
    pub commission_bps: i64,
    pub slippage_bps: i64,
    pub min_fee_micros: i64,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self {
            commission_bps: 5,
            slippage_bps: 1,
            min_fee_micros: 0,
        }
    }
}

/// Risk limits enforced by the pre-trade gate and kill switch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskPolicy {
    pub max_leverage_bps: i64,
    pub max_position_notional_micros: i64,
    pub max_drawdown_bps: i64,
    pub kill_switch_dd_bps: i64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            max_leverage_bps: 10_000,
            max_position_notional_micros: 100_000 * MICROS_SCALE,
            max_drawdown_bps: 2_000,
            kill_switch_dd_bps: 3_000,
        }
    }
}

/// Position sizing parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingPolicy {
    pub target_vol_bps: i64,
    /// Also the turnover cap for a single rebalance batch.
    pub max_gross_exposure_bps: i64,
    pub per_trade_risk_bps: i64,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self {
            target_vol_bps: 1_500,
            max_gross_exposure_bps: 10_000,
            per_trade_risk_bps: 100,
        }
    }
}

/// The composed policy triple an engine runs under.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    pub cost: CostPolicy,
    pub risk: RiskPolicy,
    pub sizing: SizingPolicy,
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Partial cost override; `None` fields keep the default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostOverride {
    pub commission_bps: Option<i64>,
    pub slippage_bps: Option<i64>,
    pub min_fee_micros: Option<i64>,
}

/// Partial risk override; `None` fields keep the default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskOverride {
    pub max_leverage_bps: Option<i64>,
    pub max_position_notional_micros: Option<i64>,
    pub max_drawdown_bps: Option<i64>,
    pub kill_switch_dd_bps: Option<i64>,
}

/// Partial sizing override; `None` fields keep the default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingOverride {
    pub target_vol_bps: Option<i64>,
    pub max_gross_exposure_bps: Option<i64>,
    pub per_trade_risk_bps: Option<i64>,
}

/// The override bundle a strategy may carry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverrides {
    pub cost: Option<CostOverride>,
    pub risk: Option<RiskOverride>,
    pub sizing: Option<SizingOverride>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An override field whose value is incompatible with its policy field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyError {
    pub field: &'static str,
    pub detail: String,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid policy override '{}': {}", self.field, self.detail)
    }
}

impl std::error::Error for PolicyError {}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

fn pick(default: i64, over: Option<i64>) -> i64 {
    over.unwrap_or(default)
}

/// Merge overrides onto defaults, field-wise. Pure: `defaults` is cloned,
/// never mutated.
pub fn merge(defaults: &PolicySet, overrides: Option<&PolicyOverrides>) -> PolicySet {
    let overrides = match overrides {
        None => return defaults.clone(),
        Some(o) => o,
    };

    let cost = match &overrides.cost {
        None => defaults.cost.clone(),
        Some(c) => CostPolicy {
            commission_bps: pick(defaults.cost.commission_bps, c.commission_bps),
            slippage_bps: pick(defaults.cost.slippage_bps, c.slippage_bps),
            min_fee_micros: pick(defaults.cost.min_fee_micros, c.min_fee_micros),
        },
    };

    let risk = match &overrides.risk {
        None => defaults.risk.clone(),
        Some(r) => RiskPolicy {
            max_leverage_bps: pick(defaults.risk.max_leverage_bps, r.max_leverage_bps),
            max_position_notional_micros: pick(
                defaults.risk.max_position_notional_micros,
                r.max_position_notional_micros,
            ),
            max_drawdown_bps: pick(defaults.risk.max_drawdown_bps, r.max_drawdown_bps),
            kill_switch_dd_bps: pick(defaults.risk.kill_switch_dd_bps, r.kill_switch_dd_bps),
        },
    };

    let sizing = match &overrides.sizing {
        None => defaults.sizing.clone(),
        Some(s) => SizingPolicy {
            target_vol_bps: pick(defaults.sizing.target_vol_bps, s.target_vol_bps),
            max_gross_exposure_bps: pick(
                defaults.sizing.max_gross_exposure_bps,
                s.max_gross_exposure_bps,
            ),
            per_trade_risk_bps: pick(defaults.sizing.per_trade_risk_bps, s.per_trade_risk_bps),
        },
    };

    PolicySet { cost, risk, sizing }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn check_non_negative(field: &'static str, value: Option<i64>) -> Result<(), PolicyError> {
    match value {
        Some(v) if v < 0 => Err(PolicyError {
            field,
            detail: format!("must be >= 0, got {v}"),
        }),
        _ => Ok(()),
    }
}

fn check_positive(field: &'static str, value: Option<i64>) -> Result<(), PolicyError> {
    match value {
        Some(v) if v <= 0 => Err(PolicyError {
            field,
            detail: format!("must be > 0, got {v}"),
        }),
        _ => Ok(()),
    }
}

/// Validate override values before merging.
///
/// Field types are fixed at compile time, so the residual "incompatible
/// value" class is range validity: fees and ratios must be non-negative,
/// limits strictly positive.
pub fn validate_overrides(overrides: &PolicyOverrides) -> Result<(), PolicyError> {
    if let Some(c) = &overrides.cost {
        check_non_negative("cost.commission_bps", c.commission_bps)?;
        check_non_negative("cost.slippage_bps", c.slippage_bps)?;
        check_non_negative("cost.min_fee_micros", c.min_fee_micros)?;
    }
    if let Some(r) = &overrides.risk {
        check_positive("risk.max_leverage_bps", r.max_leverage_bps)?;
        check_positive("risk.max_position_notional_micros", r.max_position_notional_micros)?;
        check_positive("risk.max_drawdown_bps", r.max_drawdown_bps)?;
        check_positive("risk.kill_switch_dd_bps", r.kill_switch_dd_bps)?;
    }
    if let Some(s) = &overrides.sizing {
        check_positive("sizing.target_vol_bps", s.target_vol_bps)?;
        check_positive("sizing.max_gross_exposure_bps", s.max_gross_exposure_bps)?;
        check_positive("sizing.per_trade_risk_bps", s.per_trade_risk_bps)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
