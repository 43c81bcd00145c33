//! mbr-risk
//!
//! Maintains [`RiskState`] incrementally and gates every submission.
//!
//! Pre-trade checks run in a fixed order: kill switch → projected
//! leverage → position notional. The first failure rejects the intent;
//! intent rejection never aborts the run.
//!
//! After each equity update the drawdown is recomputed against the
//! monotonic peak; at `kill_switch_dd` the switch trips: the engine must
//! cancel all non-terminal orders (and optionally flatten), and every
//! later intent is rejected until an explicit external reset.

use std::fmt;

use chrono::{DateTime, Utc};

use mbr_core::fixedpoint::mul_price_qty;
use mbr_core::types::{OrderRequest, PortfolioState, RiskState, Side};
use mbr_policy::RiskPolicy;

// ---------------------------------------------------------------------------
// Pre-trade rejection
// ---------------------------------------------------------------------------

/// Why an intent was rejected before submission.
///
/// These are decisions, not failures: the engine records a `risk_event`
/// and moves on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreTradeReject {
    /// The kill switch is active; all new intents are blocked until reset.
    KillSwitchBlocked,
    /// Projected leverage after the submission would exceed the limit.
    LeverageExceeded { projected_bps: i64, max_bps: i64 },
    /// The position's notional after the submission would exceed the limit.
    NotionalExceeded {
        projected_micros: i64,
        max_micros: i64,
    },
}

impl PreTradeReject {
    /// Stable kind tag used in risk_event artifacts.
    pub fn kind(&self) -> &'static str {
        match self {
            PreTradeReject::KillSwitchBlocked => "kill_switch_block",
            PreTradeReject::LeverageExceeded { .. } => "leverage_exceeded",
            PreTradeReject::NotionalExceeded { .. } => "notional_exceeded",
        }
    }
}

impl fmt::Display for PreTradeReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreTradeReject::KillSwitchBlocked => write!(f, "kill switch active"),
            PreTradeReject::LeverageExceeded {
                projected_bps,
                max_bps,
            } => write!(
                f,
                "projected leverage {projected_bps}bps exceeds max {max_bps}bps"
            ),
            PreTradeReject::NotionalExceeded {
                projected_micros,
                max_micros,
            } => write!(
                f,
                "projected position notional {projected_micros} exceeds max {max_micros}"
            ),
        }
    }
}

/// Emitted when the kill switch trips.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TripReport {
    pub ts: DateTime<Utc>,
    pub threshold_bps: i64,
    pub observed_bps: i64,
    /// Whether positions should be flattened in addition to cancelling
    /// open orders (deployment-time choice).
    pub flatten: bool,
}

// ---------------------------------------------------------------------------
// RiskMonitor
// ---------------------------------------------------------------------------

/// Single owner of [`RiskState`] for a run.
#[derive(Clone, Debug)]
pub struct RiskMonitor {
    policy: RiskPolicy,
    flatten_on_trip: bool,
    state: RiskState,
}

impl RiskMonitor {
    pub fn new(
        ts: DateTime<Utc>,
        policy: RiskPolicy,
        flatten_on_trip: bool,
        initial_equity_micros: i64,
    ) -> Self {
        let state = RiskState {
            ts,
            max_leverage_bps: policy.max_leverage_bps,
            current_leverage_bps: 0,
            max_position_notional_micros: policy.max_position_notional_micros,
            max_drawdown_bps: policy.max_drawdown_bps,
            current_drawdown_bps: 0,
            kill_switch_dd_bps: policy.kill_switch_dd_bps,
            peak_equity_micros: initial_equity_micros,
            breached_rules: Vec::new(),
            kill_switch_active: false,
        };
        Self {
            policy,
            flatten_on_trip,
            state,
        }
    }

    /// Restore from a persisted state (restart safety). The policy still
    /// comes from the composed policy set.
    pub fn from_state(policy: RiskPolicy, flatten_on_trip: bool, state: RiskState) -> Self {
        Self {
            policy,
            flatten_on_trip,
            state,
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn kill_switch_active(&self) -> bool {
        self.state.kill_switch_active
    }

    // -----------------------------------------------------------------------
    // Pre-trade gate
    // -----------------------------------------------------------------------

    /// Evaluate a submission against the merged risk policy.
    ///
    /// Check order: kill switch, projected leverage, position notional.
    pub fn pre_trade_check(
        &self,
        request: &OrderRequest,
        pf: &PortfolioState,
        mark_price_micros: i64,
    ) -> Result<(), PreTradeReject> {
        if self.state.kill_switch_active {
            return Err(PreTradeReject::KillSwitchBlocked);
        }

        let old_qty = pf.position_qty_micros(&request.symbol);
        let signed = match request.side {
            Side::Buy => request.qty_micros,
            Side::Sell => -request.qty_micros,
        };
        let new_qty = old_qty + signed;

        let old_notional = mul_price_qty(old_qty, mark_price_micros).unwrap_or(i64::MAX);
        let new_notional = mul_price_qty(new_qty, mark_price_micros).unwrap_or(i64::MAX);

        let projected_gross = pf
            .gross_exposure_micros
            .saturating_sub(old_notional.abs())
            .saturating_add(new_notional.abs());

        let projected_leverage_bps = leverage_bps(projected_gross, pf.equity_micros);
        if projected_leverage_bps > self.policy.max_leverage_bps {
            return Err(PreTradeReject::LeverageExceeded {
                projected_bps: projected_leverage_bps,
                max_bps: self.policy.max_leverage_bps,
            });
        }

        if new_notional.abs() > self.policy.max_position_notional_micros {
            return Err(PreTradeReject::NotionalExceeded {
                projected_micros: new_notional.abs(),
                max_micros: self.policy.max_position_notional_micros,
            });
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // State maintenance
    // -----------------------------------------------------------------------

    /// Update risk state after a fill was applied to the portfolio.
    /// Returns a trip report when this update crossed the kill-switch
    /// threshold.
    pub fn on_fill(&mut self, pf: &PortfolioState) -> Option<TripReport> {
        self.update_from_portfolio(pf)
    }

    /// Update risk state after the per-bar mark-to-close.
    pub fn on_bar(&mut self, pf: &PortfolioState) -> Option<TripReport> {
        self.update_from_portfolio(pf)
    }

    fn update_from_portfolio(&mut self, pf: &PortfolioState) -> Option<TripReport> {
        self.state.ts = pf.ts;

        // Peak first, then drawdown against the (possibly new) peak.
        if pf.equity_micros > self.state.peak_equity_micros {
            self.state.peak_equity_micros = pf.equity_micros;
        }
        self.state.current_drawdown_bps =
            drawdown_bps(self.state.peak_equity_micros, pf.equity_micros);
        self.state.current_leverage_bps = leverage_bps(pf.gross_exposure_micros, pf.equity_micros);

        if self.state.current_drawdown_bps >= self.policy.max_drawdown_bps {
            self.record_breach("max_drawdown");
        }

        if self.state.current_drawdown_bps >= self.policy.kill_switch_dd_bps
            && !self.state.kill_switch_active
        {
            self.state.kill_switch_active = true;
            self.record_breach("kill_switch_dd");
            tracing::error!(
                observed_bps = self.state.current_drawdown_bps,
                threshold_bps = self.policy.kill_switch_dd_bps,
                "kill switch tripped"
            );
            return Some(TripReport {
                ts: pf.ts,
                threshold_bps: self.policy.kill_switch_dd_bps,
                observed_bps: self.state.current_drawdown_bps,
                flatten: self.flatten_on_trip,
            });
        }
        None
    }

    fn record_breach(&mut self, rule: &str) {
        if !self.state.breached_rules.iter().any(|r| r == rule) {
            self.state.breached_rules.push(rule.to_string());
        }
    }

    /// Explicit external reset. Nothing else re-enables trading.
    pub fn reset_kill_switch(&mut self) {
        self.state.kill_switch_active = false;
        tracing::warn!("kill switch reset by external command");
    }
}

// ---------------------------------------------------------------------------
// Ratio helpers
// ---------------------------------------------------------------------------

/// Drawdown from peak in bps; 0 when at or above the peak.
fn drawdown_bps(peak_micros: i64, equity_micros: i64) -> i64 {
    if peak_micros <= 0 || equity_micros >= peak_micros {
        return 0;
    }
    let drop = peak_micros as i128 - equity_micros as i128;
    (drop * 10_000 / peak_micros as i128) as i64
}

/// Gross exposure over equity in bps; saturates when equity is depleted.
fn leverage_bps(gross_micros: i64, equity_micros: i64) -> i64 {
    if equity_micros <= 0 {
        return if gross_micros > 0 { i64::MAX } else { 0 };
    }
    ((gross_micros as i128) * 10_000 / (equity_micros as i128)) as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mbr_core::types::{OrderType, Position};
    use mbr_core::MICROS_SCALE;

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, min, 0).unwrap()
    }

    fn monitor(equity_units: i64) -> RiskMonitor {
        RiskMonitor::new(ts(0), RiskPolicy::default(), false, equity_units * MICROS_SCALE)
    }

    fn portfolio(cash_units: i64) -> PortfolioState {
        PortfolioState::new(ts(0), cash_units * MICROS_SCALE)
    }

    fn request(side: Side, qty_units: i64) -> OrderRequest {
        OrderRequest {
            idempotency_key: "k".to_string(),
            created_at: ts(0),
            symbol: "BTC-USD".to_string(),
            side,
            order_type: OrderType::Market,
            qty_micros: qty_units * MICROS_SCALE,
            limit_price_micros: None,
            stop_price_micros: None,
            strategy_name: "s".to_string(),
            metadata: Default::default(),
        }
    }

    fn with_position(mut pf: PortfolioState, symbol: &str, qty_units: i64, price_units: i64) -> PortfolioState {
        pf.positions.insert(
            symbol.to_string(),
            Position {
                qty_micros: qty_units * MICROS_SCALE,
                avg_price_micros: price_units * MICROS_SCALE,
                mark_price_micros: price_units * MICROS_SCALE,
                unrealized_pnl_micros: 0,
                realized_pnl_micros: 0,
            },
        );
        let notional = qty_units.abs() * price_units * MICROS_SCALE;
        pf.gross_exposure_micros = notional;
        pf.net_exposure_micros = qty_units.signum() * notional;
        pf
    }

    // --- drawdown math ---

    #[test]
    fn drawdown_is_zero_at_peak() {
        assert_eq!(drawdown_bps(100, 100), 0);
        assert_eq!(drawdown_bps(100, 120), 0);
    }

    #[test]
    fn drawdown_matches_ratio() {
        // 100_000 -> 89_500 = 10.5% = 1050 bps
        assert_eq!(
            drawdown_bps(100_000 * MICROS_SCALE, 89_500 * MICROS_SCALE),
            1_050
        );
    }

    // --- pre-trade gate ---

    #[test]
    fn within_limits_passes() {
        let m = monitor(10_000);
        let pf = portfolio(10_000);
        assert!(m
            .pre_trade_check(&request(Side::Buy, 1), &pf, 100 * MICROS_SCALE)
            .is_ok());
    }

    #[test]
    fn kill_switch_blocks_first() {
        let mut m = monitor(10_000);
        m.state.kill_switch_active = true;
        let pf = portfolio(10_000);
        let err = m
            .pre_trade_check(&request(Side::Buy, 1), &pf, 100 * MICROS_SCALE)
            .unwrap_err();
        assert_eq!(err, PreTradeReject::KillSwitchBlocked);
        assert_eq!(err.kind(), "kill_switch_block");
    }

    #[test]
    fn leverage_limit_rejects() {
        // Equity 10_000, 1x max leverage: buying 150 units at 100 = 15_000
        // notional projects 1.5x.
        let m = monitor(10_000);
        let pf = portfolio(10_000);
        let err = m
            .pre_trade_check(&request(Side::Buy, 150), &pf, 100 * MICROS_SCALE)
            .unwrap_err();
        match err {
            PreTradeReject::LeverageExceeded {
                projected_bps,
                max_bps,
            } => {
                assert_eq!(projected_bps, 15_000);
                assert_eq!(max_bps, 10_000);
            }
            other => panic!("expected leverage reject, got {other:?}"),
        }
    }

    #[test]
    fn risk_reducing_sell_passes_leverage() {
        // Long 90 units at 100 (9_000 gross on 10_000 equity). Selling
        // reduces exposure and must pass.
        let m = monitor(10_000);
        let pf = with_position(portfolio(1_000), "BTC-USD", 90, 100);
        assert!(m
            .pre_trade_check(&request(Side::Sell, 50), &pf, 100 * MICROS_SCALE)
            .is_ok());
    }

    #[test]
    fn notional_limit_rejects() {
        let policy = RiskPolicy {
            max_position_notional_micros: 500 * MICROS_SCALE,
            ..RiskPolicy::default()
        };
        let m = RiskMonitor::new(ts(0), policy, false, 10_000 * MICROS_SCALE);
        let pf = portfolio(10_000);
        let err = m
            .pre_trade_check(&request(Side::Buy, 6), &pf, 100 * MICROS_SCALE)
            .unwrap_err();
        assert!(matches!(err, PreTradeReject::NotionalExceeded { .. }));
    }

    // --- kill switch ---

    #[test]
    fn trips_at_threshold_with_observed_value() {
        let policy = RiskPolicy {
            kill_switch_dd_bps: 1_000,
            ..RiskPolicy::default()
        };
        let mut m = RiskMonitor::new(ts(0), policy, false, 100_000 * MICROS_SCALE);

        let mut pf = portfolio(100_000);
        pf.equity_micros = 89_500 * MICROS_SCALE;
        pf.ts = ts(5);

        let report = m.on_fill(&pf).expect("must trip at 10.5% vs 10%");
        assert_eq!(report.threshold_bps, 1_000);
        assert_eq!(report.observed_bps, 1_050);
        assert!(!report.flatten);
        assert!(m.kill_switch_active());
        assert!(m.state().breached_rules.contains(&"kill_switch_dd".to_string()));
    }

    #[test]
    fn trips_only_once() {
        let policy = RiskPolicy {
            kill_switch_dd_bps: 1_000,
            ..RiskPolicy::default()
        };
        let mut m = RiskMonitor::new(ts(0), policy, false, 100_000 * MICROS_SCALE);
        let mut pf = portfolio(100_000);
        pf.equity_micros = 85_000 * MICROS_SCALE;

        assert!(m.on_fill(&pf).is_some());
        assert!(m.on_fill(&pf).is_none(), "second update must not re-trip");
    }

    #[test]
    fn no_trip_below_threshold() {
        let policy = RiskPolicy {
            kill_switch_dd_bps: 1_000,
            ..RiskPolicy::default()
        };
        let mut m = RiskMonitor::new(ts(0), policy, false, 100_000 * MICROS_SCALE);
        let mut pf = portfolio(100_000);
        pf.equity_micros = 91_000 * MICROS_SCALE; // 9% drawdown
        assert!(m.on_fill(&pf).is_none());
        assert!(!m.kill_switch_active());
    }

    #[test]
    fn flatten_choice_propagates() {
        let policy = RiskPolicy {
            kill_switch_dd_bps: 100,
            ..RiskPolicy::default()
        };
        let mut m = RiskMonitor::new(ts(0), policy, true, 100_000 * MICROS_SCALE);
        let mut pf = portfolio(100_000);
        pf.equity_micros = 90_000 * MICROS_SCALE;
        assert!(m.on_fill(&pf).unwrap().flatten);
    }

    #[test]
    fn peak_is_monotonic_and_drawdown_resets_at_new_peak() {
        let mut m = monitor(10_000);
        let mut pf = portfolio(10_000);

        pf.equity_micros = 12_000 * MICROS_SCALE;
        m.on_bar(&pf);
        assert_eq!(m.state().peak_equity_micros, 12_000 * MICROS_SCALE);

        pf.equity_micros = 11_400 * MICROS_SCALE; // 5% off the new peak
        m.on_bar(&pf);
        assert_eq!(m.state().current_drawdown_bps, 500);

        pf.equity_micros = 13_000 * MICROS_SCALE;
        m.on_bar(&pf);
        assert_eq!(m.state().current_drawdown_bps, 0);
        assert_eq!(m.state().peak_equity_micros, 13_000 * MICROS_SCALE);
    }

    #[test]
    fn drawdown_never_negative() {
        let mut m = monitor(10_000);
        let mut pf = portfolio(10_000);
        pf.equity_micros = 50_000 * MICROS_SCALE;
        m.on_bar(&pf);
        assert_eq!(m.state().current_drawdown_bps, 0);
    }

    #[test]
    fn reset_requires_external_command() {
        let policy = RiskPolicy {
            kill_switch_dd_bps: 100,
            ..RiskPolicy::default()
        };
        let mut m = RiskMonitor::new(ts(0), policy, false, 100_000 * MICROS_SCALE);
        let mut pf = portfolio(100_000);
        pf.equity_micros = 90_000 * MICROS_SCALE;
        m.on_fill(&pf);
        assert!(m.kill_switch_active());

        // Equity recovery alone does not reset.
        pf.equity_micros = 100_000 * MICROS_SCALE;
        m.on_bar(&pf);
        assert!(m.kill_switch_active());

        m.reset_kill_switch();
        assert!(!m.kill_switch_active());
        let pf2 = portfolio(100_000);
        assert!(m
            .pre_trade_check(&request(Side::Buy, 1), &pf2, 100 * MICROS_SCALE)
            .is_ok());
    }
}
