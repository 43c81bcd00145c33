//! Target-weight rebalancing engine.
//!
//! On each rebalance trigger the strategy returns target weights; the
//! engine computes current weights from marked positions and cash,
//! reduces the difference to delta notionals, applies the turnover cap
//! proportionally, and emits delta orders in deterministic order —
//! sells ascending by symbol first (to free buying power), then buys
//! ascending by symbol. Orders flow through the same risk gate, state
//! machine, and artifact discipline as the signal engine.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};

use mbr_core::fixedpoint::{apply_bps, MICROS_SCALE};
use mbr_core::ports::{Broker, Clock, Notifier, StateStore};
use mbr_core::types::{Bar, OrderRequest, OrderType, Side, TargetWeights};
use mbr_policy::PolicySet;
use mbr_portfolio::position_notional_micros;
use mbr_strategy::Strategy;

use crate::runtime::{EngineConfig, RunReport, RuntimeCore, StopFlag};
use crate::EngineError;

// ---------------------------------------------------------------------------
// RebalancingEngine
// ---------------------------------------------------------------------------

/// Drives a rebalancing strategy over a fixed universe.
pub struct RebalancingEngine<B: Broker> {
    core: RuntimeCore<B>,
    strategy: Box<dyn Strategy>,
}

impl<B: Broker> RebalancingEngine<B> {
    pub fn new(
        cfg: EngineConfig,
        policies: PolicySet,
        strategy_name: impl Into<String>,
        universe: Vec<String>,
        strategy: Box<dyn Strategy>,
        broker: B,
        clock: Box<dyn Clock>,
    ) -> Self {
        let core = RuntimeCore::new(
            cfg,
            policies,
            strategy_name.into(),
            universe,
            broker,
            clock,
            Box::new(mbr_core::ports::NullNotifier),
            None,
            StopFlag::new(),
        );
        Self { core, strategy }
    }

    pub fn set_notifier(&mut self, notifier: Box<dyn Notifier>) {
        self.core.set_notifier(notifier);
    }

    pub fn set_state_store(&mut self, store: Box<dyn StateStore>) {
        self.core.set_state_store(store);
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.core.stop.clone()
    }

    pub fn reset_kill_switch(&mut self) {
        self.core.risk.reset_kill_switch();
    }

    /// Run over a closed, `(ts, symbol)`-ordered bar sequence.
    ///
    /// On a fatal error the failure class is recorded in the manifest
    /// and any artifacts so far are materialized before the error
    /// surfaces.
    pub fn run(&mut self, bars: &[Bar], run_dir: Option<&Path>) -> Result<RunReport, EngineError> {
        match self.run_inner(bars, run_dir) {
            Ok(report) => Ok(report),
            Err(e) => {
                self.core.record_failure(&e, run_dir);
                Err(e)
            }
        }
    }

    fn run_inner(
        &mut self,
        bars: &[Bar],
        run_dir: Option<&Path>,
    ) -> Result<RunReport, EngineError> {
        for bar in bars {
            if self.core.stop.is_stopped() {
                tracing::info!("cooperative stop requested; ending run");
                break;
            }
            self.core.begin_bar(bar)?;
            self.forward_fills();

            // Per-bar strategy hook still runs (history updates); its
            // signals are ignored by this engine variant.
            let _ = self.strategy.on_bar(bar);

            if let Some(weights) = self.strategy.target_weights(bar.ts, &self.core.portfolio) {
                if weights.rebalance {
                    self.rebalance(&weights, bar.ts)?;
                }
            }

            self.core.end_bar()?;
        }

        self.strategy.finalize();
        self.core.finalize(run_dir)
    }

    fn forward_fills(&mut self) {
        for fill in self.core.take_new_fills() {
            self.strategy.on_fill(&fill);
        }
    }

    // -----------------------------------------------------------------------
    // Rebalance batch
    // -----------------------------------------------------------------------

    fn rebalance(
        &mut self,
        weights: &TargetWeights,
        ts: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let total_bps = weights.total_bps();
        if total_bps > 10_000 {
            self.core.reject_batch(
                "weight_sum_exceeded",
                format!("target weights sum to {total_bps}bps (> 10000bps); batch skipped"),
            )?;
            return Ok(());
        }

        let deltas = self.compute_deltas(weights);
        let capped = apply_turnover_cap(
            deltas,
            self.core.portfolio.equity_micros,
            self.core.policies.sizing.max_gross_exposure_bps,
        );

        // Sells first, each side ascending by symbol (BTreeMap order).
        let mut seq: u64 = 0;
        for pass_sells in [true, false] {
            for (symbol, delta) in &capped {
                let is_sell = *delta < 0;
                if is_sell != pass_sells {
                    continue;
                }
                let mark = match self.core.marks.get(symbol) {
                    Some(m) if *m > 0 => *m,
                    _ => continue,
                };
                let qty_micros =
                    ((delta.unsigned_abs() as i128) * (MICROS_SCALE as i128) / (mark as i128)) as i64;
                if qty_micros == 0 {
                    continue;
                }
                let side = if is_sell { Side::Sell } else { Side::Buy };
                let request = OrderRequest {
                    idempotency_key: OrderRequest::canonical_key(
                        &self.core.strategy_name,
                        symbol,
                        side,
                        ts,
                        seq,
                    ),
                    created_at: ts,
                    symbol: symbol.clone(),
                    side,
                    order_type: OrderType::Market,
                    qty_micros,
                    limit_price_micros: None,
                    stop_price_micros: None,
                    strategy_name: self.core.strategy_name.clone(),
                    metadata: BTreeMap::new(),
                };
                seq += 1;
                self.core.submit_intent(&request)?;
                self.forward_fills();
            }
        }
        Ok(())
    }

    /// Delta notional per symbol: `target weight × equity − marked
    /// position value`, over the union of targeted and held symbols.
    fn compute_deltas(&self, weights: &TargetWeights) -> BTreeMap<String, i64> {
        let equity = self.core.portfolio.equity_micros;
        let mut symbols: BTreeSet<String> = weights.weights_bps.keys().cloned().collect();
        symbols.extend(self.core.portfolio.positions.keys().cloned());

        let mut deltas = BTreeMap::new();
        for symbol in symbols {
            let target_bps = weights.weights_bps.get(&symbol).copied().unwrap_or(0);
            let target_notional = apply_bps(equity, target_bps).unwrap_or(0);
            let current_notional = position_notional_micros(&self.core.portfolio, &symbol);
            let delta = target_notional - current_notional;
            if delta != 0 {
                deltas.insert(symbol, delta);
            }
        }
        deltas
    }
}

/// Scale deltas down proportionally when gross traded notional exceeds
/// the turnover cap (`max_gross_exposure × equity`).
fn apply_turnover_cap(
    deltas: BTreeMap<String, i64>,
    equity_micros: i64,
    max_gross_exposure_bps: i64,
) -> BTreeMap<String, i64> {
    let gross: i128 = deltas.values().map(|d| (*d as i128).abs()).sum();
    let cap = apply_bps(equity_micros, max_gross_exposure_bps).unwrap_or(i64::MAX) as i128;
    if gross <= cap || gross == 0 {
        return deltas;
    }
    deltas
        .into_iter()
        .map(|(symbol, delta)| (symbol, ((delta as i128) * cap / gross) as i64))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mbr_broker_paper::PaperBroker;
    use mbr_core::ports::SimClock;
    use mbr_core::types::{PortfolioState, Signal, Timeframe};
    use mbr_policy::CostPolicy;

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, min, 0).unwrap()
    }

    fn bar(symbol: &str, min: u32, close_units: i64) -> Bar {
        Bar {
            ts: ts(min),
            symbol: symbol.to_string(),
            open_micros: close_units * MICROS_SCALE,
            high_micros: close_units * MICROS_SCALE,
            low_micros: close_units * MICROS_SCALE,
            close_micros: close_units * MICROS_SCALE,
            volume_micros: MICROS_SCALE,
            timeframe: Timeframe::M1,
            is_closed: true,
            source: None,
        }
    }

    /// Rebalances to fixed weights on the second bar of each symbol pair.
    struct FixedWeights {
        weights_bps: BTreeMap<String, i64>,
        rebalance_at: DateTime<Utc>,
    }

    impl Strategy for FixedWeights {
        fn on_bar(&mut self, _bar: &Bar) -> Vec<Signal> {
            Vec::new()
        }

        fn target_weights(
            &mut self,
            ts: DateTime<Utc>,
            _pf: &PortfolioState,
        ) -> Option<TargetWeights> {
            Some(TargetWeights {
                ts,
                weights_bps: self.weights_bps.clone(),
                rebalance: ts >= self.rebalance_at,
                reason: Some("fixed".to_string()),
            })
        }
    }

    fn two_symbol_engine(weights: &[(&str, i64)], rebalance_min: u32) -> RebalancingEngine<PaperBroker> {
        let policies = PolicySet {
            cost: CostPolicy {
                commission_bps: 0,
                slippage_bps: 0,
                min_fee_micros: 0,
            },
            ..PolicySet::default()
        };
        let strategy = FixedWeights {
            weights_bps: weights
                .iter()
                .map(|(s, w)| (s.to_string(), *w))
                .collect(),
            rebalance_at: ts(rebalance_min),
        };
        RebalancingEngine::new(
            EngineConfig::backtest(10_000 * MICROS_SCALE),
            policies.clone(),
            "fixed",
            vec!["AAA-USD".to_string(), "BBB-USD".to_string()],
            Box::new(strategy),
            PaperBroker::new(policies.cost, ts(0)),
            Box::new(SimClock::new(ts(0))),
        )
    }

    /// Bars for two symbols at each minute, `(ts, symbol)` ordered.
    fn paired_bars(minutes: u32) -> Vec<Bar> {
        let mut out = Vec::new();
        for m in 0..minutes {
            out.push(bar("AAA-USD", m, 100));
            out.push(bar("BBB-USD", m, 50));
        }
        out
    }

    #[test]
    fn rebalances_to_target_weights() {
        let mut e = two_symbol_engine(&[("AAA-USD", 4_000), ("BBB-USD", 4_000)], 1);
        let report = e.run(&paired_bars(3), None).unwrap();

        assert!(report.orders_submitted >= 2);
        // 40% of 10_000 = 4_000 notional per symbol.
        let aaa = position_notional_micros(&e.core.portfolio, "AAA-USD");
        let bbb = position_notional_micros(&e.core.portfolio, "BBB-USD");
        assert_eq!(aaa, 4_000 * MICROS_SCALE);
        assert_eq!(bbb, 4_000 * MICROS_SCALE);
    }

    #[test]
    fn sells_precede_buys_in_a_batch() {
        // First rebalance into AAA only, then swing to BBB only: the
        // second batch must sell AAA before buying BBB.
        struct Swing {
            calls: u32,
        }
        impl Strategy for Swing {
            fn on_bar(&mut self, _bar: &Bar) -> Vec<Signal> {
                Vec::new()
            }
            fn target_weights(
                &mut self,
                ts: DateTime<Utc>,
                _pf: &PortfolioState,
            ) -> Option<TargetWeights> {
                self.calls += 1;
                let mut weights_bps = BTreeMap::new();
                if self.calls <= 2 {
                    weights_bps.insert("AAA-USD".to_string(), 5_000);
                } else {
                    weights_bps.insert("BBB-USD".to_string(), 5_000);
                }
                Some(TargetWeights {
                    ts,
                    weights_bps,
                    rebalance: true,
                    reason: None,
                })
            }
        }

        let policies = PolicySet {
            cost: CostPolicy {
                commission_bps: 0,
                slippage_bps: 0,
                min_fee_micros: 0,
            },
            ..PolicySet::default()
        };
        let mut e = RebalancingEngine::new(
            EngineConfig::backtest(10_000 * MICROS_SCALE),
            policies.clone(),
            "swing",
            vec!["AAA-USD".to_string(), "BBB-USD".to_string()],
            Box::new(Swing { calls: 0 }),
            PaperBroker::new(policies.cost, ts(0)),
            Box::new(SimClock::new(ts(0))),
        );
        let report = e.run(&paired_bars(2), None).unwrap();

        // Orders stream: AAA buy (bar 0 batch), then AAA sell before
        // BBB buy (bar 1 batch).
        assert!(report.orders_submitted >= 3);
        let aaa = position_notional_micros(&e.core.portfolio, "AAA-USD");
        let bbb = position_notional_micros(&e.core.portfolio, "BBB-USD");
        assert_eq!(aaa, 0);
        assert!(bbb > 0);
    }

    #[test]
    fn turnover_cap_scales_proportionally() {
        let mut deltas = BTreeMap::new();
        deltas.insert("AAA-USD".to_string(), 6_000 * MICROS_SCALE);
        deltas.insert("BBB-USD".to_string(), -2_000 * MICROS_SCALE);

        // Cap: 40% of 10_000 equity = 4_000; gross is 8_000 → halve.
        let capped = apply_turnover_cap(deltas, 10_000 * MICROS_SCALE, 4_000);
        assert_eq!(capped["AAA-USD"], 3_000 * MICROS_SCALE);
        assert_eq!(capped["BBB-USD"], -1_000 * MICROS_SCALE);
    }

    #[test]
    fn turnover_cap_noop_under_cap() {
        let mut deltas = BTreeMap::new();
        deltas.insert("AAA-USD".to_string(), 1_000 * MICROS_SCALE);
        let capped = apply_turnover_cap(deltas.clone(), 10_000 * MICROS_SCALE, 10_000);
        assert_eq!(capped, deltas);
    }

    #[test]
    fn weight_sum_above_one_skips_batch() {
        let mut e = two_symbol_engine(&[("AAA-USD", 8_000), ("BBB-USD", 6_000)], 0);
        let report = e.run(&paired_bars(2), None).unwrap();
        assert_eq!(report.orders_submitted, 0);
        assert!(report.manifest.streams["risk_events"].count >= 1);
    }

    #[test]
    fn rebalancing_is_deterministic() {
        let run = || {
            let mut e = two_symbol_engine(&[("AAA-USD", 3_000), ("BBB-USD", 3_000)], 1);
            e.run(&paired_bars(3), None).unwrap().manifest
        };
        assert_eq!(run(), run());
    }
}
