//! Per-bar signal engine over one symbol or a small fixed universe.

use std::path::Path;

use mbr_core::ports::{Broker, Clock, Notifier, StateStore};
use mbr_core::types::Bar;
use mbr_policy::PolicySet;
use mbr_strategy::Strategy;

use crate::runtime::{EngineConfig, RunReport, RuntimeCore, StopFlag};
use crate::sizing::size_signal;
use crate::EngineError;

// ---------------------------------------------------------------------------
// SingleStrategyEngine
// ---------------------------------------------------------------------------

/// Drives one signal strategy: for each closed bar, in chronological
/// order — mark, collect intents, size, risk-gate, submit, apply fills,
/// update portfolio and risk, emit artifacts.
pub struct SingleStrategyEngine<B: Broker> {
    core: RuntimeCore<B>,
    strategy: Box<dyn Strategy>,
    universe: Vec<String>,
}

impl<B: Broker> SingleStrategyEngine<B> {
    pub fn new(
        cfg: EngineConfig,
        policies: PolicySet,
        strategy_name: impl Into<String>,
        universe: Vec<String>,
        strategy: Box<dyn Strategy>,
        broker: B,
        clock: Box<dyn Clock>,
    ) -> Self {
        let strategy_name = strategy_name.into();
        let core = RuntimeCore::new(
            cfg,
            policies,
            strategy_name,
            universe.clone(),
            broker,
            clock,
            Box::new(mbr_core::ports::NullNotifier),
            None,
            StopFlag::new(),
        );
        Self {
            core,
            strategy,
            universe,
        }
    }

    /// Replace the default null notifier.
    pub fn set_notifier(&mut self, notifier: Box<dyn Notifier>) {
        self.core.set_notifier(notifier);
    }

    /// Attach a state store for restart safety.
    pub fn set_state_store(&mut self, store: Box<dyn StateStore>) {
        self.core.set_state_store(store);
    }

    /// Handle for requesting a cooperative stop between bars.
    pub fn stop_flag(&self) -> StopFlag {
        self.core.stop.clone()
    }

    /// Reset the kill switch (explicit external command).
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

            let signals = self.strategy.on_bar(bar);
            let mut seq: u64 = 0;
            for signal in signals {
                if !self.universe.iter().any(|s| s == &signal.symbol) {
                    tracing::warn!(symbol = %signal.symbol, "signal outside declared universe; dropped");
                    continue;
                }
                let close = match self.core.marks.get(&signal.symbol) {
                    Some(c) => *c,
                    None => continue,
                };
                let request = match size_signal(
                    &signal,
                    &self.core.portfolio,
                    &self.core.policies.sizing,
                    close,
                    seq,
                ) {
                    Some(r) => r,
                    None => continue,
                };
                seq += 1;
                self.core.submit_intent(&request)?;
                self.forward_fills();
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
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use mbr_broker_paper::PaperBroker;
    use mbr_core::ports::SimClock;
    use mbr_core::types::{Fill, Signal, SignalAction, Timeframe};
    use mbr_core::MICROS_SCALE;
    use mbr_policy::{CostPolicy, PolicySet};

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, min, 0).unwrap()
    }

    fn bar(min: u32, close_units: i64) -> Bar {
        Bar {
            ts: ts(min),
            symbol: "BTC-USD".to_string(),
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

    /// Close-over-close test strategy: long when close > previous close,
    /// flat otherwise.
    struct CloseOverClose {
        prev_close: Option<i64>,
        fills_seen: usize,
    }

    impl CloseOverClose {
        fn new() -> Self {
            Self {
                prev_close: None,
                fills_seen: 0,
            }
        }
    }

    impl Strategy for CloseOverClose {
        fn on_bar(&mut self, bar: &Bar) -> Vec<Signal> {
            let action = match self.prev_close {
                Some(prev) if bar.close_micros > prev => SignalAction::EnterLong,
                Some(_) => SignalAction::ExitLong,
                None => SignalAction::Hold,
            };
            self.prev_close = Some(bar.close_micros);
            vec![Signal::new(bar.ts, bar.symbol.clone(), action, 10_000, "coc")]
        }

        fn on_fill(&mut self, _fill: &Fill) {
            self.fills_seen += 1;
        }
    }

    fn engine() -> SingleStrategyEngine<PaperBroker> {
        let policies = PolicySet {
            cost: CostPolicy {
                commission_bps: 10,
                slippage_bps: 5,
                min_fee_micros: 0,
            },
            ..PolicySet::default()
        };
        let broker = PaperBroker::new(policies.cost.clone(), ts(0));
        SingleStrategyEngine::new(
            EngineConfig::backtest(10_000 * MICROS_SCALE),
            policies,
            "coc",
            vec!["BTC-USD".to_string()],
            Box::new(CloseOverClose::new()),
            broker,
            Box::new(SimClock::new(ts(0))),
        )
    }

    fn five_bars() -> Vec<Bar> {
        // closes 100, 101, 102, 101, 100 starting at 00:00
        [100, 101, 102, 101, 100]
            .iter()
            .enumerate()
            .map(|(i, c)| bar(i as u32, *c))
            .collect()
    }

    #[test]
    fn close_over_close_trades_enter_and_exit() {
        let mut e = engine();
        let report = e.run(&five_bars(), None).unwrap();

        // Bar 2 enters (101 > 100); bar 3 enter is a no-op while long;
        // bar 4 exits (101 < 102); bar 5 exit is a no-op while flat.
        assert_eq!(report.bars_processed, 5);
        assert_eq!(report.orders_submitted, 2);
        assert_eq!(report.fills_applied, 2);
        assert_eq!(report.manifest.streams["orders"].count, 2);
        assert_eq!(report.manifest.streams["fills"].count, 2);
        assert!(!report.kill_switch_tripped);
    }

    #[test]
    fn two_runs_produce_identical_manifests() {
        let r1 = engine().run(&five_bars(), None).unwrap();
        let r2 = engine().run(&five_bars(), None).unwrap();
        assert_eq!(r1.manifest, r2.manifest);
        assert_eq!(
            serde_json::to_string(&r1.manifest).unwrap(),
            serde_json::to_string(&r2.manifest).unwrap()
        );
    }

    #[test]
    fn open_bar_is_a_sequence_error() {
        let mut e = engine();
        let mut bars = five_bars();
        bars[2].is_closed = false;
        let err = e.run(&bars, None).unwrap_err();
        assert!(matches!(err, EngineError::BarSequence { .. }));
    }

    #[test]
    fn out_of_order_bars_are_a_sequence_error() {
        let mut e = engine();
        let bars = vec![bar(2, 100), bar(1, 101)];
        let err = e.run(&bars, None).unwrap_err();
        assert!(matches!(err, EngineError::BarSequence { .. }));
    }

    #[test]
    fn fatal_error_is_recorded_in_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine();
        let mut bars = five_bars();
        bars[2].is_closed = false;

        e.run(&bars, Some(dir.path())).unwrap_err();

        let manifest = std::fs::read_to_string(dir.path().join("manifest.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        let errors = parsed["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].as_str().unwrap().starts_with("BarSequence:"));
    }

    #[test]
    fn stop_flag_halts_between_bars() {
        let mut e = engine();
        e.stop_flag().request_stop();
        let report = e.run(&five_bars(), None).unwrap();
        assert_eq!(report.bars_processed, 0);
    }

    #[test]
    fn snapshots_emitted_per_bar() {
        let mut e = engine();
        let report = e.run(&five_bars(), None).unwrap();
        // One per bar plus one at finalize.
        assert_eq!(report.manifest.streams["pnl"].count, 6);
        assert_eq!(report.manifest.streams["positions"].count, 6);
    }

    #[test]
    fn equity_reflects_costs_after_round_trip() {
        let mut e = engine();
        let report = e.run(&five_bars(), None).unwrap();
        // Entry at 101 with slippage and commission, exit at 101 the
        // same way: the round trip must cost money.
        assert!(report.final_equity_micros < 10_000 * MICROS_SCALE);
    }
}
