//! Kill-switch trip: a drawdown through the threshold activates the
//! switch, cancels open orders, optionally flattens, records the trip
//! with threshold and observed values, and blocks every later intent
//! until an explicit reset.

use chrono::{DateTime, TimeZone, Utc};

use mbr_broker_paper::PaperBroker;
use mbr_core::ports::SimClock;
use mbr_core::types::{Bar, Fill, PortfolioState, Side, Signal, SignalAction};
use mbr_core::MICROS_SCALE;
use mbr_engine::{EngineConfig, RunMode, SingleStrategyEngine};
use mbr_policy::{CostPolicy, PolicySet, RiskPolicy, SizingPolicy};
use mbr_portfolio::apply_fill;
use mbr_risk::RiskMonitor;
use mbr_strategy::Strategy;
use mbr_testkit::minute_bars;
use uuid::Uuid;

fn ts(min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, min, 0).unwrap()
}

fn fill(side: Side, qty_units: i64, price_micros: i64, minute: u32) -> Fill {
    Fill {
        fill_id: Uuid::new_v4(),
        order_id: Uuid::new_v4(),
        ts: ts(minute),
        symbol: "BTC-USD".to_string(),
        side,
        qty_micros: qty_units * MICROS_SCALE,
        price_micros,
        commission_micros: 0,
        slippage_bps: 0,
        venue_fill_id: None,
        metadata: Default::default(),
    }
}

#[test]
fn fills_through_threshold_trip_with_observed_drawdown() {
    // kill_switch_dd = 10%; equity walks 100_000 -> 89_500 (10.5%).
    let policy = RiskPolicy {
        kill_switch_dd_bps: 1_000,
        ..RiskPolicy::default()
    };
    let mut monitor = RiskMonitor::new(ts(0), policy, false, 100_000 * MICROS_SCALE);
    let mut pf = PortfolioState::new(ts(0), 100_000 * MICROS_SCALE);

    apply_fill(&mut pf, &fill(Side::Buy, 200, 100 * MICROS_SCALE, 1));
    assert!(monitor.on_fill(&pf).is_none(), "no drawdown yet");

    // Sell 200 @ 47.50: realized loss 10_500, equity 89_500.
    apply_fill(&mut pf, &fill(Side::Sell, 200, 47_500_000, 2));
    let report = monitor.on_fill(&pf).expect("10.5% >= 10% must trip");

    assert_eq!(pf.equity_micros, 89_500 * MICROS_SCALE);
    assert_eq!(report.threshold_bps, 1_000);
    assert_eq!(report.observed_bps, 1_050);
    assert!(monitor.kill_switch_active());
}

/// Enters long with full equity whenever flat; price collapse then
/// drives the drawdown through the switch.
struct FullSizeLong;

impl Strategy for FullSizeLong {
    fn on_bar(&mut self, bar: &Bar) -> Vec<Signal> {
        vec![Signal::new(
            bar.ts,
            bar.symbol.clone(),
            SignalAction::EnterLong,
            10_000,
            "full_long",
        )]
    }
}

fn crash_engine(flatten_on_trip: bool) -> SingleStrategyEngine<PaperBroker> {
    let policies = PolicySet {
        cost: CostPolicy {
            commission_bps: 0,
            slippage_bps: 0,
            min_fee_micros: 0,
        },
        risk: RiskPolicy {
            kill_switch_dd_bps: 1_000,
            ..RiskPolicy::default()
        },
        sizing: SizingPolicy {
            per_trade_risk_bps: 10_000,
            ..SizingPolicy::default()
        },
    };
    let cfg = EngineConfig {
        mode: RunMode::Backtest,
        initial_cash_micros: 10_000 * MICROS_SCALE,
        flatten_on_trip,
        cooldown_secs: 60,
        port_timeout_secs: 30,
    };
    let broker = PaperBroker::new(policies.cost.clone(), ts(0));
    SingleStrategyEngine::new(
        cfg,
        policies,
        "full_long",
        vec!["BTC-USD".to_string()],
        Box::new(FullSizeLong),
        broker,
        Box::new(SimClock::new(ts(0))),
    )
}

#[test]
fn engine_trip_blocks_later_intents_and_records_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = crash_engine(true);
    // Full-equity entry at 100, then a 20% collapse, then flat bars in
    // which the strategy keeps trying to re-enter.
    let bars = minute_bars("BTC-USD", ts(0), &[100, 80, 80, 80]);
    let report = engine.run(&bars, Some(dir.path())).unwrap();

    assert!(report.kill_switch_tripped);
    assert!(report.intents_rejected >= 1, "re-entries must be blocked");

    let risk_lines: Vec<serde_json::Value> =
        std::fs::read_to_string(dir.path().join("risk_events.jsonl"))
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

    let tripped: Vec<&serde_json::Value> = risk_lines
        .iter()
        .filter(|l| l["kind"] == "kill_switch_tripped")
        .collect();
    assert_eq!(tripped.len(), 1, "the switch trips exactly once");
    assert_eq!(tripped[0]["threshold_bps"], 1_000);
    assert_eq!(tripped[0]["observed_bps"], 2_000);

    assert!(
        risk_lines.iter().any(|l| l["kind"] == "kill_switch_block"),
        "later intents surface as kill_switch_block"
    );
}

#[test]
fn flatten_on_trip_closes_the_position() {
    let mut engine = crash_engine(true);
    let bars = minute_bars("BTC-USD", ts(0), &[100, 80, 80]);
    let report = engine.run(&bars, None).unwrap();

    assert!(report.kill_switch_tripped);
    // Everything is back in cash after the flatten sell at 80.
    assert_eq!(report.final_equity_micros, 8_000 * MICROS_SCALE);
}

#[test]
fn cancel_only_trip_keeps_the_position() {
    let mut engine = crash_engine(false);
    let bars = minute_bars("BTC-USD", ts(0), &[100, 80, 80]);
    let report = engine.run(&bars, None).unwrap();

    assert!(report.kill_switch_tripped);
    assert_eq!(report.final_equity_micros, 8_000 * MICROS_SCALE);
    // fills: the entry only — no flatten sell.
    assert_eq!(report.fills_applied, 1);
}
