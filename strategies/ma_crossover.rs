//! Moving-average crossover over one-minute closes.
//!
//! Long while the fast simple moving average is above the slow one,
//! flat otherwise. Warm-up bars (fewer closes than the slow window)
//! hold.

use std::collections::{HashMap, VecDeque};

use mbr_core::types::{Bar, Signal, SignalAction, Timeframe};
use mbr_strategy::{Strategy, StrategyBundle, StrategyKind, StrategyMeta};

const FAST_WINDOW: usize = 5;
const SLOW_WINDOW: usize = 20;

struct MaCrossover {
    closes: HashMap<String, VecDeque<i64>>,
}

impl MaCrossover {
    fn new() -> Self {
        Self {
            closes: HashMap::new(),
        }
    }
}

fn sma(closes: &VecDeque<i64>, window: usize) -> i64 {
    let sum: i128 = closes.iter().rev().take(window).map(|c| *c as i128).sum();
    (sum / window as i128) as i64
}

impl Strategy for MaCrossover {
    fn on_bar(&mut self, bar: &Bar) -> Vec<Signal> {
        let closes = self.closes.entry(bar.symbol.clone()).or_default();
        closes.push_back(bar.close_micros);
        if closes.len() > SLOW_WINDOW {
            closes.pop_front();
        }

        let action = if closes.len() < SLOW_WINDOW {
            SignalAction::Hold
        } else if sma(closes, FAST_WINDOW) > sma(closes, SLOW_WINDOW) {
            SignalAction::EnterLong
        } else {
            SignalAction::ExitLong
        };

        vec![Signal::new(
            bar.ts,
            bar.symbol.clone(),
            action,
            10_000,
            "ma_crossover",
        )]
    }
}

/// Plugin entry point.
pub fn get_bundle() -> StrategyBundle {
    StrategyBundle::new(
        StrategyMeta {
            name: "ma_crossover".to_string(),
            kind: StrategyKind::Signal,
            universe: vec!["BTC-USD".to_string()],
            timeframe: Timeframe::M1,
            required_fields: vec!["close".to_string()],
            session: Some("24x7".to_string()),
        },
        Box::new(|| Box::new(MaCrossover::new())),
    )
}
