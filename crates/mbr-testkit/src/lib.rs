//! mbr-testkit
//!
//! Deterministic fixtures shared by the scenario tests: bar builders, a
//! close-over-close reference strategy, a transiently failing broker
//! wrapper, and an in-memory state store.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use mbr_core::ports::{Broker, BrokerError, StateStore, StateStoreError};
use mbr_core::types::{
    Bar, Fill, OrderRecord, OrderRequest, PortfolioState, RiskState, Signal, SignalAction,
    Timeframe,
};
use mbr_core::MICROS_SCALE;
use mbr_md::RawBarRecord;
use mbr_strategy::{Strategy, StrategyBundle, StrategyKind, StrategyMeta};

// ---------------------------------------------------------------------------
// Bar fixtures
// ---------------------------------------------------------------------------

/// One canonical closed bar with a flat OHLC at `close_units`.
pub fn flat_bar(symbol: &str, ts: DateTime<Utc>, close_units: i64) -> Bar {
    Bar {
        ts,
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

/// One-minute bars for `symbol`, one per close in `closes`, starting at
/// `start` and stepping 60 s.
pub fn minute_bars(symbol: &str, start: DateTime<Utc>, closes: &[i64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| flat_bar(symbol, start + Duration::seconds(60 * i as i64), *c))
        .collect()
}

/// A raw (pre-normalization) record with a flat OHLC.
pub fn raw_record(symbol: &str, ts: &str, close: &str) -> RawBarRecord {
    RawBarRecord {
        symbol: Some(symbol.to_string()),
        timeframe: Some("1m".to_string()),
        ts: Some(ts.to_string()),
        open: Some(close.to_string()),
        high: Some(close.to_string()),
        low: Some(close.to_string()),
        close: Some(close.to_string()),
        volume: Some("1".to_string()),
        is_closed: Some(true),
        source: None,
    }
}

// ---------------------------------------------------------------------------
// Reference strategy
// ---------------------------------------------------------------------------

/// Close-over-close momentum: enter long when the close exceeds the
/// previous close, exit long otherwise. The first bar holds.
pub struct CloseOverClose {
    name: String,
    prev_close: Option<i64>,
    pub fills_seen: usize,
    pub finalized: bool,
}

impl CloseOverClose {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prev_close: None,
            fills_seen: 0,
            finalized: false,
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
        vec![Signal::new(
            bar.ts,
            bar.symbol.clone(),
            action,
            10_000,
            self.name.clone(),
        )]
    }

    fn on_fill(&mut self, _fill: &Fill) {
        self.fills_seen += 1;
    }

    fn finalize(&mut self) {
        self.finalized = true;
    }
}

/// Bundle for [`CloseOverClose`] over a single symbol.
pub fn close_over_close_bundle(name: &str, symbol: &str) -> StrategyBundle {
    let strategy_name = name.to_string();
    StrategyBundle::new(
        StrategyMeta {
            name: name.to_string(),
            kind: StrategyKind::Signal,
            universe: vec![symbol.to_string()],
            timeframe: Timeframe::M1,
            required_fields: vec!["close".to_string()],
            session: None,
        },
        Box::new(move || Box::new(CloseOverClose::new(strategy_name.clone()))),
    )
}

/// A plugin source that passes the import sandbox.
pub const CLEAN_PLUGIN_SOURCE: &str = "\
use mbr_core::types::{Bar, Signal, SignalAction};
use mbr_strategy::{Strategy, StrategyBundle};
";

// ---------------------------------------------------------------------------
// Flaky broker
// ---------------------------------------------------------------------------

/// Wraps a broker and fails the first `failures` submissions with a
/// transient error, then delegates. Exercises the engine's bounded
/// same-key retry path.
pub struct FlakyBroker<B: Broker> {
    inner: B,
    failures_remaining: u32,
    pub transient_failures_served: u32,
}

impl<B: Broker> FlakyBroker<B> {
    pub fn new(inner: B, failures: u32) -> Self {
        Self {
            inner,
            failures_remaining: failures,
            transient_failures_served: 0,
        }
    }
}

impl<B: Broker> Broker for FlakyBroker<B> {
    fn on_bar_close(&mut self, bar: &Bar) -> Result<(), BrokerError> {
        self.inner.on_bar_close(bar)
    }

    fn submit_order(&mut self, request: &OrderRequest) -> Result<OrderRecord, BrokerError> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            self.transient_failures_served += 1;
            return Err(BrokerError::transient("simulated connection reset"));
        }
        self.inner.submit_order(request)
    }

    fn cancel_order(&mut self, order_id: Uuid) -> Result<OrderRecord, BrokerError> {
        self.inner.cancel_order(order_id)
    }

    fn get_order(&self, order_id: Uuid) -> Result<OrderRecord, BrokerError> {
        self.inner.get_order(order_id)
    }

    fn list_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderRecord>, BrokerError> {
        self.inner.list_open_orders(symbol)
    }

    fn get_fills(&self, order_id: Option<Uuid>) -> Result<Vec<Fill>, BrokerError> {
        self.inner.get_fills(order_id)
    }
}

// ---------------------------------------------------------------------------
// In-memory state store
// ---------------------------------------------------------------------------

/// State store backed by plain fields; restart safety without IO.
#[derive(Clone, Debug, Default)]
pub struct MemoryStateStore {
    pub portfolio: Option<PortfolioState>,
    pub risk: Option<RiskState>,
    pub idempotency: Option<BTreeMap<String, Uuid>>,
}

impl StateStore for MemoryStateStore {
    fn load_portfolio_state(&self) -> Result<Option<PortfolioState>, StateStoreError> {
        Ok(self.portfolio.clone())
    }

    fn save_portfolio_state(&mut self, state: &PortfolioState) -> Result<(), StateStoreError> {
        self.portfolio = Some(state.clone());
        Ok(())
    }

    fn load_risk_state(&self) -> Result<Option<RiskState>, StateStoreError> {
        Ok(self.risk.clone())
    }

    fn save_risk_state(&mut self, state: &RiskState) -> Result<(), StateStoreError> {
        self.risk = Some(state.clone());
        Ok(())
    }

    fn load_idempotency_map(&self) -> Result<Option<BTreeMap<String, Uuid>>, StateStoreError> {
        Ok(self.idempotency.clone())
    }

    fn save_idempotency_map(
        &mut self,
        map: &BTreeMap<String, Uuid>,
    ) -> Result<(), StateStoreError> {
        self.idempotency = Some(map.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
