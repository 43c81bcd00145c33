//! Port contracts consumed by the core.
//!
//! Every port is a synchronous trait. The runtime is single-threaded
//! cooperative: the engine suspends only at these boundaries, and in
//! backtest mode every call resolves immediately. Hosts wrapping
//! asynchronous SDKs are responsible for bridging.
//!
//! Adapters are external collaborators — nothing in this module performs
//! network or database IO.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{Bar, Fill, OrderRecord, OrderRequest, PortfolioState, RiskState, Timeframe};

// ---------------------------------------------------------------------------
// Broker errors
// ---------------------------------------------------------------------------

/// Classification of an adapter failure, decided by the adapter.
///
/// The core defines the categories and the resulting behavior (transient →
/// bounded same-key retry by the engine; semantic → the order is rejected,
/// no retry). Mapping broker-specific causes onto a class is adapter work.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network / transport / generic 5xx-style failures. Safe to retry
    /// with the same idempotency key.
    Transient,
    /// Insufficient funds, invalid symbol, compliance, rate limit.
    /// Never retried; the order terminates as Rejected.
    Semantic,
}

/// An error surfaced by a broker adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerError {
    pub class: ErrorClass,
    /// Rate-limit responses are semantic but additionally force an engine
    /// cool-down and a `limit_hit` artifact event.
    pub rate_limited: bool,
    pub message: String,
}

impl BrokerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            rate_limited: false,
            message: message.into(),
        }
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Semantic,
            rate_limited: false,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Semantic,
            rate_limited: true,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = match self.class {
            ErrorClass::Transient => "transient",
            ErrorClass::Semantic => "semantic",
        };
        if self.rate_limited {
            write!(f, "broker error ({class}, rate-limited): {}", self.message)
        } else {
            write!(f, "broker error ({class}): {}", self.message)
        }
    }
}

impl std::error::Error for BrokerError {}

// ---------------------------------------------------------------------------
// Broker port
// ---------------------------------------------------------------------------

/// Broker-agnostic order port.
///
/// `submit_order` MUST honor `request.idempotency_key`: resubmitting the
/// same key with an identical payload returns the existing order instead
/// of creating a new one.
pub trait Broker {
    /// Delivered once per closed bar before intents are submitted, so
    /// simulated venues can mark and cross resting orders. Live adapters
    /// keep the default no-op; their venue sees the market directly.
    fn on_bar_close(&mut self, _bar: &Bar) -> Result<(), BrokerError> {
        Ok(())
    }

    fn submit_order(&mut self, request: &OrderRequest) -> Result<OrderRecord, BrokerError>;

    fn cancel_order(&mut self, order_id: Uuid) -> Result<OrderRecord, BrokerError>;

    fn get_order(&self, order_id: Uuid) -> Result<OrderRecord, BrokerError>;

    fn list_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderRecord>, BrokerError>;

    /// Fills for one order, or all fills in report order when `order_id`
    /// is `None`.
    fn get_fills(&self, order_id: Option<Uuid>) -> Result<Vec<Fill>, BrokerError>;
}

// ---------------------------------------------------------------------------
// Data source port
// ---------------------------------------------------------------------------

/// An error surfaced by a bar data source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSourceError {
    pub message: String,
}

impl DataSourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data source error: {}", self.message)
    }
}

impl std::error::Error for DataSourceError {}

/// Source of canonical bars.
///
/// Column contract for file-backed sources (parquet or CSV): required
/// `timestamp` (UTC datetime), `open`, `high`, `low`, `close`, `volume`;
/// recommended `symbol`, `timeframe`, `is_closed`, `source`, `ingested_at`.
pub trait BarDataSource {
    /// Finite, restartable, ordered by `ts`.
    fn get_historical_bars(
        &mut self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, DataSourceError>;

    /// Infinite, not restartable. Returns bars as they close; `None` when
    /// the stream ends (backtest replay sources end, live feeds do not).
    fn next_live_bar(
        &mut self,
        symbols: &[String],
        timeframe: Timeframe,
    ) -> Result<Option<Bar>, DataSourceError>;
}

// ---------------------------------------------------------------------------
// Clock port
// ---------------------------------------------------------------------------

/// Time source. In backtest the clock is driven by the current bar's close
/// time; in paper/live it is the system clock. Passed explicitly — the
/// core never reads ambient wall-clock time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock for paper/live runs.
#[derive(Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock for backtests and tests.
#[derive(Clone, Debug)]
pub struct SimClock {
    now: std::cell::Cell<DateTime<Utc>>,
}

impl SimClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::cell::Cell::new(start),
        }
    }

    /// Advance to the given instant (typically the current bar close).
    pub fn set(&self, ts: DateTime<Utc>) {
        self.now.set(ts);
    }
}

impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

// ---------------------------------------------------------------------------
// State store port
// ---------------------------------------------------------------------------

/// An error surfaced by a state store adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateStoreError {
    pub message: String,
}

impl fmt::Display for StateStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state store error: {}", self.message)
    }
}

impl std::error::Error for StateStoreError {}

/// Optional persistence for restart safety. A runtime without a store
/// simply starts fresh.
pub trait StateStore {
    fn load_portfolio_state(&self) -> Result<Option<PortfolioState>, StateStoreError>;
    fn save_portfolio_state(&mut self, state: &PortfolioState) -> Result<(), StateStoreError>;

    fn load_risk_state(&self) -> Result<Option<RiskState>, StateStoreError>;
    fn save_risk_state(&mut self, state: &RiskState) -> Result<(), StateStoreError>;

    fn load_idempotency_map(&self) -> Result<Option<BTreeMap<String, Uuid>>, StateStoreError>;
    fn save_idempotency_map(
        &mut self,
        map: &BTreeMap<String, Uuid>,
    ) -> Result<(), StateStoreError>;
}

// ---------------------------------------------------------------------------
// Notifier port
// ---------------------------------------------------------------------------

/// Out-of-band broadcast events (kill-switch trips, limit hits).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifierEvent {
    pub ts: DateTime<Utc>,
    pub kind: String,
    pub message: String,
}

/// Optional broadcast sink. Delivery is best-effort; the core never
/// depends on a notification being observed.
pub trait Notifier {
    fn emit(&mut self, event: &NotifierEvent);
}

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn emit(&mut self, _event: &NotifierEvent) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
