//! Domain value types.
//!
//! Money and quantity fields are integer micros, ratio fields are integer
//! basis points (see [`crate::fixedpoint`]). Timestamps are timezone-aware
//! UTC; a `Bar.ts` is always the **bar close time**.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Bar timeframe. Only one-minute bars are accepted by the runtime today;
/// the enum exists so that strategy metadata has a forward-compatible slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    /// One-minute bars (60 s close-to-close).
    M1,
}

impl Timeframe {
    /// Expected close-to-close step in seconds.
    pub fn step_secs(self) -> i64 {
        match self {
            Timeframe::M1 => 60,
        }
    }

    /// Canonical string form (matches the data-source column contract).
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
        }
    }

    /// Parse the canonical string form.
    pub fn parse(s: &str) -> Option<Timeframe> {
        match s {
            "1m" => Some(Timeframe::M1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BUY or SELL.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported order types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle status.
///
/// Terminal statuses are absorbing: once reached, no further transition is
/// legal (enforced by `mbr-execution`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Submitted,
    Accepted,
    Rejected,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Directional intent emitted by a signal strategy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    EnterLong,
    ExitLong,
    EnterShort,
    ExitShort,
    Hold,
}

// ---------------------------------------------------------------------------
// Bar
// ---------------------------------------------------------------------------

/// A canonical one-minute OHLCV bar, indexed by **close time** in UTC.
///
/// Invariants (enforced by the normalizer in `mbr-md`, assumed everywhere
/// downstream): strictly monotonic `ts` per symbol, 60 s close-to-close
/// within contiguous segments, `(symbol, ts, timeframe)` unique, OHLC
/// sane, and `is_closed == true` for every bar that reaches an engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar close time, timezone-aware UTC.
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub volume_micros: i64,
    pub timeframe: Timeframe,
    /// `false` for a still-forming streaming bar. Open bars never reach
    /// execution.
    pub is_closed: bool,
    /// Originating feed identifier, if known.
    pub source: Option<String>,
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A per-bar intent produced by a signal strategy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: Uuid,
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub action: SignalAction,
    /// Conviction in basis points, `0..=10_000`.
    pub strength_bps: i64,
    pub strategy_name: String,
    pub metadata: BTreeMap<String, String>,
}

impl Signal {
    pub fn new(
        ts: DateTime<Utc>,
        symbol: impl Into<String>,
        action: SignalAction,
        strength_bps: i64,
        strategy_name: impl Into<String>,
    ) -> Self {
        debug_assert!((0..=10_000).contains(&strength_bps));
        Self {
            signal_id: Uuid::new_v4(),
            ts,
            symbol: symbol.into(),
            action,
            strength_bps,
            strategy_name: strategy_name.into(),
            metadata: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// TargetWeights
// ---------------------------------------------------------------------------

/// Target portfolio weights produced by a rebalancing strategy.
///
/// Weights are basis points of equity per symbol. The core does not
/// constrain the sum; the rebalancing engine enforces `sum ≤ 10_000` plus
/// the turnover cap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetWeights {
    pub ts: DateTime<Utc>,
    pub weights_bps: BTreeMap<String, i64>,
    pub rebalance: bool,
    pub reason: Option<String>,
}

impl TargetWeights {
    /// Sum of all target weights in bps.
    pub fn total_bps(&self) -> i64 {
        self.weights_bps.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// An immutable order submission request.
///
/// `idempotency_key` is the replay-collapse key: repeated submissions with
/// the same key and identical canonical payload must yield the same order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty_micros: i64,
    pub limit_price_micros: Option<i64>,
    pub stop_price_micros: Option<i64>,
    pub strategy_name: String,
    pub metadata: BTreeMap<String, String>,
}

impl OrderRequest {
    /// Canonical idempotency key: `{strategy}:{symbol}:{side}:{bar_ts}:{seq}`.
    ///
    /// `bar_ts` is rendered as RFC-3339 seconds precision so the key is
    /// stable across serialization round trips.
    pub fn canonical_key(
        strategy_name: &str,
        symbol: &str,
        side: Side,
        bar_ts: DateTime<Utc>,
        seq: u64,
    ) -> String {
        format!(
            "{strategy_name}:{symbol}:{}:{}:{seq}",
            side,
            bar_ts.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// A single recorded lifecycle transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub ts: DateTime<Utc>,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub cause: String,
}

/// Mutable projection of an order through its lifecycle.
///
/// Owned by the order state machine in `mbr-execution`; everything else
/// sees snapshots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: Uuid,
    pub request: OrderRequest,
    pub status: OrderStatus,
    pub filled_qty_micros: i64,
    pub venue_order_id: Option<String>,
    pub reject_reason: Option<String>,
    pub transitions: Vec<Transition>,
}

impl OrderRecord {
    /// Quantity still open.
    pub fn remaining_qty_micros(&self) -> i64 {
        self.request.qty_micros - self.filled_qty_micros
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Fill
// ---------------------------------------------------------------------------

/// An execution record. The accounting atom: portfolio and risk state are
/// derived entirely from the ordered fill stream plus marks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: Uuid,
    pub order_id: Uuid,
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub qty_micros: i64,
    pub price_micros: i64,
    pub commission_micros: i64,
    pub slippage_bps: i64,
    pub venue_fill_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

/// Per-symbol position state (average-price accounting).
///
/// `qty_micros` is signed: positive = long, negative = short.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub qty_micros: i64,
    pub avg_price_micros: i64,
    pub mark_price_micros: i64,
    pub unrealized_pnl_micros: i64,
    pub realized_pnl_micros: i64,
}

/// Portfolio snapshot derived from initial cash + the ordered fill stream
/// + the latest marks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub ts: DateTime<Utc>,
    pub cash_micros: i64,
    pub equity_micros: i64,
    pub positions: BTreeMap<String, Position>,
    pub gross_exposure_micros: i64,
    pub net_exposure_micros: i64,
    pub pending_orders: usize,
}

impl PortfolioState {
    pub fn new(ts: DateTime<Utc>, initial_cash_micros: i64) -> Self {
        Self {
            ts,
            cash_micros: initial_cash_micros,
            equity_micros: initial_cash_micros,
            positions: BTreeMap::new(),
            gross_exposure_micros: 0,
            net_exposure_micros: 0,
            pending_orders: 0,
        }
    }

    /// Signed quantity currently held in `symbol` (0 when flat).
    pub fn position_qty_micros(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map_or(0, |p| p.qty_micros)
    }
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

/// Live risk state maintained by the risk monitor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskState {
    pub ts: DateTime<Utc>,
    pub max_leverage_bps: i64,
    pub current_leverage_bps: i64,
    pub max_position_notional_micros: i64,
    pub max_drawdown_bps: i64,
    pub current_drawdown_bps: i64,
    pub kill_switch_dd_bps: i64,
    pub peak_equity_micros: i64,
    pub breached_rules: Vec<String>,
    pub kill_switch_active: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
