//! Canonical artifact event schema.
//!
//! These are the wire projections of the domain types: every money field
//! is rendered to a fixed six-decimal string and every timestamp to
//! RFC-3339 UTC at microsecond precision, so serialized bytes are stable
//! across platforms and runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mbr_core::fixedpoint::render_micros;
use mbr_core::types::{Fill, OrderRecord, PortfolioState};

/// RFC-3339 UTC with exactly six fractional digits (nanoseconds
/// truncated): `2026-01-01T00:02:00.000000Z`.
pub fn canonical_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

// ---------------------------------------------------------------------------
// Stream payloads
// ---------------------------------------------------------------------------

/// One row on the `orders` stream: an order snapshot at a lifecycle edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub ts: String,
    pub order_id: String,
    pub idempotency_key: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub qty: String,
    pub limit_price: Option<String>,
    pub stop_price: Option<String>,
    pub status: String,
    pub filled_qty: String,
    pub venue_order_id: Option<String>,
    pub reject_reason: Option<String>,
    pub strategy: String,
}

impl OrderEvent {
    pub fn from_record(ts: DateTime<Utc>, record: &OrderRecord) -> Self {
        Self {
            ts: canonical_ts(ts),
            order_id: record.order_id.to_string(),
            idempotency_key: record.request.idempotency_key.clone(),
            symbol: record.request.symbol.clone(),
            side: record.request.side.to_string(),
            order_type: record.request.order_type.to_string(),
            qty: render_micros(record.request.qty_micros),
            limit_price: record.request.limit_price_micros.map(render_micros),
            stop_price: record.request.stop_price_micros.map(render_micros),
            status: record.status.to_string(),
            filled_qty: render_micros(record.filled_qty_micros),
            venue_order_id: record.venue_order_id.clone(),
            reject_reason: record.reject_reason.clone(),
            strategy: record.request.strategy_name.clone(),
        }
    }
}

/// One row on the `fills` stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillEvent {
    pub ts: String,
    pub fill_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub qty: String,
    pub price: String,
    pub commission: String,
    pub slippage_bps: i64,
    pub venue_fill_id: Option<String>,
}

impl FillEvent {
    pub fn from_fill(fill: &Fill) -> Self {
        Self {
            ts: canonical_ts(fill.ts),
            fill_id: fill.fill_id.to_string(),
            order_id: fill.order_id.to_string(),
            symbol: fill.symbol.clone(),
            side: fill.side.to_string(),
            qty: render_micros(fill.qty_micros),
            price: render_micros(fill.price_micros),
            commission: render_micros(fill.commission_micros),
            slippage_bps: fill.slippage_bps,
            venue_fill_id: fill.venue_fill_id.clone(),
        }
    }
}

/// One position inside a `positions` snapshot, sorted by symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRow {
    pub symbol: String,
    pub qty: String,
    pub avg_price: String,
    pub mark_price: String,
    pub unrealized_pnl: String,
    pub realized_pnl: String,
}

/// One row on the `positions` stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionsSnapshotEvent {
    pub ts: String,
    pub positions: Vec<PositionRow>,
}

impl PositionsSnapshotEvent {
    pub fn from_portfolio(pf: &PortfolioState) -> Self {
        // BTreeMap iteration is already symbol-sorted.
        let positions = pf
            .positions
            .iter()
            .map(|(symbol, p)| PositionRow {
                symbol: symbol.clone(),
                qty: render_micros(p.qty_micros),
                avg_price: render_micros(p.avg_price_micros),
                mark_price: render_micros(p.mark_price_micros),
                unrealized_pnl: render_micros(p.unrealized_pnl_micros),
                realized_pnl: render_micros(p.realized_pnl_micros),
            })
            .collect();
        Self {
            ts: canonical_ts(pf.ts),
            positions,
        }
    }
}

/// One row on the `pnl` stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnlSnapshotEvent {
    pub ts: String,
    pub cash: String,
    pub equity: String,
    pub gross_exposure: String,
    pub net_exposure: String,
    pub pending_orders: usize,
}

impl PnlSnapshotEvent {
    pub fn from_portfolio(pf: &PortfolioState) -> Self {
        Self {
            ts: canonical_ts(pf.ts),
            cash: render_micros(pf.cash_micros),
            equity: render_micros(pf.equity_micros),
            gross_exposure: render_micros(pf.gross_exposure_micros),
            net_exposure: render_micros(pf.net_exposure_micros),
            pending_orders: pf.pending_orders,
        }
    }
}

/// One row on the `risk_events` stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskEventRecord {
    pub ts: String,
    pub kind: String,
    pub reason: String,
    pub threshold_bps: Option<i64>,
    pub observed_bps: Option<i64>,
}

impl RiskEventRecord {
    pub fn kill_switch_tripped(
        ts: DateTime<Utc>,
        reason: impl Into<String>,
        threshold_bps: i64,
        observed_bps: i64,
    ) -> Self {
        Self {
            ts: canonical_ts(ts),
            kind: "kill_switch_tripped".to_string(),
            reason: reason.into(),
            threshold_bps: Some(threshold_bps),
            observed_bps: Some(observed_bps),
        }
    }

    pub fn intent_rejected(ts: DateTime<Utc>, kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            ts: canonical_ts(ts),
            kind: kind.into(),
            reason: reason.into(),
            threshold_bps: None,
            observed_bps: None,
        }
    }
}

/// Rate-limit (or similar throttle) event; carried on `risk_events`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitHitEvent {
    pub ts: String,
    pub scope: String,
    pub message: String,
}

impl LimitHitEvent {
    pub fn new(ts: DateTime<Utc>, scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ts: canonical_ts(ts),
            scope: scope.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tagged union
// ---------------------------------------------------------------------------

/// The artifact event union. The internally-tagged serialization (tag
/// first, then declaration-ordered fields) is the canonical byte form
/// fed to the per-stream hash chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactEvent {
    Order(OrderEvent),
    Fill(FillEvent),
    PositionsSnapshot(PositionsSnapshotEvent),
    PnlSnapshot(PnlSnapshotEvent),
    RiskEvent(RiskEventRecord),
    LimitHit(LimitHitEvent),
}

impl ArtifactEvent {
    /// The stream this event belongs to.
    pub fn stream(&self) -> &'static str {
        match self {
            ArtifactEvent::Order(_) => "orders",
            ArtifactEvent::Fill(_) => "fills",
            ArtifactEvent::PositionsSnapshot(_) => "positions",
            ArtifactEvent::PnlSnapshot(_) => "pnl",
            ArtifactEvent::RiskEvent(_) | ArtifactEvent::LimitHit(_) => "risk_events",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
