//! mbr-broker-paper
//!
//! Deterministic paper broker implementing the `Broker` port.
//!
//! Fill model: market orders execute at the latest mark with pessimistic
//! slippage (buys pay up, sells receive less); limit orders fill when the
//! mark crosses the limit; stop orders trigger at the stop and then fill
//! as market (or limit, for stop-limit). Commission comes from the cost
//! policy with a minimum-fee floor. No randomness, no network IO —
//! venue ids are running counters and fill ids are derived hashes, so a
//! replayed run produces identical fills byte for byte.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use mbr_core::fixedpoint::{apply_bps, mul_price_qty};
use mbr_core::ports::{Broker, BrokerError};
use mbr_core::types::{
    Bar, Fill, OrderRecord, OrderRequest, OrderStatus, OrderType, Side, Transition,
};
use mbr_execution::derive_order_id;
use mbr_policy::CostPolicy;

// ---------------------------------------------------------------------------
// PaperBroker
// ---------------------------------------------------------------------------

/// Simulated venue state for one run.
#[derive(Debug)]
pub struct PaperBroker {
    cost: CostPolicy,
    marks: BTreeMap<String, i64>,
    now: DateTime<Utc>,
    orders: BTreeMap<Uuid, OrderRecord>,
    orders_by_key: BTreeMap<String, Uuid>,
    fills: Vec<Fill>,
    next_venue_order: u64,
    next_venue_fill: u64,
}

impl PaperBroker {
    pub fn new(cost: CostPolicy, start: DateTime<Utc>) -> Self {
        Self {
            cost,
            marks: BTreeMap::new(),
            now: start,
            orders: BTreeMap::new(),
            orders_by_key: BTreeMap::new(),
            fills: Vec::new(),
            next_venue_order: 1,
            next_venue_fill: 1,
        }
    }

    /// Latest mark for a symbol, if any bar has been seen.
    pub fn mark(&self, symbol: &str) -> Option<i64> {
        self.marks.get(symbol).copied()
    }

    fn next_venue_order_id(&mut self) -> String {
        let id = format!("ORD-{:06}", self.next_venue_order);
        self.next_venue_order += 1;
        id
    }

    fn next_venue_fill_id(&mut self) -> String {
        let id = format!("FILL-{:06}", self.next_venue_fill);
        self.next_venue_fill += 1;
        id
    }

    /// Whether an order is executable at the current mark, and at what
    /// base price. `None` means the order rests.
    fn executable_base(&self, record: &OrderRecord, mark: i64) -> Option<i64> {
        let request = &record.request;
        match request.order_type {
            OrderType::Market => Some(mark),
            OrderType::Limit => {
                let limit = request.limit_price_micros?;
                match request.side {
                    Side::Buy if mark <= limit => Some(mark.min(limit)),
                    Side::Sell if mark >= limit => Some(mark.max(limit)),
                    _ => None,
                }
            }
            OrderType::Stop => {
                let stop = request.stop_price_micros?;
                let triggered = match request.side {
                    Side::Buy => mark >= stop,
                    Side::Sell => mark <= stop,
                };
                triggered.then_some(mark)
            }
            OrderType::StopLimit => {
                let stop = request.stop_price_micros?;
                let limit = request.limit_price_micros?;
                let triggered = match request.side {
                    Side::Buy => mark >= stop,
                    Side::Sell => mark <= stop,
                };
                if !triggered {
                    return None;
                }
                match request.side {
                    Side::Buy if mark <= limit => Some(mark.min(limit)),
                    Side::Sell if mark >= limit => Some(mark.max(limit)),
                    _ => None,
                }
            }
        }
    }

    /// Execute one order fully at `base_micros` and record the fill.
    fn execute(&mut self, order_id: Uuid, base_micros: i64) {
        let venue_fill_id = self.next_venue_fill_id();
        let record = match self.orders.get_mut(&order_id) {
            Some(r) => r,
            None => return,
        };
        let request = &record.request;

        let price = {
            let adjustment = apply_bps(base_micros, self.cost.slippage_bps).unwrap_or(0);
            match request.side {
                Side::Buy => base_micros + adjustment,
                Side::Sell => base_micros - adjustment,
            }
        };
        let qty = request.qty_micros - record.filled_qty_micros;
        let commission = {
            let notional = mul_price_qty(qty, price).unwrap_or(i64::MAX);
            apply_bps(notional, self.cost.commission_bps)
                .unwrap_or(i64::MAX)
                .max(self.cost.min_fee_micros)
        };

        let fill = Fill {
            fill_id: derive_fill_id(order_id, &venue_fill_id),
            order_id,
            ts: self.now,
            symbol: request.symbol.clone(),
            side: request.side,
            qty_micros: qty,
            price_micros: price,
            commission_micros: commission,
            slippage_bps: self.cost.slippage_bps,
            venue_fill_id: Some(venue_fill_id),
            metadata: BTreeMap::new(),
        };

        record.filled_qty_micros += qty;
        push_transition(record, self.now, OrderStatus::Filled, "venue_fill");
        self.fills.push(fill);
    }
}

/// Fill ids are derived from `(order_id, venue_fill_id)` so replays and
/// re-runs produce identical ids.
fn derive_fill_id(order_id: Uuid, venue_fill_id: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(order_id.as_bytes());
    hasher.update(venue_fill_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn push_transition(record: &mut OrderRecord, ts: DateTime<Utc>, to: OrderStatus, cause: &str) {
    let from = record.status;
    record.transitions.push(Transition {
        ts,
        from,
        to,
        cause: cause.to_string(),
    });
    record.status = to;
}

// ---------------------------------------------------------------------------
// Broker port implementation
// ---------------------------------------------------------------------------

impl Broker for PaperBroker {
    fn on_bar_close(&mut self, bar: &Bar) -> Result<(), BrokerError> {
        self.now = bar.ts;
        self.marks.insert(bar.symbol.clone(), bar.close_micros);

        // Cross resting orders against the new mark, in order-id order.
        let resting: Vec<Uuid> = self
            .orders
            .values()
            .filter(|r| !r.is_terminal() && r.request.symbol == bar.symbol)
            .map(|r| r.order_id)
            .collect();
        for order_id in resting {
            let base = self
                .orders
                .get(&order_id)
                .and_then(|r| self.executable_base(r, bar.close_micros));
            if let Some(base) = base {
                self.execute(order_id, base);
            }
        }
        Ok(())
    }

    fn submit_order(&mut self, request: &OrderRequest) -> Result<OrderRecord, BrokerError> {
        // Idempotency: a known key returns the existing order untouched.
        if let Some(existing) = self.orders_by_key.get(&request.idempotency_key) {
            return self.get_order(*existing);
        }

        let mark = self
            .marks
            .get(&request.symbol)
            .copied()
            .ok_or_else(|| BrokerError::semantic(format!("unknown symbol {}", request.symbol)))?;
        if request.qty_micros <= 0 {
            return Err(BrokerError::semantic("quantity must be positive"));
        }

        let order_id = derive_order_id(&request.idempotency_key);
        let venue_order_id = self.next_venue_order_id();
        let mut record = OrderRecord {
            order_id,
            request: request.clone(),
            status: OrderStatus::Submitted,
            filled_qty_micros: 0,
            venue_order_id: Some(venue_order_id),
            reject_reason: None,
            transitions: Vec::new(),
        };
        push_transition(&mut record, self.now, OrderStatus::Accepted, "venue_accept");

        self.orders_by_key
            .insert(request.idempotency_key.clone(), order_id);
        self.orders.insert(order_id, record.clone());

        if let Some(base) = self.executable_base(&record, mark) {
            self.execute(order_id, base);
        }

        self.get_order(order_id)
    }

    fn cancel_order(&mut self, order_id: Uuid) -> Result<OrderRecord, BrokerError> {
        let record = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| BrokerError::semantic(format!("unknown order {order_id}")))?;
        if !record.is_terminal() {
            push_transition(record, self.now, OrderStatus::Cancelled, "venue_cancel");
        }
        Ok(record.clone())
    }

    fn get_order(&self, order_id: Uuid) -> Result<OrderRecord, BrokerError> {
        self.orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| BrokerError::semantic(format!("unknown order {order_id}")))
    }

    fn list_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderRecord>, BrokerError> {
        Ok(self
            .orders
            .values()
            .filter(|r| !r.is_terminal())
            .filter(|r| symbol.map_or(true, |s| r.request.symbol == s))
            .cloned()
            .collect())
    }

    fn get_fills(&self, order_id: Option<Uuid>) -> Result<Vec<Fill>, BrokerError> {
        Ok(self
            .fills
            .iter()
            .filter(|f| order_id.map_or(true, |id| f.order_id == id))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mbr_core::types::Timeframe;
    use mbr_core::MICROS_SCALE;

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

    fn request(key: &str, side: Side, order_type: OrderType, qty_units: i64) -> OrderRequest {
        OrderRequest {
            idempotency_key: key.to_string(),
            created_at: ts(1),
            symbol: "BTC-USD".to_string(),
            side,
            order_type,
            qty_micros: qty_units * MICROS_SCALE,
            limit_price_micros: None,
            stop_price_micros: None,
            strategy_name: "s".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    fn broker_with_mark(close_units: i64) -> PaperBroker {
        // 10 bps slippage, 10 bps commission for readable numbers.
        let cost = CostPolicy {
            commission_bps: 10,
            slippage_bps: 10,
            min_fee_micros: 0,
        };
        let mut b = PaperBroker::new(cost, ts(0));
        b.on_bar_close(&bar("BTC-USD", 1, close_units)).unwrap();
        b
    }

    #[test]
    fn market_buy_fills_at_mark_plus_slippage() {
        let mut b = broker_with_mark(100);
        let record = b
            .submit_order(&request("k1", Side::Buy, OrderType::Market, 1))
            .unwrap();
        assert_eq!(record.status, OrderStatus::Filled);

        let fills = b.get_fills(Some(record.order_id)).unwrap();
        assert_eq!(fills.len(), 1);
        // 100 + 10 bps = 100.10
        assert_eq!(fills[0].price_micros, 100_100_000);
        // commission: 10 bps of 100.10 = 0.1001
        assert_eq!(fills[0].commission_micros, 100_100);
        assert_eq!(fills[0].slippage_bps, 10);
    }

    #[test]
    fn market_sell_fills_at_mark_minus_slippage() {
        let mut b = broker_with_mark(100);
        let record = b
            .submit_order(&request("k1", Side::Sell, OrderType::Market, 1))
            .unwrap();
        let fills = b.get_fills(Some(record.order_id)).unwrap();
        assert_eq!(fills[0].price_micros, 99_900_000);
    }

    #[test]
    fn min_fee_floor_applies() {
        let cost = CostPolicy {
            commission_bps: 1,
            slippage_bps: 0,
            min_fee_micros: 5 * MICROS_SCALE,
        };
        let mut b = PaperBroker::new(cost, ts(0));
        b.on_bar_close(&bar("BTC-USD", 1, 100)).unwrap();
        let record = b
            .submit_order(&request("k1", Side::Buy, OrderType::Market, 1))
            .unwrap();
        let fills = b.get_fills(Some(record.order_id)).unwrap();
        assert_eq!(fills[0].commission_micros, 5 * MICROS_SCALE);
    }

    #[test]
    fn submit_is_idempotent_per_key() {
        let mut b = broker_with_mark(100);
        let req = request("k1", Side::Buy, OrderType::Market, 1);
        let first = b.submit_order(&req).unwrap();
        let second = b.submit_order(&req).unwrap();

        assert_eq!(first.order_id, second.order_id);
        assert_eq!(b.get_fills(None).unwrap().len(), 1, "no double execution");
    }

    #[test]
    fn unknown_symbol_is_semantic_error() {
        let mut b = PaperBroker::new(CostPolicy::default(), ts(0));
        let err = b
            .submit_order(&request("k1", Side::Buy, OrderType::Market, 1))
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn buy_limit_rests_above_market_crosses_later() {
        let mut b = broker_with_mark(100);
        let mut req = request("k1", Side::Buy, OrderType::Limit, 1);
        req.limit_price_micros = Some(95 * MICROS_SCALE);

        let record = b.submit_order(&req).unwrap();
        assert_eq!(record.status, OrderStatus::Accepted);
        assert_eq!(b.list_open_orders(None).unwrap().len(), 1);

        // Mark falls through the limit: order crosses at the limit bound.
        b.on_bar_close(&bar("BTC-USD", 2, 94)).unwrap();
        let record = b.get_order(record.order_id).unwrap();
        assert_eq!(record.status, OrderStatus::Filled);
        let fills = b.get_fills(Some(record.order_id)).unwrap();
        // base = min(limit 95, mark 94) = 94, plus 10 bps slippage
        assert_eq!(fills[0].price_micros, 94 * MICROS_SCALE + 94_000);
    }

    #[test]
    fn sell_stop_triggers_on_mark_drop() {
        let mut b = broker_with_mark(100);
        let mut req = request("k1", Side::Sell, OrderType::Stop, 1);
        req.stop_price_micros = Some(98 * MICROS_SCALE);

        let record = b.submit_order(&req).unwrap();
        assert_eq!(record.status, OrderStatus::Accepted);

        b.on_bar_close(&bar("BTC-USD", 2, 97)).unwrap();
        assert_eq!(b.get_order(record.order_id).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn cancel_open_order() {
        let mut b = broker_with_mark(100);
        let mut req = request("k1", Side::Buy, OrderType::Limit, 1);
        req.limit_price_micros = Some(90 * MICROS_SCALE);
        let record = b.submit_order(&req).unwrap();

        let cancelled = b.cancel_order(record.order_id).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(b.list_open_orders(None).unwrap().is_empty());
    }

    #[test]
    fn cancel_after_fill_returns_terminal_record() {
        let mut b = broker_with_mark(100);
        let record = b
            .submit_order(&request("k1", Side::Buy, OrderType::Market, 1))
            .unwrap();
        let after = b.cancel_order(record.order_id).unwrap();
        assert_eq!(after.status, OrderStatus::Filled, "terminal is absorbing");
    }

    #[test]
    fn venue_ids_and_fill_ids_are_deterministic() {
        let run = || {
            let mut b = broker_with_mark(100);
            let record = b
                .submit_order(&request("k1", Side::Buy, OrderType::Market, 1))
                .unwrap();
            let fills = b.get_fills(None).unwrap();
            (record.venue_order_id, fills[0].venue_fill_id.clone(), fills[0].fill_id)
        };
        let (v1, f1, id1) = run();
        let (v2, f2, id2) = run();
        assert_eq!(v1, Some("ORD-000001".to_string()));
        assert_eq!(f1, Some("FILL-000001".to_string()));
        assert_eq!((v1, f1, id1), (v2, f2, id2));
    }

    #[test]
    fn list_open_orders_filters_by_symbol() {
        let mut b = broker_with_mark(100);
        b.on_bar_close(&bar("ETH-USD", 1, 10)).unwrap();

        let mut r1 = request("k1", Side::Buy, OrderType::Limit, 1);
        r1.limit_price_micros = Some(90 * MICROS_SCALE);
        let mut r2 = request("k2", Side::Buy, OrderType::Limit, 1);
        r2.symbol = "ETH-USD".to_string();
        r2.limit_price_micros = Some(9 * MICROS_SCALE);

        b.submit_order(&r1).unwrap();
        b.submit_order(&r2).unwrap();

        assert_eq!(b.list_open_orders(Some("BTC-USD")).unwrap().len(), 1);
        assert_eq!(b.list_open_orders(None).unwrap().len(), 2);
    }
}
