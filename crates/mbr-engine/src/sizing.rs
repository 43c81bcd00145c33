//! Signal-to-order sizing.
//!
//! Entries budget `equity × per_trade_risk × strength` of notional and
//! convert to quantity at the bar close; exits close the full position.
//! A signal that would not change the position (enter while already in,
//! exit while flat) produces no order.

use mbr_core::fixedpoint::{apply_bps, MICROS_SCALE};
use mbr_core::types::{
    OrderRequest, OrderType, PortfolioState, Side, Signal, SignalAction,
};
use mbr_policy::SizingPolicy;

/// Convert one signal into an order request, or `None` when the signal
/// does not change the position.
///
/// `seq` disambiguates multiple orders within the same bar and feeds the
/// canonical idempotency key.
pub fn size_signal(
    signal: &Signal,
    pf: &PortfolioState,
    sizing: &SizingPolicy,
    close_micros: i64,
    seq: u64,
) -> Option<OrderRequest> {
    if close_micros <= 0 {
        return None;
    }
    let held = pf.position_qty_micros(&signal.symbol);

    let (side, qty_micros) = match signal.action {
        SignalAction::Hold => return None,
        SignalAction::EnterLong => {
            if held > 0 {
                return None;
            }
            (Side::Buy, entry_qty_micros(pf, sizing, signal, close_micros)?)
        }
        SignalAction::ExitLong => {
            if held <= 0 {
                return None;
            }
            (Side::Sell, held)
        }
        SignalAction::EnterShort => {
            if held < 0 {
                return None;
            }
            (Side::Sell, entry_qty_micros(pf, sizing, signal, close_micros)?)
        }
        SignalAction::ExitShort => {
            if held >= 0 {
                return None;
            }
            (Side::Buy, -held)
        }
    };

    if qty_micros <= 0 {
        return None;
    }

    Some(OrderRequest {
        idempotency_key: OrderRequest::canonical_key(
            &signal.strategy_name,
            &signal.symbol,
            side,
            signal.ts,
            seq,
        ),
        created_at: signal.ts,
        symbol: signal.symbol.clone(),
        side,
        order_type: OrderType::Market,
        qty_micros,
        limit_price_micros: None,
        stop_price_micros: None,
        strategy_name: signal.strategy_name.clone(),
        metadata: signal.metadata.clone(),
    })
}

/// `equity × per_trade_risk × strength / close`, truncating.
fn entry_qty_micros(
    pf: &PortfolioState,
    sizing: &SizingPolicy,
    signal: &Signal,
    close_micros: i64,
) -> Option<i64> {
    let budget = apply_bps(pf.equity_micros, sizing.per_trade_risk_bps).ok()?;
    let budget = apply_bps(budget, signal.strength_bps).ok()?;
    if budget <= 0 {
        return None;
    }
    let qty = (budget as i128) * (MICROS_SCALE as i128) / (close_micros as i128);
    Some(qty as i64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
