//! mbr-portfolio
//!
//! Deterministic portfolio accounting. `PortfolioState` is derived
//! entirely from initial cash + the ordered fill stream + the latest
//! marks; applying the same fills in the same order always reproduces
//! the same state.
//!
//! Average-price method: increases blend the entry price, reductions
//! realize PnL against the average, crossings realize the closed side and
//! open the remainder at the fill price. Commissions reduce cash only.
//!
//! Pure logic, no IO. All arithmetic is integer micros with `i128`
//! intermediates clamped back to `i64`.

use chrono::{DateTime, Utc};

use mbr_core::types::{Fill, PortfolioState, Position, Side};

fn mul_qty_price(qty_micros: i64, price_micros: i64) -> i128 {
    (qty_micros as i128) * (price_micros as i128) / 1_000_000
}

fn clamp_i64(x: i128) -> i64 {
    if x > i64::MAX as i128 {
        i64::MAX
    } else if x < i64::MIN as i128 {
        i64::MIN
    } else {
        x as i64
    }
}

// ---------------------------------------------------------------------------
// Fill application
// ---------------------------------------------------------------------------

/// Apply one fill: cash first, then position, then derived fields.
///
/// Flat positions are kept (qty 0) so per-symbol realized PnL stays
/// visible in snapshots.
pub fn apply_fill(pf: &mut PortfolioState, fill: &Fill) {
    debug_assert!(fill.qty_micros > 0, "Fill.qty_micros must be > 0");
    debug_assert!(fill.price_micros >= 0);
    debug_assert!(fill.commission_micros >= 0);

    // Cash movement, fee included.
    let notional = clamp_i64(mul_qty_price(fill.qty_micros, fill.price_micros));
    match fill.side {
        Side::Buy => {
            pf.cash_micros = pf.cash_micros.saturating_sub(notional);
        }
        Side::Sell => {
            pf.cash_micros = pf.cash_micros.saturating_add(notional);
        }
    }
    pf.cash_micros = pf.cash_micros.saturating_sub(fill.commission_micros);

    // Position update (signed qty: buy adds, sell subtracts).
    let position = pf
        .positions
        .entry(fill.symbol.clone())
        .or_insert_with(|| Position {
            qty_micros: 0,
            avg_price_micros: 0,
            mark_price_micros: fill.price_micros,
            unrealized_pnl_micros: 0,
            realized_pnl_micros: 0,
        });

    let signed_fill = match fill.side {
        Side::Buy => fill.qty_micros,
        Side::Sell => -fill.qty_micros,
    };
    let old_qty = position.qty_micros;
    let new_qty = old_qty + signed_fill;

    if old_qty == 0 || old_qty.signum() == signed_fill.signum() {
        // Opening or increasing: blend the average entry price.
        let old_cost = (old_qty.abs() as i128) * (position.avg_price_micros as i128);
        let add_cost = (fill.qty_micros as i128) * (fill.price_micros as i128);
        let total_qty = old_qty.abs() + fill.qty_micros;
        position.avg_price_micros = clamp_i64((old_cost + add_cost) / (total_qty as i128));
    } else if signed_fill.abs() <= old_qty.abs() {
        // Reducing: realize against the average; the average is unchanged.
        let closed = signed_fill.abs();
        position.realized_pnl_micros = position
            .realized_pnl_micros
            .saturating_add(realized_on_close(old_qty, position.avg_price_micros, fill.price_micros, closed));
    } else {
        // Crossing through flat: realize the whole old position, then the
        // remainder opens a new one at the fill price.
        let closed = old_qty.abs();
        position.realized_pnl_micros = position
            .realized_pnl_micros
            .saturating_add(realized_on_close(old_qty, position.avg_price_micros, fill.price_micros, closed));
        position.avg_price_micros = fill.price_micros;
    }

    position.qty_micros = new_qty;
    position.mark_price_micros = fill.price_micros;
    refresh_position_unrealized(position);

    pf.ts = fill.ts;
    refresh_derived(pf);
}

/// Realized PnL from closing `closed` micros of a position with the given
/// sign and average entry, at `exit_price`.
fn realized_on_close(old_qty: i64, avg_price: i64, exit_price: i64, closed: i64) -> i64 {
    let per_unit = if old_qty > 0 {
        exit_price as i128 - avg_price as i128
    } else {
        avg_price as i128 - exit_price as i128
    };
    clamp_i64(per_unit * (closed as i128) / 1_000_000)
}

// ---------------------------------------------------------------------------
// Marks and derived fields
// ---------------------------------------------------------------------------

/// Mark one symbol to a new price and refresh derived fields.
pub fn mark(pf: &mut PortfolioState, symbol: &str, price_micros: i64, ts: DateTime<Utc>) {
    if let Some(position) = pf.positions.get_mut(symbol) {
        position.mark_price_micros = price_micros;
        refresh_position_unrealized(position);
    }
    pf.ts = ts;
    refresh_derived(pf);
}

fn refresh_position_unrealized(position: &mut Position) {
    let diff = position.mark_price_micros as i128 - position.avg_price_micros as i128;
    position.unrealized_pnl_micros = clamp_i64(diff * (position.qty_micros as i128) / 1_000_000);
}

/// Recompute equity and exposures from cash, positions, and marks.
///
/// Invariant: `equity = cash + Σ qty × mark` at every emission.
pub fn refresh_derived(pf: &mut PortfolioState) {
    let mut gross: i128 = 0;
    let mut net: i128 = 0;
    for position in pf.positions.values() {
        let notional = mul_qty_price(position.qty_micros, position.mark_price_micros);
        net += notional;
        gross += notional.abs();
    }
    pf.gross_exposure_micros = clamp_i64(gross);
    pf.net_exposure_micros = clamp_i64(net);
    pf.equity_micros = clamp_i64(pf.cash_micros as i128 + net);
}

/// Current market value of one position at its mark.
pub fn position_notional_micros(pf: &PortfolioState, symbol: &str) -> i64 {
    pf.positions
        .get(symbol)
        .map_or(0, |p| clamp_i64(mul_qty_price(p.qty_micros, p.mark_price_micros)))
}

/// Current weight of a symbol in bps of equity (0 when equity is 0).
pub fn position_weight_bps(pf: &PortfolioState, symbol: &str) -> i64 {
    if pf.equity_micros == 0 {
        return 0;
    }
    let notional = position_notional_micros(pf, symbol);
    clamp_i64((notional as i128) * 10_000 / (pf.equity_micros as i128))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
