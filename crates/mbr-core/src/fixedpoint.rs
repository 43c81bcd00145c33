//! Fixed-point money and ratio arithmetic.
//!
//! All prices, quantities, cash balances, and notionals in this system are
//! integer micros (`i64`, 1 unit = 1_000_000 micros). Ratios — fees,
//! slippage, leverage, drawdown, portfolio weights, signal strength — are
//! integer basis points (`i64`, 1.0 = 10_000 bps). Intermediate products
//! use `i128`; division truncates toward zero.
//!
//! No floating point appears at any stage: decimal strings are parsed
//! digit-by-digit, and canonical rendering emits exactly six fractional
//! digits so that artifact hashing is byte-stable.

use std::fmt;

/// 1 unit = 1_000_000 micros.
pub const MICROS_SCALE: i64 = 1_000_000;

/// 1.0 = 10_000 basis points.
pub const BPS_SCALE: i64 = 10_000;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced by fixed-point parsing and arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixedPointError {
    /// The input string was empty or whitespace.
    Empty { field: &'static str },
    /// The input string could not be parsed as a decimal number.
    Invalid { field: &'static str, raw: String },
    /// Finer than six decimal places; not representable without rounding.
    TooManyDecimalPlaces { field: &'static str, raw: String },
    /// A multiplication or addition overflowed `i64`.
    Overflow { context: &'static str },
}

impl fmt::Display for FixedPointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixedPointError::Empty { field } => write!(f, "field '{field}' is empty"),
            FixedPointError::Invalid { field, raw } => {
                write!(f, "field '{field}' could not be parsed: '{raw}'")
            }
            FixedPointError::TooManyDecimalPlaces { field, raw } => write!(
                f,
                "field '{field}' is finer than micro precision and would need rounding: '{raw}'"
            ),
            FixedPointError::Overflow { context } => {
                write!(f, "fixed-point overflow in {context}")
            }
        }
    }
}

impl std::error::Error for FixedPointError {}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a decimal string into integer micros.
///
/// The input is consumed in a single pass: an optional leading sign,
/// whole-part digits, then at most six fractional digits after one `.`
/// separator. Every digit extends one running magnitude, which is scaled
/// up afterwards by however many fractional places were missing, so the
/// value never passes through a float. A seventh fractional digit is a
/// sub-micro amount and is refused rather than rounded; any other
/// character, a second separator, or a magnitude outside `i64` is a
/// typed error.
pub fn price_to_micros(s: &str, field: &'static str) -> Result<i64, FixedPointError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(FixedPointError::Empty { field });
    }
    let invalid = || FixedPointError::Invalid {
        field,
        raw: trimmed.to_string(),
    };
    let overflow = || FixedPointError::Overflow {
        context: "price_to_micros",
    };

    let (negative, body) = match trimmed.as_bytes()[0] {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut magnitude: i128 = 0;
    // None until the separator is seen, then counts fractional digits.
    let mut frac_seen: Option<u32> = None;
    let mut any_digit = false;

    for c in body.chars() {
        match c {
            '0'..='9' => {
                if let Some(n) = frac_seen {
                    if n == 6 {
                        return Err(FixedPointError::TooManyDecimalPlaces {
                            field,
                            raw: trimmed.to_string(),
                        });
                    }
                    frac_seen = Some(n + 1);
                }
                any_digit = true;
                magnitude = magnitude * 10 + i128::from(c as u8 - b'0');
                if magnitude > i64::MAX as i128 {
                    return Err(overflow());
                }
            }
            '.' if frac_seen.is_none() => frac_seen = Some(0),
            _ => return Err(invalid()),
        }
    }
    if !any_digit {
        return Err(invalid());
    }

    for _ in frac_seen.unwrap_or(0)..6 {
        magnitude *= 10;
    }
    if magnitude > i64::MAX as i128 {
        return Err(overflow());
    }

    Ok(if negative {
        -(magnitude as i64)
    } else {
        magnitude as i64
    })
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render a micros value as a canonical decimal string: sign, integer part,
/// `.`, exactly six fractional digits. `render_micros(1_500_000)` → `"1.500000"`.
///
/// This is the single rendering used in artifact streams; fixed width keeps
/// the serialization (and therefore the stream hashes) byte-stable.
pub fn render_micros(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    let int_part = abs / MICROS_SCALE as u64;
    let frac_part = abs % MICROS_SCALE as u64;
    format!("{sign}{int_part}.{frac_part:06}")
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

/// Multiply a per-unit price (micros) by a quantity (micros), yielding a
/// notional in micros. Computed in `i128` then clamped back to `i64` range
/// via an explicit overflow error.
pub fn mul_price_qty(price_micros: i64, qty_micros: i64) -> Result<i64, FixedPointError> {
    let wide = (price_micros as i128) * (qty_micros as i128) / (MICROS_SCALE as i128);
    i128_to_i64(wide, "mul_price_qty")
}

/// Apply a basis-point ratio to a micros value: `value × bps / 10_000`,
/// truncating toward zero. Used for commission, slippage, and exposure caps.
pub fn apply_bps(value_micros: i64, bps: i64) -> Result<i64, FixedPointError> {
    let wide = (value_micros as i128) * (bps as i128) / (BPS_SCALE as i128);
    i128_to_i64(wide, "apply_bps")
}

fn i128_to_i64(x: i128, context: &'static str) -> Result<i64, FixedPointError> {
    if x > i64::MAX as i128 || x < i64::MIN as i128 {
        return Err(FixedPointError::Overflow { context });
    }
    Ok(x as i64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
