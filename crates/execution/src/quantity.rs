// In crates/execution/src/quantity.rs

use crate::types::SymbolInfo;
use crate::{Error, Result};
use rust_decimal::Decimal;

/// Rounds `value` down to a whole number of `step`s. A non-positive step leaves it unchanged.
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

/// Rounds `price` to the nearest tick.
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    ((price / tick).round() * tick).normalize()
}

/// Floors `quantity` to the symbol's step size and precision.
///
/// Rounding never goes up, so an order can never be larger than requested.
pub fn format_quantity(info: &SymbolInfo, quantity: Decimal) -> Result<Decimal> {
    let stepped = floor_to_step(quantity, info.step_size)
        .round_dp_with_strategy(info.quantity_precision, rust_decimal::RoundingStrategy::ToZero)
        .normalize();

    if stepped <= Decimal::ZERO || stepped < info.min_qty {
        return Err(Error::QuantityTooSmall {
            symbol: info.symbol.clone(),
            quantity,
            min_qty: info.min_qty,
        });
    }
    Ok(stepped)
}
