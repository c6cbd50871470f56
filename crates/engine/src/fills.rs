// In crates/engine/src/fills.rs

use chrono::{DateTime, Utc};
use execution::Fill;
use rust_decimal::Decimal;

/// What an exchange order status means for the local order state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeStatus {
    /// NEW or PARTIALLY_FILLED: the order stays Active.
    Working,
    Filled,
    Canceled,
    /// REJECTED or EXPIRED.
    Failed,
    /// Anything else. Logged and left untouched.
    Unrecognized(String),
}

/// Maps the raw exchange status. Matching is exact; unknown spellings are never guessed at.
pub fn map_exchange_status(status: &str) -> ExchangeStatus {
    match status {
        "NEW" | "PARTIALLY_FILLED" => ExchangeStatus::Working,
        "FILLED" => ExchangeStatus::Filled,
        "CANCELED" => ExchangeStatus::Canceled,
        "REJECTED" | "EXPIRED" => ExchangeStatus::Failed,
        other => ExchangeStatus::Unrecognized(other.to_string()),
    }
}

/// All fills of one order folded into a single execution.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedFill {
    /// Quantity-weighted average price.
    pub avg_price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub realized_pnl: Decimal,
    /// Time of the last fill, when the order completed.
    pub completed_at: DateTime<Utc>,
}

/// Returns `None` when there is nothing to aggregate.
pub fn aggregate_fills(fills: &[Fill]) -> Option<AggregatedFill> {
    let completed_at = fills.iter().map(|f| f.time).max()?;
    let quantity: Decimal = fills.iter().map(|f| f.quantity).sum();
    if quantity <= Decimal::ZERO {
        return None;
    }
    let notional: Decimal = fills.iter().map(|f| f.price * f.quantity).sum();

    Some(AggregatedFill {
        avg_price: notional / quantity,
        quantity,
        commission: fills.iter().map(|f| f.commission).sum(),
        realized_pnl: fills.iter().map(|f| f.realized_pnl).sum(),
        completed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn fill(price: Decimal, quantity: Decimal, second: u32) -> Fill {
        Fill {
            order_id: 9,
            price,
            quantity,
            commission: dec!(0.1),
            realized_pnl: dec!(-2.5),
            time: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, second).unwrap(),
        }
    }

    #[test]
    fn statuses_map_exactly() {
        assert_eq!(map_exchange_status("NEW"), ExchangeStatus::Working);
        assert_eq!(map_exchange_status("PARTIALLY_FILLED"), ExchangeStatus::Working);
        assert_eq!(map_exchange_status("FILLED"), ExchangeStatus::Filled);
        assert_eq!(map_exchange_status("CANCELED"), ExchangeStatus::Canceled);
        assert_eq!(map_exchange_status("REJECTED"), ExchangeStatus::Failed);
        assert_eq!(map_exchange_status("EXPIRED"), ExchangeStatus::Failed);
        assert_eq!(
            map_exchange_status("filled"),
            ExchangeStatus::Unrecognized("filled".into())
        );
        assert_eq!(
            map_exchange_status("EXPIRED_IN_MATCH"),
            ExchangeStatus::Unrecognized("EXPIRED_IN_MATCH".into())
        );
    }

    #[test]
    fn fills_aggregate_to_weighted_price_and_last_time() {
        let fills = vec![
            fill(dec!(95000), dec!(0.01), 5),
            fill(dec!(94900), dec!(0.03), 9),
            fill(dec!(94950), dec!(0.01), 7),
        ];
        let agg = aggregate_fills(&fills).unwrap();
        // (950 + 2847 + 949.5) / 0.05
        assert_eq!(agg.avg_price, dec!(94930));
        assert_eq!(agg.quantity, dec!(0.05));
        assert_eq!(agg.commission, dec!(0.3));
        assert_eq!(agg.realized_pnl, dec!(-7.5));
        assert_eq!(agg.completed_at, Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 9).unwrap());
    }

    #[test]
    fn no_fills_aggregate_to_nothing() {
        assert!(aggregate_fills(&[]).is_none());
    }
}
