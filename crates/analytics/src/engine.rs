use core_types::{AccountMetrics, AccountSnapshot};
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

/// The balances reported by the exchange at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BalanceReading {
    /// Wallet balance plus unrealized pnl.
    pub total: Decimal,
    pub available: Decimal,
    pub unrealized_pnl: Decimal,
}

/// The engine responsible for deriving account metrics from balance history.
#[derive(Default)]
pub struct AnalyticsEngine;

impl AnalyticsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the account metrics for the live reading.
    ///
    /// `history` is the stored snapshots in chronological order. The initial balance is
    /// `initial_balance` when configured, otherwise the first snapshot, otherwise the
    /// live total. The peak covers every snapshot plus the live total, so it only grows.
    pub fn account_metrics(
        &self,
        live: BalanceReading,
        history: &[AccountSnapshot],
        initial_balance: Option<Decimal>,
    ) -> AccountMetrics {
        let initial = initial_balance
            .or_else(|| history.first().map(|s| s.total_balance))
            .unwrap_or(live.total);

        let peak = history
            .iter()
            .map(|s| s.total_balance)
            .fold(live.total.max(initial), Decimal::max);

        let mut metrics = AccountMetrics {
            total_balance: live.total,
            available: live.available,
            unrealized_pnl: live.unrealized_pnl,
            initial_balance: initial,
            peak_balance: peak,
            ..Default::default()
        };

        if initial > dec!(0) {
            metrics.return_percent = percent(live.total - initial, initial);
            metrics.drawdown_from_initial = percent((initial - live.total).max(dec!(0)), initial);
        }
        if peak > dec!(0) {
            metrics.drawdown_from_peak = percent(peak - live.total, peak);
        }

        let mut curve: Vec<Decimal> = history.iter().map(|s| s.total_balance).collect();
        curve.push(live.total);
        metrics.sharpe_ratio = sharpe_ratio(&curve);

        metrics
    }
}

fn percent(part: Decimal, whole: Decimal) -> f64 {
    (part / whole).to_f64().unwrap_or(0.0) * 100.0
}

/// Periodic Sharpe ratio of the balance curve. Zero when there is no variance.
pub fn sharpe_ratio(curve: &[Decimal]) -> f64 {
    if curve.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = curve
        .windows(2)
        .filter(|w| w[0] > dec!(0))
        .map(|w| (w[1] / w[0] - dec!(1)).to_f64().unwrap_or(0.0))
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
    let std_dev = {
        let variance = returns.iter().map(|r| (*r - mean_return).powi(2)).sum::<f64>() / returns.len() as f64;
        variance.sqrt()
    };
    if std_dev > 0.0 { mean_return / std_dev } else { 0.0 }
}
