// In crates/risk/src/rules.rs

use crate::types::{LeverageTier, PositionRuleSettings, RiskSettings, TrailingTier};
use chrono::{DateTime, Utc};
use core_types::{AccountMetrics, Position};
use num_traits::ToPrimitive;
use std::fmt;

/// Why a single position must be closed.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    MaxHoldingTime { hours: f64, limit: f64 },
    StopLoss { pnl_percent: f64, threshold: f64 },
    TrailingStop { pnl_percent: f64, peak_pnl_percent: f64, lock_percent: f64 },
    PeakDrawdown { pnl_percent: f64, peak_pnl_percent: f64, drawdown_percent: f64 },
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::MaxHoldingTime { hours, limit } => {
                write!(f, "holding time {:.1}h reached the {:.0}h limit", hours, limit)
            }
            CloseReason::StopLoss { pnl_percent, threshold } => {
                write!(f, "stop-loss: pnl {:.2}% at or below {:.2}%", pnl_percent, threshold)
            }
            CloseReason::TrailingStop { pnl_percent, peak_pnl_percent, lock_percent } => write!(
                f,
                "trailing stop: pnl {:.2}% fell below locked {:.2}% (peak {:.2}%)",
                pnl_percent, lock_percent, peak_pnl_percent
            ),
            CloseReason::PeakDrawdown { pnl_percent, peak_pnl_percent, drawdown_percent } => write!(
                f,
                "peak drawdown: pnl {:.2}% gave back {:.1}% of peak {:.2}%",
                pnl_percent, drawdown_percent, peak_pnl_percent
            ),
        }
    }
}

/// Outcome of evaluating one position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionCheck {
    /// The stored peak ratcheted up to the current pnl when that is higher.
    pub peak_pnl_percent: f64,
    pub close: Option<CloseReason>,
}

impl PositionCheck {
    pub fn should_close(&self) -> bool {
        self.close.is_some()
    }
}

/// A condition that closes every position and stops the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountBreach {
    StopLoss { balance: f64, threshold: f64 },
    TakeProfit { balance: f64, threshold: f64 },
    MaxDrawdown { drawdown_percent: f64, limit: f64 },
}

impl fmt::Display for AccountBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountBreach::StopLoss { balance, threshold } => write!(
                f,
                "account stop-loss: balance {:.2} at or below {:.2}",
                balance, threshold
            ),
            AccountBreach::TakeProfit { balance, threshold } => write!(
                f,
                "account take-profit: balance {:.2} reached {:.2}",
                balance, threshold
            ),
            AccountBreach::MaxDrawdown { drawdown_percent, limit } => write!(
                f,
                "account drawdown {:.2}% from peak breached the {:.2}% limit",
                drawdown_percent, limit
            ),
        }
    }
}

/// Pure evaluation of the risk rules. Holds no state besides its settings.
#[derive(Debug, Clone)]
pub struct RiskRuleEngine {
    settings: RiskSettings,
}

impl RiskRuleEngine {
    /// Creates a new engine. Tier tables are sorted so the tightest tier is checked first.
    pub fn new(mut settings: RiskSettings) -> Self {
        settings
            .rules
            .leverage_tiers
            .sort_by(|a, b| b.min_leverage.cmp(&a.min_leverage));
        settings
            .rules
            .trailing_tiers
            .sort_by(|a, b| b.min_pnl_percent.total_cmp(&a.min_pnl_percent));
        Self { settings }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    /// Account gates, evaluated once per cycle before any per-position rule.
    pub fn check_account(&self, metrics: &AccountMetrics) -> Option<AccountBreach> {
        let balance = metrics.total_balance.to_f64().unwrap_or(0.0);

        if let Some(threshold) = self.settings.account_stop_loss_balance {
            if balance <= threshold {
                return Some(AccountBreach::StopLoss { balance, threshold });
            }
        }
        if let Some(threshold) = self.settings.account_take_profit_balance {
            if balance >= threshold {
                return Some(AccountBreach::TakeProfit { balance, threshold });
            }
        }
        if metrics.drawdown_from_peak >= self.settings.max_drawdown_percent {
            return Some(AccountBreach::MaxDrawdown {
                drawdown_percent: metrics.drawdown_from_peak,
                limit: self.settings.max_drawdown_percent,
            });
        }
        None
    }

    /// Per-position rules, first match wins:
    /// holding-time ceiling, leverage-tiered stop-loss, trailing stop, peak drawdown.
    pub fn check_position(&self, position: &Position, now: DateTime<Utc>) -> PositionCheck {
        let rules = &self.settings.rules;
        let pnl = position.pnl_percent();
        let peak = position.peak_pnl_percent.max(pnl);

        let close = self
            .holding_time(rules, position, now)
            .or_else(|| {
                let threshold = self.stop_loss_threshold(position.leverage);
                (pnl <= threshold).then_some(CloseReason::StopLoss { pnl_percent: pnl, threshold })
            })
            .or_else(|| self.trailing_stop(position.leverage, pnl, peak))
            .or_else(|| peak_drawdown(rules, pnl, peak));

        PositionCheck { peak_pnl_percent: peak, close }
    }

    fn holding_time(
        &self,
        rules: &PositionRuleSettings,
        position: &Position,
        now: DateTime<Utc>,
    ) -> Option<CloseReason> {
        let hours = position.holding_hours(now);
        (hours >= rules.max_holding_hours).then_some(CloseReason::MaxHoldingTime {
            hours,
            limit: rules.max_holding_hours,
        })
    }

    /// The hard stop for a leverage level. Higher leverage means a tighter stop.
    pub fn stop_loss_threshold(&self, leverage: u32) -> f64 {
        let rules = &self.settings.rules;
        rules
            .leverage_tiers
            .iter()
            .find(|LeverageTier { min_leverage, .. }| leverage >= *min_leverage)
            .map(|tier| tier.stop_loss_percent)
            .unwrap_or(rules.default_stop_loss_percent)
    }

    /// The level the trailing stop has locked in, given the best pnl seen so far.
    /// Falls back to the hard stop below the first tier.
    pub fn trailing_threshold(&self, leverage: u32, peak_pnl_percent: f64) -> f64 {
        self.settings
            .rules
            .trailing_tiers
            .iter()
            .find(|TrailingTier { min_pnl_percent, .. }| peak_pnl_percent >= *min_pnl_percent)
            .map(|tier| tier.lock_percent)
            .unwrap_or_else(|| self.stop_loss_threshold(leverage))
    }

    fn trailing_stop(&self, leverage: u32, pnl: f64, peak: f64) -> Option<CloseReason> {
        let stop_loss = self.stop_loss_threshold(leverage);
        let lock = self.trailing_threshold(leverage, peak);
        // The trailing level must never be looser than the hard stop.
        (pnl < lock && lock > stop_loss).then_some(CloseReason::TrailingStop {
            pnl_percent: pnl,
            peak_pnl_percent: peak,
            lock_percent: lock,
        })
    }
}

fn peak_drawdown(rules: &PositionRuleSettings, pnl: f64, peak: f64) -> Option<CloseReason> {
    if peak <= rules.drawdown_arm_percent {
        return None;
    }
    let drawdown = (peak - pnl) / peak * 100.0;
    (drawdown >= rules.drawdown_close_percent).then_some(CloseReason::PeakDrawdown {
        pnl_percent: pnl,
        peak_pnl_percent: peak,
        drawdown_percent: drawdown,
    })
}
