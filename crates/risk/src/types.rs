// In crates/risk/src/types.rs

use crate::{Error, Result};
use serde::Deserialize;

/// Account-level gates plus the per-position rule table.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskSettings {
    /// Close everything and stop when total balance falls to or below this value.
    #[serde(default)]
    pub account_stop_loss_balance: Option<f64>,
    /// Close everything and stop when total balance reaches this value.
    #[serde(default)]
    pub account_take_profit_balance: Option<f64>,
    /// Close everything and stop when drawdown from the peak balance reaches this percent.
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown_percent: f64,
    /// Reject decision-step closes when the exit plan yields no recognizable condition.
    #[serde(default)]
    pub require_exit_plan_conditions: bool,
    /// Minimum holding time before a non-urgent close is accepted.
    #[serde(default = "default_min_holding_minutes")]
    pub min_holding_minutes: i64,
    #[serde(default)]
    pub rules: PositionRuleSettings,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            account_stop_loss_balance: None,
            account_take_profit_balance: None,
            max_drawdown_percent: default_max_drawdown(),
            require_exit_plan_conditions: false,
            min_holding_minutes: default_min_holding_minutes(),
            rules: PositionRuleSettings::default(),
        }
    }
}

impl RiskSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_drawdown_percent <= 0.0 || self.max_drawdown_percent > 100.0 {
            return Err(Error::InvalidParameters(format!(
                "max_drawdown_percent must be within (0, 100], got {}",
                self.max_drawdown_percent
            )));
        }
        if let (Some(sl), Some(tp)) = (self.account_stop_loss_balance, self.account_take_profit_balance) {
            if sl >= tp {
                return Err(Error::InvalidParameters(format!(
                    "account stop-loss balance {} must be below take-profit balance {}",
                    sl, tp
                )));
            }
        }
        if self.min_holding_minutes < 0 {
            return Err(Error::InvalidParameters("min_holding_minutes must not be negative".into()));
        }
        self.rules.validate()
    }
}

/// Stop-loss threshold that applies from `min_leverage` upward.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LeverageTier {
    pub min_leverage: u32,
    /// Negative pnl percent, e.g. `-3.0`.
    pub stop_loss_percent: f64,
}

/// Profit that is locked in once the peak pnl reaches `min_pnl_percent`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TrailingTier {
    pub min_pnl_percent: f64,
    pub lock_percent: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionRuleSettings {
    #[serde(default = "default_max_holding_hours")]
    pub max_holding_hours: f64,
    #[serde(default = "default_leverage_tiers")]
    pub leverage_tiers: Vec<LeverageTier>,
    #[serde(default = "default_stop_loss")]
    pub default_stop_loss_percent: f64,
    #[serde(default = "default_trailing_tiers")]
    pub trailing_tiers: Vec<TrailingTier>,
    /// Peak-drawdown protection only engages above this peak pnl.
    #[serde(default = "default_drawdown_arm")]
    pub drawdown_arm_percent: f64,
    /// Relative giveback from the peak, in percent of the peak.
    #[serde(default = "default_drawdown_close")]
    pub drawdown_close_percent: f64,
}

impl Default for PositionRuleSettings {
    fn default() -> Self {
        Self {
            max_holding_hours: default_max_holding_hours(),
            leverage_tiers: default_leverage_tiers(),
            default_stop_loss_percent: default_stop_loss(),
            trailing_tiers: default_trailing_tiers(),
            drawdown_arm_percent: default_drawdown_arm(),
            drawdown_close_percent: default_drawdown_close(),
        }
    }
}

impl PositionRuleSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_holding_hours <= 0.0 {
            return Err(Error::InvalidParameters("max_holding_hours must be positive".into()));
        }
        let stops = self
            .leverage_tiers
            .iter()
            .map(|t| t.stop_loss_percent)
            .chain(std::iter::once(self.default_stop_loss_percent));
        for stop in stops {
            if stop >= 0.0 {
                return Err(Error::InvalidTier {
                    table: "leverage",
                    reason: format!("stop-loss thresholds must be negative, got {}", stop),
                });
            }
        }
        for tier in &self.trailing_tiers {
            if tier.lock_percent >= tier.min_pnl_percent {
                return Err(Error::InvalidTier {
                    table: "trailing",
                    reason: format!(
                        "{}% locks {}%, which is not below its activation level",
                        tier.min_pnl_percent, tier.lock_percent
                    ),
                });
            }
        }
        if self.drawdown_close_percent <= 0.0 || self.drawdown_close_percent > 100.0 {
            return Err(Error::InvalidParameters(format!(
                "drawdown_close_percent must be within (0, 100], got {}",
                self.drawdown_close_percent
            )));
        }
        Ok(())
    }
}

/// Helper functions for serde defaults
fn default_max_drawdown() -> f64 { 20.0 }
fn default_min_holding_minutes() -> i64 { 60 }
fn default_max_holding_hours() -> f64 { 36.0 }
fn default_stop_loss() -> f64 { -5.0 }
fn default_drawdown_arm() -> f64 { 5.0 }
fn default_drawdown_close() -> f64 { 30.0 }

fn default_leverage_tiers() -> Vec<LeverageTier> {
    vec![
        LeverageTier { min_leverage: 12, stop_loss_percent: -3.0 },
        LeverageTier { min_leverage: 8, stop_loss_percent: -4.0 },
    ]
}

fn default_trailing_tiers() -> Vec<TrailingTier> {
    vec![
        TrailingTier { min_pnl_percent: 25.0, lock_percent: 15.0 },
        TrailingTier { min_pnl_percent: 15.0, lock_percent: 8.0 },
        TrailingTier { min_pnl_percent: 8.0, lock_percent: 3.0 },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RiskSettings::default().validate().unwrap();
    }

    #[test]
    fn trailing_lock_above_activation_is_rejected() {
        let mut rules = PositionRuleSettings::default();
        rules.trailing_tiers.push(TrailingTier { min_pnl_percent: 4.0, lock_percent: 6.0 });
        assert!(rules.validate().is_err());
    }

    #[test]
    fn inverted_account_bounds_are_rejected() {
        let settings = RiskSettings {
            account_stop_loss_balance: Some(900.0),
            account_take_profit_balance: Some(800.0),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
