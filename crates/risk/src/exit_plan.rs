// In crates/risk/src/exit_plan.rs

//! Keyword classification of free-text exit plans and close reasons.
//!
//! Plans and reasons are written in Chinese or English. Each [`ConditionType`]
//! owns a keyword list; a text carries every type whose keywords appear in it.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    StopLoss,
    TakeProfit,
    Trailing,
    Structure,
    Reversal,
    Indicator,
    Timeout,
}

impl ConditionType {
    pub const ALL: [ConditionType; 7] = [
        ConditionType::StopLoss,
        ConditionType::TakeProfit,
        ConditionType::Trailing,
        ConditionType::Structure,
        ConditionType::Reversal,
        ConditionType::Indicator,
        ConditionType::Timeout,
    ];

    /// Conditions allowed to close a position before the minimum holding time.
    pub fn is_urgent(&self) -> bool {
        matches!(
            self,
            ConditionType::StopLoss | ConditionType::Trailing | ConditionType::Structure
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::StopLoss => "stop_loss",
            ConditionType::TakeProfit => "take_profit",
            ConditionType::Trailing => "trailing",
            ConditionType::Structure => "structure",
            ConditionType::Reversal => "reversal",
            ConditionType::Indicator => "indicator",
            ConditionType::Timeout => "timeout",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            ConditionType::StopLoss => &[
                "止损", "止蚀", "stop loss", "stop-loss", "stoploss", "stop out", "stopped out",
            ],
            ConditionType::TakeProfit => &[
                "止盈", "获利了结", "目标价", "目标位", "take profit", "take-profit", "takeprofit",
                "profit target", "price target",
            ],
            ConditionType::Trailing => &[
                "移动止损", "追踪止损", "跟踪止损", "移动止盈", "回撤止盈", "trailing", "trail stop",
            ],
            ConditionType::Structure => &[
                "跌破", "突破", "破位", "支撑", "阻力", "结构", "颈线", "support", "resistance",
                "breakdown", "breakout", "break below", "break above", "structure", "neckline",
            ],
            ConditionType::Reversal => &[
                "反转", "转向", "掉头", "趋势改变", "reversal", "reverse", "trend change",
                "trend flip",
            ],
            ConditionType::Indicator => &[
                "指标", "均线", "金叉", "死叉", "背离", "超买", "超卖", "布林", "rsi", "macd", "ema",
                "sma", "kdj", "atr", "bollinger", "moving average", "indicator", "divergence",
                "overbought", "oversold",
            ],
            ConditionType::Timeout => &[
                "超时", "持仓时间", "持仓超过", "时间止损", "小时", "timeout", "time limit",
                "time stop", "holding time", "hours",
            ],
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every condition type mentioned in `text`, in taxonomy order.
pub fn extract_conditions(text: &str) -> Vec<ConditionType> {
    let haystack = text.to_lowercase();
    ConditionType::ALL
        .into_iter()
        .filter(|ty| ty.keywords().iter().any(|kw| contains_keyword(&haystack, kw)))
        .collect()
}

/// ASCII keywords must sit on word boundaries ("ema" must not match "remain").
/// CJK keywords have no word boundaries and match as plain substrings.
fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return haystack.contains(keyword);
    }
    let is_word = |c: char| c.is_ascii_alphanumeric();
    haystack.match_indices(keyword).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + keyword.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_stop_loss_plan() {
        assert_eq!(extract_conditions("止损 $95,000"), vec![ConditionType::StopLoss]);
        assert_eq!(
            extract_conditions("触发止损，跌破95000"),
            vec![ConditionType::StopLoss, ConditionType::Structure]
        );
    }

    #[test]
    fn english_plan_with_several_conditions() {
        let found = extract_conditions("Stop-loss at 95k, take profit 110k, exit if RSI > 80");
        assert_eq!(
            found,
            vec![ConditionType::StopLoss, ConditionType::TakeProfit, ConditionType::Indicator]
        );
    }

    #[test]
    fn unrelated_text_yields_nothing() {
        assert!(extract_conditions("市场剧烈波动").is_empty());
        assert!(extract_conditions("market looks choppy, remain cautious").is_empty());
    }

    #[test]
    fn ascii_keywords_respect_word_boundaries() {
        assert!(contains_keyword("rsi超买", "rsi"));
        assert!(contains_keyword("exit on ema cross", "ema"));
        assert!(!contains_keyword("remain flat", "ema"));
        assert!(!contains_keyword("the support-ish zone", "supports"));
    }

    #[test]
    fn urgent_types() {
        let urgent: Vec<_> = ConditionType::ALL.into_iter().filter(|t| t.is_urgent()).collect();
        assert_eq!(
            urgent,
            vec![ConditionType::StopLoss, ConditionType::Trailing, ConditionType::Structure]
        );
    }
}
