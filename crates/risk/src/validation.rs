// In crates/risk/src/validation.rs

use crate::exit_plan::{extract_conditions, ConditionType};
use crate::types::RiskSettings;
use chrono::{DateTime, Utc};
use core_types::Position;

/// Verdict on a proposed close.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// `matched` is the condition type the reason was accepted under, for audit logging.
    Allowed { matched: Option<ConditionType> },
    /// A human-readable explanation the decision step can correct against.
    Rejected { explanation: String },
}

impl Validation {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Validation::Allowed { .. })
    }
}

/// Checks that a proposed close follows the position's own exit plan and respects
/// the minimum holding time.
#[derive(Debug, Clone)]
pub struct ValidationGate {
    min_holding_minutes: i64,
    require_plan_conditions: bool,
}

impl ValidationGate {
    pub fn new(min_holding_minutes: i64, require_plan_conditions: bool) -> Self {
        Self { min_holding_minutes, require_plan_conditions }
    }

    pub fn from_settings(settings: &RiskSettings) -> Self {
        Self::new(settings.min_holding_minutes, settings.require_exit_plan_conditions)
    }

    pub fn validate(&self, position: &Position, proposed_reason: &str, now: DateTime<Utc>) -> Validation {
        let plan_types = extract_conditions(&position.exit_plan);
        let reason_types = extract_conditions(proposed_reason);

        let matched = if plan_types.is_empty() {
            if self.require_plan_conditions {
                return Validation::Rejected {
                    explanation: format!(
                        "Close rejected: the exit plan for {} {} has no recognizable exit condition. Exit plan: \"{}\"",
                        position.symbol, position.side, position.exit_plan
                    ),
                };
            }
            tracing::warn!(
                symbol = %position.symbol,
                side = %position.side,
                exit_plan = %position.exit_plan,
                "Exit plan has no recognizable conditions; skipping plan matching."
            );
            strongest(reason_types.iter().copied())
        } else {
            let shared = reason_types.iter().copied().filter(|ty| plan_types.contains(ty));
            match strongest(shared) {
                Some(ty) => Some(ty),
                None => {
                    let planned: Vec<&str> = plan_types.iter().map(|t| t.as_str()).collect();
                    return Validation::Rejected {
                        explanation: format!(
                            "Close rejected: reason \"{}\" does not match any condition of the exit plan \"{}\" (plan conditions: {}). Close only when a planned condition is met.",
                            proposed_reason,
                            position.exit_plan,
                            planned.join(", ")
                        ),
                    };
                }
            }
        };

        let held = position.holding_minutes(now);
        if held < self.min_holding_minutes && !matched.is_some_and(|ty| ty.is_urgent()) {
            return Validation::Rejected {
                explanation: format!(
                    "Close rejected: {} {} has been held {} minutes, below the {} minute minimum. Only stop-loss, trailing-stop or structure-break exits may close earlier.",
                    position.symbol, position.side, held, self.min_holding_minutes
                ),
            };
        }

        Validation::Allowed { matched }
    }
}

/// The first urgent type, else the first type at all.
fn strongest(types: impl Iterator<Item = ConditionType>) -> Option<ConditionType> {
    let mut first = None;
    for ty in types {
        if ty.is_urgent() {
            return Some(ty);
        }
        first.get_or_insert(ty);
    }
    first
}
