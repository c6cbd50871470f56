// In crates/risk/src/lib.rs

//! Safety rules that hold regardless of what the decision step proposes.
//!
//! * [`rules::RiskRuleEngine`] decides whether a position, or the whole account,
//!   must be closed right now.
//! * [`validation::ValidationGate`] decides whether a proposed close matches the
//!   exit plan the position was opened with.

pub mod error;
pub mod exit_plan;
pub mod rules;
pub mod types;
pub mod validation;

// Re-export public types
pub use error::{Error, Result};
pub use exit_plan::{extract_conditions, ConditionType};
pub use rules::{AccountBreach, CloseReason, PositionCheck, RiskRuleEngine};
pub use types::{LeverageTier, PositionRuleSettings, RiskSettings, TrailingTier};
pub use validation::{Validation, ValidationGate};
