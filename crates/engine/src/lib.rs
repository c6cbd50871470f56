// In crates/engine/src/lib.rs

pub mod actions;
pub mod cycle;
pub mod decision;
pub mod error;
pub mod fills;
pub mod orchestrator;
pub mod reconciler;

pub use actions::{CloseSweep, OpenRequest};
pub use cycle::{CycleConfig, CycleSummary, TradingCycle};
pub use decision::{
    ActionOutcome, Checked, DecisionContext, DecisionOutput, DecisionProvider, DecisionRequest,
    HoldProvider, MarketSnapshot, Outcome, PositionView, Proposal, Rejection,
};
pub use error::{Error, Result};
pub use orchestrator::{next_aligned_tick, Engine, EngineStatus};
pub use reconciler::{OpenLimits, Reconciler, SyncReport};
