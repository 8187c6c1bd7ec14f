//! # cascadeflow-telemetry
//!
//! Cost, usage, and quality telemetry:
//!
//! - [`CostTracker`] — append-only cost ledger with per-tenant budget windows,
//!   enforcement callbacks, and JSON/CSV/SQLite exports
//! - [`CostCalculator`] — per-request cost breakdown for cascade results
//! - [`MetricsCollector`] — aggregate request statistics and savings
//! - [`CallbackManager`] — event hooks for monitoring

pub mod callbacks;
pub mod collector;
pub mod cost_calculator;
pub mod cost_tracker;

pub use callbacks::{CallbackData, CallbackEvent, CallbackManager};
pub use collector::{MetricsCollector, MetricsSummary};
pub use cost_calculator::{CostBreakdown, CostCalculator};
pub use cost_tracker::{
    BudgetConfig, BudgetWindow, CostEntry, CostTracker, EnforcementAction, EnforcementContext,
    EnforcementMode, graceful_enforcement, strict_enforcement, tier_based_enforcement,
};
