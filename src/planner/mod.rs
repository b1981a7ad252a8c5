//! Planning module for deployment operations.
//!
//! This module compares desired and observed state, produces the ordered
//! action list and applies it.

mod engine;
mod executor;
mod plan;

pub use engine::DeploymentPlanner;
pub use executor::{DeploymentExecutor, DeploymentResult, ExecutionReport, Outcome};
pub use plan::{ActionKind, ActionPayload, DeploymentPlan, InstancePayload, ReconciliationAction};
