//! Planning module for reconciliation passes.
//!
//! This module handles the comparison between desired and observed users,
//! turning the differences into plans and applying them to a pool.

mod diff;
mod hash;
mod plan;
mod executor;

pub use diff::{DiffDetail, DiffEngine, OperationKind, ReconcileOperation};
pub use hash::SpecHasher;
pub use plan::ReconcilePlan;
pub use executor::{bounded_call, ExecutionOutcome, ExecutionResult, PlanExecutor, DEFAULT_CALL_TIMEOUT};
