//! Reconcile plan types.
//!
//! A plan is the diff for one resource, frozen together with the resource
//! key and the hash of the desired record it was computed from.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::{DesiredUser, ObservedUser};
use crate::store::ResourceKey;

use super::diff::{DiffEngine, OperationKind, ReconcileOperation};
use super::hash::SpecHasher;

/// The operations one pass will apply to one user.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcilePlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Resource the plan belongs to.
    pub key: ResourceKey,
    /// Desired record the plan converges to.
    pub desired: DesiredUser,
    /// Whether the user exists in the pool.
    pub observed: Option<ObservedUser>,
    /// Operations in execution order.
    pub operations: Vec<ReconcileOperation>,
    /// Hash of the desired record.
    pub spec_hash: String,
}

impl ReconcilePlan {
    /// Builds the plan for a resource from what the pool reported.
    #[must_use]
    pub fn build(
        key: &ResourceKey,
        desired: &DesiredUser,
        observed: Option<ObservedUser>,
        deleting: bool,
    ) -> Self {
        let operations = DiffEngine::new().compute(desired, observed.as_ref(), deleting);
        Self {
            created_at: Utc::now(),
            key: key.clone(),
            desired: desired.clone(),
            observed,
            operations,
            spec_hash: SpecHasher::new().hash_user(desired),
        }
    }

    /// Returns true if the plan has nothing to apply.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the number of operations.
    #[must_use]
    pub const fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Returns the operation kinds in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<OperationKind> {
        self.operations.iter().map(|o| o.kind).collect()
    }
}

impl std::fmt::Display for ReconcilePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.operations.is_empty() {
            return write!(f, "No changes required for {}", self.key);
        }

        writeln!(f, "Plan for {} ({} operations):", self.key, self.operations.len())?;
        for (i, op) in self.operations.iter().enumerate() {
            writeln!(f, "  {}. {op}", i + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_for_new_user() {
        let key = ResourceKey::parse("alice");
        let desired = DesiredUser::new("alice", "a@x.com", true);
        let plan = ReconcilePlan::build(&key, &desired, None, false);

        assert_eq!(plan.kinds(), vec![OperationKind::Create]);
        assert_eq!(plan.spec_hash.len(), 64);
        assert!(plan.to_string().contains("1. create alice"));
    }

    #[test]
    fn test_empty_plan_display() {
        let key = ResourceKey::parse("team/alice");
        let desired = DesiredUser::new("alice", "a@x.com", true);
        let plan = ReconcilePlan::build(&key, &desired, Some(desired.to_observed()), false);

        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "No changes required for team/alice");
    }
}
