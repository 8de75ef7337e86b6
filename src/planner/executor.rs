//! Plan executor for applying reconcile plans.
//!
//! Operations run strictly in order. The first failure stops the pass and the
//! already-applied prefix is reported back instead of being rolled back.
//! Every backend call is raced against the pass's cancellation token and a
//! per-call deadline.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendResult, IdentityBackend};
use crate::error::BackendError;

use super::diff::{OperationKind, ReconcileOperation};
use super::plan::ReconcilePlan;

/// Default deadline for a single backend call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Executor for reconcile plans.
#[derive(Debug)]
pub struct PlanExecutor<'a, B: IdentityBackend + ?Sized> {
    /// Pool the plan is applied to.
    backend: &'a B,
    /// Deadline for each backend call.
    call_timeout: Duration,
}

/// How a plan execution ended.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Every operation was applied.
    Completed,
    /// An operation failed; the rest were not attempted.
    Failed {
        /// Operation that failed.
        operation: ReconcileOperation,
        /// Backend failure.
        error: BackendError,
    },
    /// The pass was cancelled before the next operation.
    Cancelled,
}

/// Result of executing a plan.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Operations applied, in order.
    pub applied: Vec<ReconcileOperation>,
    /// How the execution ended.
    pub outcome: ExecutionOutcome,
    /// A create found the user already in the pool. Its attributes were not
    /// compared, so the record may still differ from the plan's target.
    pub adopted_existing: bool,
}

/// Runs a backend call bounded by cancellation and a deadline.
///
/// Returns `None` if the token fired first. A deadline overrun is reported
/// as an `Unavailable` failure.
pub async fn bounded_call<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    call: F,
) -> Option<BackendResult<T>>
where
    F: Future<Output = BackendResult<T>>,
{
    tokio::select! {
        () = cancel.cancelled() => None,
        result = tokio::time::timeout(timeout, call) => Some(result.unwrap_or_else(|_| {
            Err(BackendError::unavailable(format!(
                "call timed out after {}s",
                timeout.as_secs_f64()
            )))
        })),
    }
}

impl<'a, B: IdentityBackend + ?Sized> PlanExecutor<'a, B> {
    /// Creates a new executor.
    #[must_use]
    pub const fn new(backend: &'a B) -> Self {
        Self {
            backend,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Sets the per-call deadline.
    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Executes a plan.
    pub async fn execute(&self, plan: &ReconcilePlan, cancel: &CancellationToken) -> ExecutionResult {
        if plan.is_empty() {
            debug!("Nothing to apply for {}", plan.key);
            return ExecutionResult {
                applied: Vec::new(),
                outcome: ExecutionOutcome::Completed,
                adopted_existing: false,
            };
        }

        info!("Applying {} operations to {}", plan.operation_count(), plan.key);

        let mut applied = Vec::with_capacity(plan.operations.len());
        let mut adopted_existing = false;

        for operation in &plan.operations {
            if cancel.is_cancelled() {
                warn!("Pass for {} cancelled after {} operations", plan.key, applied.len());
                return ExecutionResult {
                    applied,
                    outcome: ExecutionOutcome::Cancelled,
                    adopted_existing,
                };
            }

            match bounded_call(cancel, self.call_timeout, self.apply(operation)).await {
                None => {
                    warn!("Pass for {} cancelled during {}", plan.key, operation.kind);
                    return ExecutionResult {
                        applied,
                        outcome: ExecutionOutcome::Cancelled,
                        adopted_existing,
                    };
                }
                Some(Ok(already_done)) => {
                    info!(user = %plan.key, op = %operation.kind, "Applied operation");
                    adopted_existing |= already_done && operation.is_create();
                    applied.push(operation.clone());
                }
                Some(Err(error)) => {
                    warn!(user = %plan.key, op = %operation.kind, "Operation failed: {error}");
                    return ExecutionResult {
                        applied,
                        outcome: ExecutionOutcome::Failed {
                            operation: operation.clone(),
                            error,
                        },
                        adopted_existing,
                    };
                }
            }
        }

        ExecutionResult {
            applied,
            outcome: ExecutionOutcome::Completed,
            adopted_existing,
        }
    }

    /// Applies one operation, collapsing idempotent failures into success.
    ///
    /// Returns true if the pool already held the requested state.
    async fn apply(&self, operation: &ReconcileOperation) -> BackendResult<bool> {
        let user = &operation.user;
        let result = match operation.kind {
            OperationKind::Create => self.backend.create_user(user).await,
            OperationKind::UpdateAttributes => self.backend.update_attributes(user).await,
            OperationKind::Enable => self.backend.set_enabled(&user.name, true).await,
            OperationKind::Disable => self.backend.set_enabled(&user.name, false).await,
            OperationKind::Delete => self.backend.delete_user(&user.name).await,
        };

        match result {
            Err(e) if operation.kind == OperationKind::Create && e.is_already_exists() => {
                debug!("User {} already exists, treating create as done", user.name);
                Ok(true)
            }
            Err(e) if operation.kind == OperationKind::Delete && e.is_not_found() => {
                debug!("User {} already absent, treating delete as done", user.name);
                Ok(true)
            }
            other => other.map(|()| false),
        }
    }
}

impl ExecutionResult {
    /// Returns true if every operation was applied.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Completed)
    }

    /// Returns the applied operations as display strings.
    #[must_use]
    pub fn applied_names(&self) -> Vec<String> {
        self.applied.iter().map(|o| o.kind.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOp, DesiredUser, MemoryBackend, MockIdentityBackend};
    use crate::error::ErrorKind;
    use crate::store::ResourceKey;

    fn plan_for(backend_state: Option<DesiredUser>, desired: &DesiredUser) -> ReconcilePlan {
        ReconcilePlan::build(
            &ResourceKey::parse(&desired.name),
            desired,
            backend_state.map(|u| u.to_observed()),
            false,
        )
    }

    #[tokio::test]
    async fn test_create_then_disable() {
        let backend = MemoryBackend::new();
        let desired = DesiredUser::new("alice", "a@x.com", false);
        let plan = plan_for(None, &desired);

        let result = PlanExecutor::new(&backend)
            .execute(&plan, &CancellationToken::new())
            .await;

        assert!(result.is_complete());
        assert_eq!(result.applied_names(), vec!["create", "disable"]);
        let stored = backend.peek("alice").await.expect("created");
        assert!(!stored.enabled);
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_operations() {
        let backend = MemoryBackend::new();
        backend.fail_next(BackendOp::Create, ErrorKind::Unavailable).await;
        let desired = DesiredUser::new("alice", "a@x.com", false);
        let plan = plan_for(None, &desired);

        let result = PlanExecutor::new(&backend)
            .execute(&plan, &CancellationToken::new())
            .await;

        assert!(result.applied.is_empty());
        match result.outcome {
            ExecutionOutcome::Failed { operation, error } => {
                assert_eq!(operation.kind, OperationKind::Create);
                assert_eq!(error.kind, ErrorKind::Unavailable);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!backend.calls().await.iter().any(|c| c.op == BackendOp::SetEnabled));
    }

    #[tokio::test]
    async fn test_already_exists_on_create_is_success() {
        let backend = MemoryBackend::new();
        let desired = DesiredUser::new("alice", "a@x.com", true);
        backend.insert(desired.to_observed()).await;
        let plan = plan_for(None, &desired);

        let result = PlanExecutor::new(&backend)
            .execute(&plan, &CancellationToken::new())
            .await;
        assert!(result.is_complete());
        assert!(result.adopted_existing);
    }

    #[tokio::test]
    async fn test_not_found_on_delete_is_success() {
        let backend = MemoryBackend::new();
        let desired = DesiredUser::new("ghost", "", true);
        let plan = ReconcilePlan::build(&ResourceKey::parse("ghost"), &desired, None, true);

        let result = PlanExecutor::new(&backend)
            .execute(&plan, &CancellationToken::new())
            .await;
        assert!(result.is_complete());
        assert_eq!(result.applied_names(), vec!["delete"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_operation() {
        let backend = MemoryBackend::new();
        let desired = DesiredUser::new("alice", "a@x.com", true);
        let plan = plan_for(None, &desired);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = PlanExecutor::new(&backend).execute(&plan, &cancel).await;

        assert!(matches!(result.outcome, ExecutionOutcome::Cancelled));
        assert_eq!(backend.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_between_operations() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let mut backend = MockIdentityBackend::new();
        backend.expect_create_user().times(1).returning(move |_| {
            trigger.cancel();
            Ok(())
        });
        backend.expect_set_enabled().never();

        let desired = DesiredUser::new("alice", "a@x.com", false);
        let plan = plan_for(None, &desired);
        assert_eq!(plan.kinds(), vec![OperationKind::Create, OperationKind::Disable]);

        let result = PlanExecutor::new(&backend).execute(&plan, &cancel).await;

        assert!(matches!(result.outcome, ExecutionOutcome::Cancelled));
        assert_eq!(result.applied_names(), vec!["create"]);
        assert!(!result.adopted_existing);
    }

    #[tokio::test]
    async fn test_bounded_call_times_out() {
        let cancel = CancellationToken::new();
        let result: Option<BackendResult<()>> =
            bounded_call(&cancel, Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let err = result.expect("not cancelled").expect_err("timed out");
        assert_eq!(err.kind, ErrorKind::Unavailable);
    }
}
