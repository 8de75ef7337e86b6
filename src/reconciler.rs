//! Reconciler for User resources.
//!
//! This module implements one reconciliation pass for a single resource key:
//! read the desired record from the store, read truth from the pool, diff,
//! apply, and write status back. It also owns the deletion finalizer.
//!
//! There is no retry loop here. A failed pass is reported in status and
//! returned to the caller, which decides when to try again.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use validator::ValidateEmail;

use crate::backend::{DesiredUser, IdentityBackend, ObservedUser, UserPager};
use crate::error::{OperatorError, ReconcileError, Result};
use crate::planner::{
    bounded_call, ExecutionOutcome, ExecutionResult, OperationKind, PlanExecutor,
    ReconcileOperation, ReconcilePlan, DEFAULT_CALL_TIMEOUT,
};
use crate::store::{ResourceKey, UserPhase, UserResource, UserStatus, UserStore, USER_FINALIZER};

/// Reconciler for User resources.
pub struct Reconciler<B: IdentityBackend, S: UserStore> {
    /// Identity pool.
    backend: Arc<B>,
    /// Declarative store.
    store: Arc<S>,
    /// Deadline for each backend call.
    call_timeout: Duration,
}

/// What a successful pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The resource does not exist; nothing to do.
    Absent,
    /// The pool matches the spec.
    Synced {
        /// Operations applied during this pass.
        applied: Vec<OperationKind>,
    },
    /// The pool user is gone and the finalizer was released.
    Finalized,
}

/// A user whose pool record differs from its spec.
#[derive(Debug, Clone, Serialize)]
pub struct DriftEntry {
    /// Resource key.
    pub key: ResourceKey,
    /// Operations a pass would apply.
    pub operations: Vec<ReconcileOperation>,
}

/// Comparison of the whole pool against the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriftReport {
    /// Desired users absent from the pool.
    pub missing: Vec<ResourceKey>,
    /// Desired users whose pool record differs.
    pub drifted: Vec<DriftEntry>,
    /// Pool users with no desired record. Reported only.
    pub unmanaged: Vec<ObservedUser>,
    /// Number of users in the pool.
    pub pool_size: usize,
    /// Number of listing pages fetched.
    pub pages_fetched: usize,
    /// Listing entries dropped as repeats of an earlier page.
    pub duplicates_dropped: usize,
}

impl<B: IdentityBackend, S: UserStore> Reconciler<B, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(backend: Arc<B>, store: Arc<S>) -> Self {
        Self {
            backend,
            store,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Sets the per-call deadline for backend calls.
    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Returns the declarative store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs one reconciliation pass for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is invalid, a backend call fails, the
    /// store cannot be read or written, or `cancel` fires mid-pass. Backend
    /// failures are also recorded in the resource's status.
    pub async fn reconcile(
        &self,
        key: &ResourceKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        let Some(resource) = self.store.get(key).await? else {
            debug!(user = %key, "Resource not found, nothing to reconcile");
            return Ok(ReconcileOutcome::Absent);
        };

        if cancel.is_cancelled() {
            return Err(cancelled(key));
        }

        if resource.is_being_deleted() {
            self.finalize(&resource, cancel).await
        } else {
            self.sync(&resource, cancel).await
        }
    }

    /// Previews the operations a pass would apply, without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or the backend read fails, the read
    /// overruns the call deadline, or `cancel` fires.
    pub async fn plan(
        &self,
        key: &ResourceKey,
        cancel: &CancellationToken,
    ) -> Result<Option<ReconcilePlan>> {
        let Some(resource) = self.store.get(key).await? else {
            return Ok(None);
        };

        let desired = resource.desired();
        let observed =
            bounded_call(cancel, self.call_timeout, self.backend.get_user(&desired.name))
                .await
                .ok_or_else(|| cancelled(key))??;
        Ok(Some(ReconcilePlan::build(
            key,
            &desired,
            observed,
            resource.is_being_deleted(),
        )))
    }

    /// Lists every user in the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if a page fails or the listing does not terminate.
    pub async fn pool_users(&self) -> Result<Vec<ObservedUser>> {
        Ok(UserPager::new(self.backend.as_ref()).collect_all().await?)
    }

    /// Compares the whole pool against the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed or the pool walk fails.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        let resources = self.store.list().await?;

        let mut pager = UserPager::new(self.backend.as_ref());
        let mut pool: HashMap<String, ObservedUser> = HashMap::new();
        while let Some(user) = pager.next().await? {
            pool.insert(user.username.clone(), user);
        }

        let mut report = DriftReport {
            pool_size: pool.len(),
            pages_fetched: pager.pages_fetched(),
            duplicates_dropped: pager.duplicates_dropped(),
            ..DriftReport::default()
        };

        let managed: HashSet<&str> = resources.iter().map(|r| r.key.name.as_str()).collect();

        for resource in &resources {
            if resource.is_being_deleted() {
                continue;
            }
            let desired = resource.desired();
            match pool.get(&desired.name) {
                None => report.missing.push(resource.key.clone()),
                Some(observed) => {
                    let plan =
                        ReconcilePlan::build(&resource.key, &desired, Some(observed.clone()), false);
                    if !plan.is_empty() {
                        report.drifted.push(DriftEntry {
                            key: resource.key.clone(),
                            operations: plan.operations,
                        });
                    }
                }
            }
        }

        let mut unmanaged: Vec<ObservedUser> = pool
            .into_values()
            .filter(|u| !managed.contains(u.username.as_str()))
            .collect();
        unmanaged.sort_by(|a, b| a.username.cmp(&b.username));
        report.unmanaged = unmanaged;

        info!(
            "Drift check: {} missing, {} drifted, {} unmanaged",
            report.missing.len(),
            report.drifted.len(),
            report.unmanaged.len()
        );
        Ok(report)
    }

    /// Converges the pool to a live resource.
    async fn sync(
        &self,
        resource: &UserResource,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        let key = &resource.key;
        let desired = resource.desired();

        let rejection = match validate_desired(&desired) {
            Err(reason) => Some(reason),
            Ok(()) => self
                .claimed_by(resource)
                .await?
                .map(|owner| format!("username '{}' is already claimed by {owner}", desired.name)),
        };
        if let Some(reason) = rejection {
            warn!(user = %key, "Rejecting invalid user: {reason}");
            let status = failed_status(resource, &reason, Vec::new(), false);
            self.store.update_status(key, status).await?;
            return Err(OperatorError::Reconcile(ReconcileError::InvalidUser {
                name: desired.name,
                reason,
            }));
        }

        if !resource.has_finalizer(USER_FINALIZER) {
            info!(user = %key, "Attaching finalizer");
            self.store.add_finalizer(key, USER_FINALIZER).await?;
        }

        let observed = self.read_observed(resource, &desired, cancel).await?;
        let existed = observed.is_some();
        let plan = ReconcilePlan::build(key, &desired, observed, false);
        debug!(user = %key, "Computed {} operations", plan.operation_count());

        let mut result = self.execute(&plan, cancel).await;

        if result.is_complete() && result.adopted_existing {
            info!(user = %key, "Pool user already existed, converging it in the same pass");
            let observed = self.read_observed(resource, &desired, cancel).await?;
            let follow_up = ReconcilePlan::build(key, &desired, observed, false);
            let rest = self.execute(&follow_up, cancel).await;
            result.applied.extend(rest.applied);
            result.outcome = rest.outcome;
        }

        let provisioned = existed || result.applied.iter().any(ReconcileOperation::is_create);
        let applied_names = result.applied_names();
        let applied_kinds = plan_kinds(&result);

        match result.outcome {
            ExecutionOutcome::Completed => {
                let status = UserStatus {
                    phase: UserPhase::Synced,
                    provisioned: true,
                    last_error: None,
                    error_since: None,
                    last_sync_time: Some(chrono::Utc::now()),
                    applied_operations: applied_names,
                    observed_generation: resource.generation,
                    spec_hash: Some(plan.spec_hash.clone()),
                };
                self.store.update_status(key, status).await?;

                if !applied_kinds.is_empty() {
                    info!(user = %key, "Synced after {} operations", applied_kinds.len());
                }
                Ok(ReconcileOutcome::Synced {
                    applied: applied_kinds,
                })
            }
            ExecutionOutcome::Cancelled => Err(cancelled(key)),
            ExecutionOutcome::Failed { operation, error } => {
                let status = failed_status(resource, &error.to_string(), applied_names, provisioned);
                self.store.update_status(key, status).await?;
                Err(operation_failed(&desired, &operation, applied_kinds.len(), error))
            }
        }
    }

    /// Deletes the pool user of a resource being deleted, then releases it.
    async fn finalize(
        &self,
        resource: &UserResource,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        let key = &resource.key;

        if !resource.has_finalizer(USER_FINALIZER) {
            debug!(user = %key, "Being deleted without our finalizer, nothing to clean up");
            return Ok(ReconcileOutcome::Finalized);
        }

        let desired = resource.desired();
        if let Some(other) = self.live_claimants(resource).await?.first() {
            info!(
                user = %key,
                "Pool user {} is still declared by {}, leaving it in place",
                desired.name,
                other.key
            );
            self.store.remove_finalizer(key, USER_FINALIZER).await?;
            return Ok(ReconcileOutcome::Finalized);
        }

        let plan = ReconcilePlan::build(key, &desired, None, true);
        info!(user = %key, "Deleting pool user {}", desired.name);

        let result = self.execute(&plan, cancel).await;

        match result.outcome {
            ExecutionOutcome::Completed => {
                self.store.remove_finalizer(key, USER_FINALIZER).await?;
                info!(user = %key, "Pool user gone, finalizer removed");
                Ok(ReconcileOutcome::Finalized)
            }
            ExecutionOutcome::Cancelled => Err(cancelled(key)),
            ExecutionOutcome::Failed { operation, error } => {
                error!(user = %key, "Delete failed, keeping finalizer: {error}");
                let mut status = failed_status(
                    resource,
                    &error.to_string(),
                    Vec::new(),
                    resource.status_or_default().provisioned,
                );
                status.phase = UserPhase::Deleting;
                self.store.update_status(key, status).await?;
                Err(operation_failed(&desired, &operation, 0, error))
            }
        }
    }

    /// Reads the pool record, recording a failed read in status.
    async fn read_observed(
        &self,
        resource: &UserResource,
        desired: &DesiredUser,
        cancel: &CancellationToken,
    ) -> Result<Option<ObservedUser>> {
        let key = &resource.key;
        match bounded_call(cancel, self.call_timeout, self.backend.get_user(&desired.name)).await {
            None => Err(cancelled(key)),
            Some(Ok(observed)) => Ok(observed),
            Some(Err(e)) => {
                error!(user = %key, "Failed to read pool user: {e}");
                let provisioned = resource.status_or_default().provisioned;
                let status = failed_status(resource, &e.to_string(), Vec::new(), provisioned);
                self.store.update_status(key, status).await?;
                Err(OperatorError::Backend(e))
            }
        }
    }

    async fn execute(&self, plan: &ReconcilePlan, cancel: &CancellationToken) -> ExecutionResult {
        PlanExecutor::new(self.backend.as_ref())
            .with_call_timeout(self.call_timeout)
            .execute(plan, cancel)
            .await
    }

    /// Other live resources declaring the same pool username, in claim order.
    async fn live_claimants(&self, resource: &UserResource) -> Result<Vec<UserResource>> {
        let mut claimants: Vec<UserResource> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|r| {
                r.key != resource.key && r.key.name == resource.key.name && !r.is_being_deleted()
            })
            .collect();
        claimants.sort_by_key(|r| (r.creation_timestamp, r.key.namespace.clone()));
        Ok(claimants)
    }

    /// Returns the resource owning this resource's pool username, if another
    /// live resource claimed it first.
    async fn claimed_by(&self, resource: &UserResource) -> Result<Option<ResourceKey>> {
        Ok(self
            .live_claimants(resource)
            .await?
            .into_iter()
            .find(|other| claim_order(other) < claim_order(resource))
            .map(|other| other.key))
    }
}

/// The oldest resource owns a username shared across namespaces.
fn claim_order(resource: &UserResource) -> (chrono::DateTime<chrono::Utc>, &str) {
    (resource.creation_timestamp, resource.key.namespace.as_str())
}

/// Checks a desired record before anything is sent to the pool.
fn validate_desired(desired: &DesiredUser) -> std::result::Result<(), String> {
    if desired.name.trim().is_empty() {
        return Err(String::from("username cannot be empty"));
    }
    if !desired.email.is_empty() && !desired.email.validate_email() {
        return Err(format!("'{}' is not a valid email address", desired.email));
    }
    Ok(())
}

/// Builds the status for a failed pass.
///
/// `error_since` survives while the same error keeps recurring.
fn failed_status(
    resource: &UserResource,
    message: &str,
    applied_operations: Vec<String>,
    provisioned: bool,
) -> UserStatus {
    let previous = resource.status_or_default();
    let error_since = match (&previous.last_error, previous.error_since) {
        (Some(last), Some(since)) if last == message => Some(since),
        _ => Some(chrono::Utc::now()),
    };

    UserStatus {
        phase: UserPhase::Error,
        provisioned,
        last_error: Some(message.to_string()),
        error_since,
        last_sync_time: previous.last_sync_time,
        applied_operations,
        observed_generation: resource.generation,
        spec_hash: previous.spec_hash,
    }
}

fn plan_kinds(result: &ExecutionResult) -> Vec<OperationKind> {
    result.applied.iter().map(|o| o.kind).collect()
}

fn cancelled(key: &ResourceKey) -> OperatorError {
    OperatorError::Reconcile(ReconcileError::Cancelled {
        key: key.to_string(),
    })
}

fn operation_failed(
    desired: &DesiredUser,
    operation: &ReconcileOperation,
    completed: usize,
    source: crate::error::BackendError,
) -> OperatorError {
    OperatorError::Reconcile(ReconcileError::OperationFailed {
        name: desired.name.clone(),
        operation: operation.kind.to_string(),
        completed,
        source,
    })
}

impl DriftReport {
    /// Returns true if the pool matches the store exactly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.drifted.is_empty() && self.unmanaged.is_empty()
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Synced { applied } if applied.is_empty() => write!(f, "in sync"),
            Self::Synced { applied } => {
                let ops: Vec<String> = applied.iter().map(ToString::to_string).collect();
                write!(f, "synced ({})", ops.join(", "))
            }
            Self::Finalized => write!(f, "finalized"),
        }
    }
}
