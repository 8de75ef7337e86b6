//! Control loop driver.
//!
//! The controller decides when each resource is reconciled. Every resync it
//! lists the store, skips keys that are backing off, and runs the rest with
//! bounded concurrency. A tick waits for all of its passes, so a key never
//! has two passes in flight.

mod backoff;

pub use backoff::{BackoffPolicy, BackoffTracker};

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::IdentityBackend;
use crate::config::ControllerConfig;
use crate::error::{OperatorError, Result};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::{ResourceKey, UserStore};

/// Periodic-resync controller.
pub struct Controller<B: IdentityBackend, S: UserStore> {
    /// Reconciler shared by every pass.
    reconciler: Arc<Reconciler<B, S>>,
    /// Time between resyncs.
    resync_interval: Duration,
    /// Maximum passes running at once.
    max_concurrency: usize,
    /// Backoff timing for failed keys.
    backoff: BackoffPolicy,
}

/// Summary of one resync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Keys whose pass succeeded.
    pub succeeded: usize,
    /// Keys whose pass failed.
    pub failed: usize,
    /// Keys skipped because they are backing off.
    pub backing_off: usize,
    /// Keys whose pass was cancelled.
    pub cancelled: usize,
}

impl<B, S> Controller<B, S>
where
    B: IdentityBackend + 'static,
    S: UserStore + 'static,
{
    /// Creates a controller with default timing.
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler<B, S>>) -> Self {
        Self::with_config(reconciler, &ControllerConfig::default())
    }

    /// Creates a controller from configuration.
    #[must_use]
    pub fn with_config(reconciler: Arc<Reconciler<B, S>>, config: &ControllerConfig) -> Self {
        Self {
            reconciler,
            resync_interval: Duration::from_secs(config.resync_interval_secs.max(1)),
            max_concurrency: config.max_concurrency.max(1),
            backoff: BackoffPolicy::from(&config.backoff),
        }
    }

    /// Runs resyncs until `cancel` fires.
    ///
    /// A failed resync (for example an unreadable store) is logged and the
    /// next one is attempted on schedule.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Controller started (resync every {}s, concurrency {})",
            self.resync_interval.as_secs(),
            self.max_concurrency
        );

        let mut tracker = BackoffTracker::new(self.backoff.clone());
        let mut interval = tokio::time::interval(self.resync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.run_once(&mut tracker, &cancel).await {
                Ok(summary) => {
                    debug!(
                        "Resync finished: {} ok, {} failed, {} backing off",
                        summary.succeeded, summary.failed, summary.backing_off
                    );
                }
                Err(e) => error!("Resync failed: {e}"),
            }
        }

        info!("Controller stopped");
    }

    /// Runs one resync.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub async fn run_once(
        &self,
        tracker: &mut BackoffTracker,
        cancel: &CancellationToken,
    ) -> Result<TickSummary> {
        let keys: Vec<ResourceKey> = self
            .reconciler
            .store()
            .list()
            .await?
            .into_iter()
            .map(|r| r.key)
            .collect();
        tracker.retain_keys(&keys);

        let now = Instant::now();
        let mut summary = TickSummary::default();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut passes = JoinSet::new();

        for key in keys {
            if !tracker.is_ready(&key, now) {
                summary.backing_off += 1;
                continue;
            }

            let reconciler = Arc::clone(&self.reconciler);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            passes.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => reconciler.reconcile(&key, &cancel).await,
                    Err(e) => Err(OperatorError::internal(format!("semaphore closed: {e}"))),
                };
                (key, result)
            });
        }

        while let Some(joined) = passes.join_next().await {
            let (key, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!("Reconcile task panicked: {e}");
                    summary.failed += 1;
                    continue;
                }
            };
            Self::record(tracker, &mut summary, &key, result);
        }

        Ok(summary)
    }

    fn record(
        tracker: &mut BackoffTracker,
        summary: &mut TickSummary,
        key: &ResourceKey,
        result: Result<ReconcileOutcome>,
    ) {
        match result {
            Ok(outcome) => {
                tracker.record_success(key);
                summary.succeeded += 1;
                debug!(user = %key, "Pass finished: {outcome}");
            }
            Err(e) if e.is_cancelled() => {
                summary.cancelled += 1;
                debug!(user = %key, "Pass cancelled");
            }
            Err(e) => {
                let delay = tracker.record_failure(key, e.is_retryable(), Instant::now());
                summary.failed += 1;
                warn!(
                    user = %key,
                    attempt = tracker.failures(key),
                    delay_ms = delay.as_millis(),
                    "Pass failed, backing off: {e}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOp, MemoryBackend};
    use crate::config::BackoffConfig;
    use crate::error::ErrorKind;
    use crate::store::{MemoryUserStore, UserSpec};

    fn config() -> ControllerConfig {
        ControllerConfig {
            resync_interval_secs: 1,
            max_concurrency: 2,
            backoff: BackoffConfig {
                initial_ms: 60_000,
                max_secs: 120,
                multiplier: 2.0,
            },
        }
    }

    async fn setup(
        users: &[&str],
    ) -> (
        Controller<MemoryBackend, MemoryUserStore>,
        Arc<MemoryBackend>,
        Arc<MemoryUserStore>,
    ) {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(MemoryUserStore::new());
        for name in users {
            let spec = UserSpec {
                email: Some(format!("{name}@x.com")),
                enabled: None,
            };
            store
                .apply(&ResourceKey::parse(name), spec)
                .await
                .expect("apply");
        }
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&backend), Arc::clone(&store)));
        (
            Controller::with_config(reconciler, &config()),
            backend,
            store,
        )
    }

    #[tokio::test]
    async fn test_run_once_reconciles_every_key() {
        let (controller, backend, _store) = setup(&["alice", "bob", "carol"]).await;
        let mut tracker = BackoffTracker::new(BackoffPolicy::default());

        let summary = controller
            .run_once(&mut tracker, &CancellationToken::new())
            .await
            .expect("tick");

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);
        for name in ["alice", "bob", "carol"] {
            assert!(backend.peek(name).await.is_some());
        }
    }

    #[tokio::test]
    async fn test_failed_key_backs_off() {
        let (controller, backend, _store) = setup(&["alice"]).await;
        let mut tracker = BackoffTracker::new(BackoffPolicy::from(&config().backoff));
        let cancel = CancellationToken::new();

        backend.fail_next(BackendOp::Create, ErrorKind::Unavailable).await;
        let first = controller.run_once(&mut tracker, &cancel).await.expect("tick");
        assert_eq!(first.failed, 1);
        assert_eq!(tracker.failures(&ResourceKey::parse("alice")), 1);

        let second = controller.run_once(&mut tracker, &cancel).await.expect("tick");
        assert_eq!(second.backing_off, 1);
        assert_eq!(second.succeeded, 0);
        assert!(backend.peek("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_deleted_keys_are_forgotten() {
        let (controller, backend, store) = setup(&["alice"]).await;
        let mut tracker = BackoffTracker::new(BackoffPolicy::from(&config().backoff));
        let cancel = CancellationToken::new();
        let key = ResourceKey::parse("alice");

        backend.fail_next(BackendOp::Get, ErrorKind::Unknown).await;
        controller.run_once(&mut tracker, &cancel).await.expect("tick");
        assert_eq!(tracker.failures(&key), 1);

        // The finalizer is attached before the read, so deletion waits for
        // the controller; drop it by hand to simulate a removed resource.
        store.request_delete(&key).await.expect("delete");
        store
            .remove_finalizer(&key, crate::store::USER_FINALIZER)
            .await
            .expect("release");
        controller.run_once(&mut tracker, &cancel).await.expect("tick");
        assert_eq!(tracker.failures(&key), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (controller, backend, _store) = setup(&["alice"]).await;
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                controller.run(cancel).await;
            })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.peek("alice").await.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first resync ran");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("stopped")
            .expect("join");
    }
}
