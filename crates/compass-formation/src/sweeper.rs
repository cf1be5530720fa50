//! Pending-assignment sweeper.
//!
//! An async target that never calls back would leave its assignment in
//! CONFIG_PENDING forever. The sweeper periodically moves assignments that
//! have been pending longer than the callback timeout to the error state of
//! their operation, which makes them eligible for resync. A late callback
//! still applies.

use std::collections::BTreeSet;
use std::time::Duration;

use compass_state::{AssignmentState, epoch_secs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::FormationResult;
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    /// Fail every CONFIG_PENDING assignment untouched for at least `max_age`.
    /// Returns how many were expired.
    pub async fn expire_pending(&self, max_age: Duration) -> FormationResult<usize> {
        let store = &self.inner.store;
        let now = epoch_secs();
        let cutoff = now.saturating_sub(max_age.as_secs());
        let stale: Vec<_> = store
            .list_all_assignments()?
            .into_iter()
            .filter(|a| a.state == AssignmentState::ConfigPending && a.updated_at <= cutoff)
            .collect();

        let mut touched = BTreeSet::new();
        let mut expired = 0;
        for assignment in stale {
            let _guard = self.inner.assignment_locks.lock(&assignment.table_key()).await;
            let Some(mut current) =
                store.get_assignment(&assignment.formation_id, &assignment.source, &assignment.target)?
            else {
                continue;
            };
            // A callback may have landed while we waited for the lock.
            if current.state != AssignmentState::ConfigPending || current.updated_at > cutoff {
                continue;
            }

            let message = format!("no status callback received within {}s", max_age.as_secs());
            current.state = current.last_operation.error_state();
            current.error = Some(message.clone());
            current.updated_at = now;
            store.put_assignment(&current)?;
            self.finish_operations(&current.id, Some(message))?;
            warn!(
                formation = %current.formation_id,
                assignment = %current.id,
                target = %current.target,
                "pending assignment expired"
            );
            touched.insert(current.formation_id.clone());
            expired += 1;
        }

        for formation_id in touched {
            if let Err(e) = self.refresh_state(&formation_id) {
                warn!(formation = %formation_id, error = %e, "failed to refresh formation state");
            }
        }
        Ok(expired)
    }
}

/// Runs [`Orchestrator::expire_pending`] on a fixed interval until shutdown.
pub struct Sweeper {
    orchestrator: Orchestrator,
    interval: Duration,
    max_age: Duration,
}

impl Sweeper {
    pub fn new(orchestrator: Orchestrator, interval: Duration, max_age: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            max_age,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "pending assignment sweeper started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.orchestrator.expire_pending(self.max_age).await {
                        Ok(0) => debug!("no pending assignments expired"),
                        Ok(expired) => info!(expired, "expired pending assignments"),
                        Err(e) => error!(error = %e, "pending assignment sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("sweeper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::StatusReport;
    use crate::callback::CallbackOutcome;
    use crate::testing::*;
    use compass_state::{FormationState, OperationStatus, WebhookMode, WebhookOwner};

    async fn pending_formation(fx: &Fixture) -> String {
        fx.add_webhook("rt-y", WebhookOwner::Runtime, WebhookMode::Async);
        fx.target.respond("http://rt-y.test", 202, "");
        let caller = fx.caller();
        fx.orchestrator.assign(&caller, &fx.assign_app("app-x", "alpha")).await.unwrap();
        fx.orchestrator
            .assign(&caller, &fx.assign_runtime("rt-y", "alpha"))
            .await
            .unwrap()
            .formation
            .id
    }

    #[tokio::test]
    async fn stale_pending_assignment_expires() {
        let fx = Fixture::new();
        let formation_id = pending_formation(&fx).await;

        assert_eq!(fx.orchestrator.expire_pending(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(fx.orchestrator.expire_pending(Duration::ZERO).await.unwrap(), 1);

        let row = fx.store().get_assignment(&formation_id, "app-x", "rt-y").unwrap().unwrap();
        assert_eq!(row.state, AssignmentState::CreateError);
        assert!(row.error.unwrap().contains("no status callback"));
        let formation = fx.store().get_formation(&formation_id).unwrap().unwrap();
        assert_eq!(formation.state, FormationState::CreateError);
        let operations = fx.store().list_operations_for_resource(&row.id).unwrap();
        assert_eq!(operations[0].status, OperationStatus::Failed);

        // A late callback still completes the assignment.
        let outcome = fx
            .orchestrator
            .update_assignment_status(
                &formation_id,
                &row.id,
                Some(CONSUMER),
                StatusReport {
                    state: AssignmentState::Ready,
                    configuration: None,
                    error: None,
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, CallbackOutcome::Updated { .. }));
        let formation = fx.store().get_formation(&formation_id).unwrap().unwrap();
        assert_eq!(formation.state, FormationState::Ready);
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let fx = Fixture::new();
        let (tx, rx) = watch::channel(false);
        let handle = Sweeper::new(fx.orchestrator.clone(), Duration::from_millis(10), Duration::ZERO).spawn(rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
