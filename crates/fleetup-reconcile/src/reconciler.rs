//! Reconciler — the per-node tick orchestrator.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleetup_model::ApplicationIdentity;
use fleetup_session::UpdateSession;

use crate::epoch_secs;
use crate::error::{ReconcileError, ReconcileResult};
use crate::external::{
    ApplicationSupervisor, BinaryRepository, DesiredStateSource, StatusEntry, StatusPublisher,
};
use crate::plan::{AppAction, ReconcilePlan, build_plan};

/// Identity of this node within the fleet.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub cluster_id: String,
    pub instance_id: String,
    /// The application id under which this node's tick gate coordinates.
    pub coordination_id: String,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Desired and running already agree; the session was never contacted.
    NoChange,
    /// Another update domain is actively rolling. Not an error.
    NotAdmitted,
    /// The plan was applied and the session released.
    Applied {
        installed: usize,
        removed: usize,
        updated: usize,
    },
    /// Something failed; details are in the log. The next tick retries.
    Failed,
}

/// The per-node control loop: diff desired against running and apply the
/// difference under the update session.
///
/// This is the error boundary for the whole core. `tick` never returns an
/// error and never panics the host: failures are logged in full and
/// resolved by the next tick.
pub struct Reconciler {
    settings: ReconcilerSettings,
    desired: Arc<dyn DesiredStateSource>,
    supervisor: Arc<dyn ApplicationSupervisor>,
    repository: Arc<dyn BinaryRepository>,
    publisher: Arc<dyn StatusPublisher>,
    session: Arc<dyn UpdateSession>,
}

impl Reconciler {
    pub fn new(
        settings: ReconcilerSettings,
        desired: Arc<dyn DesiredStateSource>,
        supervisor: Arc<dyn ApplicationSupervisor>,
        repository: Arc<dyn BinaryRepository>,
        publisher: Arc<dyn StatusPublisher>,
        session: Arc<dyn UpdateSession>,
    ) -> Self {
        Self {
            settings,
            desired,
            supervisor,
            repository,
            publisher,
            session,
        }
    }

    /// Run one reconciliation tick.
    ///
    /// Always ends with a best-effort status snapshot, whatever happened
    /// before.
    pub async fn tick(&self) -> TickOutcome {
        let outcome = match self.run_tick().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "reconciliation tick failed");
                TickOutcome::Failed
            }
        };
        self.publish_status().await;
        outcome
    }

    /// Tick on a timer until shutdown is signalled.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            cluster = %self.settings.cluster_id,
            instance = %self.settings.instance_id,
            ?interval,
            "reconciler loop started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("reconciler loop shutting down");
                    break;
                }
            }
        }
    }

    async fn run_tick(&self) -> ReconcileResult<TickOutcome> {
        let desired = self
            .desired
            .fetch_records()
            .await
            .map_err(ReconcileError::FetchDesired)?;
        let running = self
            .supervisor
            .running_identities()
            .await
            .map_err(ReconcileError::ListRunning)?;

        let plan = build_plan(&desired, &running);
        if plan.is_empty() {
            debug!("desired and running agree, nothing to reconcile");
            return Ok(TickOutcome::NoChange);
        }
        info!(
            installs = plan.install_count(),
            uninstalls = plan.uninstall_count(),
            updates = plan.update_count(),
            "computed reconciliation plan"
        );

        // Fetch binaries before touching the session: nothing has been
        // mutated locally yet, so a failed download just means retrying
        // next tick.
        self.download_binaries(&plan).await?;

        if !self
            .session
            .try_start(&self.settings.coordination_id)
            .await?
        {
            info!("not admitted: another update domain is rolling");
            return Ok(TickOutcome::NotAdmitted);
        }

        let (installed, removed, updated) = (
            plan.install_count(),
            plan.uninstall_count(),
            plan.update_count(),
        );
        let retired = plan.retired_identities();

        // On failure this returns without calling end: the session stays
        // held so no other domain is promoted while this fleet is
        // partially updated. The same domain is re-admitted next tick and
        // only a successful apply releases the gate.
        self.apply(plan).await?;

        self.session.end(&self.settings.coordination_id).await?;

        self.retire_binaries(retired).await;

        info!(installed, removed, updated, "reconciliation applied");
        Ok(TickOutcome::Applied {
            installed,
            removed,
            updated,
        })
    }

    /// Download every binary the plan introduces, concurrently. Packages
    /// already in the local cache are skipped.
    async fn download_binaries(&self, plan: &ReconcilePlan) -> ReconcileResult<()> {
        let mut handles = Vec::new();
        for record in plan.deployments() {
            let repository = Arc::clone(&self.repository);
            let identity = record.identity().clone();
            handles.push(tokio::spawn(async move {
                if repository.contains(&identity).await.unwrap_or(false) {
                    debug!(app = %identity, "binary already cached");
                    return Ok(());
                }
                repository
                    .download(&identity)
                    .await
                    .map_err(|e| (identity, e))
            }));
        }

        let mut errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err((identity, e))) => {
                    error!(app = %identity, error = %e, "binary download failed");
                    errors.push(format!("{identity}: {e}"));
                }
                Err(e) => {
                    error!(error = %e, "download task failed");
                    errors.push(format!("download task: {e}"));
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::Download { errors })
        }
    }

    /// Apply every action of the plan, concurrently, aggregating failures.
    async fn apply(&self, plan: ReconcilePlan) -> ReconcileResult<()> {
        let mut handles = Vec::new();
        for action in plan.into_actions() {
            let supervisor = Arc::clone(&self.supervisor);
            handles.push(tokio::spawn(async move {
                let label = action.describe();
                let result = match &action {
                    AppAction::Install(record) => supervisor.install(record).await,
                    AppAction::Uninstall(identity) => supervisor.uninstall(identity).await,
                    AppAction::Update { old, new, .. } => supervisor.update(old, new).await,
                };
                result.map_err(|e| (label, e))
            }));
        }

        let mut errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err((label, e))) => {
                    error!(operation = %label, error = %e, "apply operation failed");
                    errors.push(format!("{label}: {e}"));
                }
                Err(e) => {
                    error!(error = %e, "apply task failed");
                    errors.push(format!("apply task: {e}"));
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::Apply { errors })
        }
    }

    /// Drop cached packages of versions this tick removed. Best-effort:
    /// a leftover package only costs disk.
    async fn retire_binaries(&self, retired: Vec<ApplicationIdentity>) {
        for identity in retired {
            if let Err(e) = self.repository.delete(&identity).await {
                debug!(app = %identity, error = %e, "could not drop cached binary");
            }
        }
    }

    /// Publish a snapshot of the running set. Best-effort: failures are
    /// logged, never propagated.
    async fn publish_status(&self) {
        let running = match self.supervisor.running_identities().await {
            Ok(running) => running,
            Err(e) => {
                warn!(error = %e, "could not list running applications for status");
                return;
            }
        };

        let now = epoch_secs();
        let entries: Vec<StatusEntry> = running
            .into_iter()
            .map(|identity| StatusEntry {
                identity,
                cluster_id: self.settings.cluster_id.clone(),
                instance_id: self.settings.instance_id.clone(),
                timestamp: now,
            })
            .collect();

        if let Err(e) = self
            .publisher
            .publish(&self.settings.cluster_id, &self.settings.instance_id, &entries)
            .await
        {
            warn!(error = %e, "status publication failed");
        }
    }
}
