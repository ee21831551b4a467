//! End-to-end reconciler flow against in-memory collaborators and a
//! lease-backed update session.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use semver::Version;
use tokio::sync::Mutex;

use fleetup_model::{ApplicationIdentity, DeploymentRecord};
use fleetup_reconcile::{
    ApplicationSupervisor, BinaryRepository, DesiredStateSource, Reconciler, ReconcilerSettings,
    StatusEntry, StatusPublisher, TickOutcome,
};
use fleetup_session::{
    LeaseSessionConfig, LeaseUpdateSession, RetryPolicy, RetryingSession, SessionResult,
    UpdateSession,
};
use fleetup_store::MemoryLeaseStore;

fn id(name: &str, version: &str) -> ApplicationIdentity {
    ApplicationIdentity::new(name, Version::parse(version).unwrap())
}

fn record(name: &str, version: &str) -> DeploymentRecord {
    DeploymentRecord::new(id(name, version), "east")
}

// ── Fakes ──────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeSource {
    records: Mutex<Vec<DeploymentRecord>>,
}

impl FakeSource {
    async fn set(&self, records: Vec<DeploymentRecord>) {
        *self.records.lock().await = records;
    }
}

#[async_trait]
impl DesiredStateSource for FakeSource {
    async fn fetch_records(&self) -> anyhow::Result<Vec<DeploymentRecord>> {
        Ok(self.records.lock().await.clone())
    }
}

#[derive(Default)]
struct FakeSupervisor {
    running: Mutex<BTreeSet<ApplicationIdentity>>,
    fail_installs: Mutex<BTreeSet<String>>,
}

impl FakeSupervisor {
    async fn set_running(&self, ids: Vec<ApplicationIdentity>) {
        *self.running.lock().await = ids.into_iter().collect();
    }

    async fn fail_installs_of(&self, name: &str) {
        self.fail_installs.lock().await.insert(name.to_string());
    }

    async fn clear_failures(&self) {
        self.fail_installs.lock().await.clear();
    }

    async fn running(&self) -> BTreeSet<ApplicationIdentity> {
        self.running.lock().await.clone()
    }
}

#[async_trait]
impl ApplicationSupervisor for FakeSupervisor {
    async fn running_identities(&self) -> anyhow::Result<Vec<ApplicationIdentity>> {
        Ok(self.running.lock().await.iter().cloned().collect())
    }

    async fn install(&self, record: &DeploymentRecord) -> anyhow::Result<()> {
        if self
            .fail_installs
            .lock()
            .await
            .contains(record.identity().name())
        {
            anyhow::bail!("install refused for {}", record.identity());
        }
        self.running.lock().await.insert(record.identity().clone());
        Ok(())
    }

    async fn uninstall(&self, identity: &ApplicationIdentity) -> anyhow::Result<()> {
        self.running.lock().await.remove(identity);
        Ok(())
    }

    async fn update(
        &self,
        old: &[ApplicationIdentity],
        new: &[DeploymentRecord],
    ) -> anyhow::Result<()> {
        let mut running = self.running.lock().await;
        for identity in old {
            running.remove(identity);
        }
        for record in new {
            running.insert(record.identity().clone());
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeRepository {
    downloaded: Mutex<BTreeSet<ApplicationIdentity>>,
    fail_downloads: Mutex<BTreeSet<String>>,
}

impl FakeRepository {
    async fn fail_downloads_of(&self, name: &str) {
        self.fail_downloads.lock().await.insert(name.to_string());
    }

    async fn downloaded(&self) -> BTreeSet<ApplicationIdentity> {
        self.downloaded.lock().await.clone()
    }
}

#[async_trait]
impl BinaryRepository for FakeRepository {
    async fn download(&self, identity: &ApplicationIdentity) -> anyhow::Result<()> {
        if self.fail_downloads.lock().await.contains(identity.name()) {
            anyhow::bail!("repository has no package for {identity}");
        }
        self.downloaded.lock().await.insert(identity.clone());
        Ok(())
    }

    async fn contains(&self, identity: &ApplicationIdentity) -> anyhow::Result<bool> {
        Ok(self.downloaded.lock().await.contains(identity))
    }

    async fn delete(&self, identity: &ApplicationIdentity) -> anyhow::Result<()> {
        self.downloaded.lock().await.remove(identity);
        Ok(())
    }
}

#[derive(Default)]
struct FakePublisher {
    snapshots: Mutex<Vec<Vec<StatusEntry>>>,
    fail: AtomicBool,
}

impl FakePublisher {
    async fn snapshots(&self) -> Vec<Vec<StatusEntry>> {
        self.snapshots.lock().await.clone()
    }
}

#[async_trait]
impl StatusPublisher for FakePublisher {
    async fn publish(
        &self,
        _cluster_id: &str,
        _instance_id: &str,
        entries: &[StatusEntry],
    ) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("status endpoint unreachable");
        }
        self.snapshots.lock().await.push(entries.to_vec());
        Ok(())
    }
}

/// Counts calls through to the real session.
struct CountingSession<S> {
    inner: S,
    starts: AtomicU32,
    ends: AtomicU32,
}

impl<S> CountingSession<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            starts: AtomicU32::new(0),
            ends: AtomicU32::new(0),
        }
    }

    fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    fn ends(&self) -> u32 {
        self.ends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: UpdateSession> UpdateSession for CountingSession<S> {
    async fn try_start(&self, app_id: &str) -> SessionResult<bool> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.inner.try_start(app_id).await
    }

    async fn end(&self, app_id: &str) -> SessionResult<()> {
        self.ends.fetch_add(1, Ordering::SeqCst);
        self.inner.end(app_id).await
    }
}

// ── Harness ────────────────────────────────────────────────────────

type NodeSession = CountingSession<RetryingSession<LeaseUpdateSession<Arc<MemoryLeaseStore>>>>;

struct Harness {
    reconciler: Reconciler,
    source: Arc<FakeSource>,
    supervisor: Arc<FakeSupervisor>,
    repository: Arc<FakeRepository>,
    publisher: Arc<FakePublisher>,
    session: Arc<NodeSession>,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        interval: Duration::from_millis(5),
        start_attempts: 2,
        end_attempts: 4,
    }
}

/// Build a node against a shared lease store.
fn node(store: &Arc<MemoryLeaseStore>, instance: &str, domain: &str) -> Harness {
    let session = Arc::new(CountingSession::new(RetryingSession::with_policy(
        LeaseUpdateSession::new(
            Arc::clone(store),
            LeaseSessionConfig::new("east", instance, domain),
        ),
        fast_retry(),
    )));
    let source = Arc::new(FakeSource::default());
    let supervisor = Arc::new(FakeSupervisor::default());
    let repository = Arc::new(FakeRepository::default());
    let publisher = Arc::new(FakePublisher::default());

    let reconciler = Reconciler::new(
        ReconcilerSettings {
            cluster_id: "east".to_string(),
            instance_id: instance.to_string(),
            coordination_id: "east".to_string(),
        },
        Arc::clone(&source) as Arc<dyn DesiredStateSource>,
        Arc::clone(&supervisor) as Arc<dyn ApplicationSupervisor>,
        Arc::clone(&repository) as Arc<dyn BinaryRepository>,
        Arc::clone(&publisher) as Arc<dyn StatusPublisher>,
        Arc::clone(&session) as Arc<dyn UpdateSession>,
    );

    Harness {
        reconciler,
        source,
        supervisor,
        repository,
        publisher,
        session,
    }
}

/// A bare session handle for another update domain on the same store.
fn probe(store: &Arc<MemoryLeaseStore>, instance: &str, domain: &str) -> impl UpdateSession {
    LeaseUpdateSession::new(
        Arc::clone(store),
        LeaseSessionConfig::new("east", instance, domain),
    )
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn applies_install_update_and_uninstall_in_one_tick() {
    let store = Arc::new(MemoryLeaseStore::new());
    let h = node(&store, "node-1", "1");

    h.supervisor
        .set_running(vec![id("a", "1.0.0"), id("b", "1.0.0"), id("d", "1.0.0")])
        .await;
    h.source
        .set(vec![
            record("a", "1.0.0"),
            record("b", "2.0.0"),
            record("c", "1.0.0"),
        ])
        .await;

    let outcome = h.reconciler.tick().await;
    assert_eq!(
        outcome,
        TickOutcome::Applied {
            installed: 1,
            removed: 1,
            updated: 1,
        }
    );

    let running = h.supervisor.running().await;
    assert_eq!(
        running,
        BTreeSet::from([id("a", "1.0.0"), id("b", "2.0.0"), id("c", "1.0.0")])
    );

    // Only the additions were downloaded.
    assert_eq!(
        h.repository.downloaded().await,
        BTreeSet::from([id("b", "2.0.0"), id("c", "1.0.0")])
    );

    // The session was acquired and released exactly once.
    assert_eq!(h.session.starts(), 1);
    assert_eq!(h.session.ends(), 1);

    // The snapshot reflects the post-apply running set.
    let snapshots = h.publisher.snapshots().await;
    assert_eq!(snapshots.len(), 1);
    let published: BTreeSet<_> = snapshots[0].iter().map(|e| e.identity.clone()).collect();
    assert_eq!(published, running);
    assert!(snapshots[0].iter().all(|e| e.cluster_id == "east"));
}

#[tokio::test]
async fn noop_tick_never_contacts_the_session() {
    let store = Arc::new(MemoryLeaseStore::new());
    let h = node(&store, "node-1", "1");

    h.supervisor.set_running(vec![id("a", "1.0.0")]).await;
    h.source.set(vec![record("a", "1.0.0")]).await;

    assert_eq!(h.reconciler.tick().await, TickOutcome::NoChange);
    assert_eq!(h.session.starts(), 0);

    // Status still goes out on a no-op tick.
    assert_eq!(h.publisher.snapshots().await.len(), 1);
}

#[tokio::test]
async fn foreign_domain_refusal_stops_the_tick() {
    let store = Arc::new(MemoryLeaseStore::new());
    let other = probe(&store, "node-9", "2");
    assert!(other.try_start("east").await.unwrap());

    let h = node(&store, "node-1", "1");
    h.source.set(vec![record("c", "1.0.0")]).await;

    assert_eq!(h.reconciler.tick().await, TickOutcome::NotAdmitted);

    // Binaries were fetched ahead of the gate; nothing was applied.
    assert_eq!(h.repository.downloaded().await.len(), 1);
    assert!(h.supervisor.running().await.is_empty());
    assert_eq!(h.session.ends(), 0);
}

#[tokio::test]
async fn download_failure_aborts_before_the_session() {
    let store = Arc::new(MemoryLeaseStore::new());
    let h = node(&store, "node-1", "1");

    h.source
        .set(vec![record("c", "1.0.0"), record("e", "1.0.0")])
        .await;
    h.repository.fail_downloads_of("c").await;

    assert_eq!(h.reconciler.tick().await, TickOutcome::Failed);
    assert_eq!(h.session.starts(), 0);
    assert!(h.supervisor.running().await.is_empty());

    // The failed tick still published a snapshot.
    assert_eq!(h.publisher.snapshots().await.len(), 1);
}

#[tokio::test]
async fn apply_failure_leaves_the_session_held() {
    let store = Arc::new(MemoryLeaseStore::new());
    let h = node(&store, "node-1", "1");

    h.source.set(vec![record("c", "1.0.0")]).await;
    h.supervisor.fail_installs_of("c").await;

    assert_eq!(h.reconciler.tick().await, TickOutcome::Failed);
    assert_eq!(h.session.starts(), 1);
    assert_eq!(h.session.ends(), 0);

    // The held session keeps every other domain out.
    let other = probe(&store, "node-9", "2");
    assert!(!other.try_start("east").await.unwrap());

    // The same domain is re-admitted next tick; success releases the gate.
    h.supervisor.clear_failures().await;
    assert_eq!(
        h.reconciler.tick().await,
        TickOutcome::Applied {
            installed: 1,
            removed: 0,
            updated: 0,
        }
    );
    assert!(other.try_start("east").await.unwrap());
}

#[tokio::test]
async fn partial_apply_failure_still_runs_the_rest() {
    let store = Arc::new(MemoryLeaseStore::new());
    let h = node(&store, "node-1", "1");

    h.source
        .set(vec![record("c", "1.0.0"), record("e", "1.0.0")])
        .await;
    h.supervisor.fail_installs_of("c").await;

    assert_eq!(h.reconciler.tick().await, TickOutcome::Failed);

    // The independent install was not stopped by c's failure.
    let running = h.supervisor.running().await;
    assert!(running.contains(&id("e", "1.0.0")));
    assert!(!running.contains(&id("c", "1.0.0")));
}

#[tokio::test]
async fn version_swap_retires_the_old_package() {
    let store = Arc::new(MemoryLeaseStore::new());
    let h = node(&store, "node-1", "1");

    // The old package is cached locally; the new one is not.
    h.repository.download(&id("a", "1.0.0")).await.unwrap();
    h.supervisor.set_running(vec![id("a", "1.0.0")]).await;
    h.source.set(vec![record("a", "2.0.0")]).await;

    let outcome = h.reconciler.tick().await;
    assert_eq!(
        outcome,
        TickOutcome::Applied {
            installed: 0,
            removed: 0,
            updated: 1,
        }
    );

    let cached = h.repository.downloaded().await;
    assert!(cached.contains(&id("a", "2.0.0")));
    assert!(!cached.contains(&id("a", "1.0.0")));
}

#[tokio::test]
async fn publish_failure_never_propagates() {
    let store = Arc::new(MemoryLeaseStore::new());
    let h = node(&store, "node-1", "1");

    h.supervisor.set_running(vec![id("a", "1.0.0")]).await;
    h.source.set(vec![record("a", "1.0.0")]).await;
    h.publisher.fail.store(true, Ordering::SeqCst);

    assert_eq!(h.reconciler.tick().await, TickOutcome::NoChange);
    assert!(h.publisher.snapshots().await.is_empty());
}

#[tokio::test]
async fn run_loop_ticks_until_shutdown() {
    let store = Arc::new(MemoryLeaseStore::new());
    let h = node(&store, "node-1", "1");

    h.source.set(vec![record("c", "1.0.0")]).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reconciler = Arc::new(h.reconciler);
    let loop_handle = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move {
            reconciler.run(Duration::from_millis(10), shutdown_rx).await;
        })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    shutdown_tx.send(true).unwrap();
    loop_handle.await.unwrap();

    // At least one tick ran and converged the node.
    assert!(h.supervisor.running().await.contains(&id("c", "1.0.0")));
    assert!(!h.publisher.snapshots().await.is_empty());
}
