//! Orchestrator poll loop: fetch → normalize → detect change → publish.

use crate::docker::{fetch_bundle, OrchestratorApi};
use crate::hub::Hub;
use crate::metrics::MetricsCollector;
use crate::normalize::{normalize, NormalizeOptions};
use crate::snapshot::ChangeDetector;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Lecture ou sérialisation en échec, snapshot précédent conservé
    Failed,
    /// Empreinte identique, rien publié
    Unchanged,
    /// Nouveau snapshot publié à N abonnés
    Published(usize),
}

pub struct Poller<A> {
    api: A,
    metrics: Arc<MetricsCollector>,
    options: NormalizeOptions,
    detector: ChangeDetector,
    hub: Arc<Hub>,
}

impl<A: OrchestratorApi + 'static> Poller<A> {
    pub fn new(
        api: A,
        metrics: Arc<MetricsCollector>,
        options: NormalizeOptions,
        detector: ChangeDetector,
        hub: Arc<Hub>,
    ) -> Self {
        Self { api, metrics, options, detector, hub }
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        let bundle = match fetch_bundle(&self.api).await {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!("[poller] cycle skipped: {e}");
                return CycleOutcome::Failed;
            }
        };

        self.metrics.update_targets(&bundle);
        let derived = self.metrics.latest();
        let snapshot = normalize(&bundle, &derived, &self.options, OffsetDateTime::now_utc());

        match self.detector.offer(snapshot) {
            Ok(Some(published)) => {
                let short = published.fingerprint()[..8].to_owned();
                let delivered = self.hub.publish(published);
                info!("[poller] snapshot {short} published to {delivered} subscribers");
                CycleOutcome::Published(delivered)
            }
            Ok(None) => {
                debug!("[poller] no change");
                CycleOutcome::Unchanged
            }
            Err(e) => {
                warn!("[poller] cannot serialize snapshot: {e}");
                CycleOutcome::Failed
            }
        }
    }

    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        info!("[poller] polling every {}ms", every.as_millis());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.run_cycle().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConf, MetricsConf};
    use crate::docker::testing::StaticOrchestrator;
    use crate::normalize::TaskHistory;
    use crate::snapshot::SnapshotCache;
    use swarmboard_devkit::{SwarmFixture, TaskFixture};

    fn fixture(image: &str) -> SwarmFixture {
        SwarmFixture::new()
            .leader("n1", "alpha")
            .node("n2", "beta")
            .network("net-i", "ingress", true)
            .service("s1", "web", image, &["net-i"])
            .task(TaskFixture::running("t1", "s1", "n1", image).slot(1))
    }

    fn poller(api: StaticOrchestrator) -> (Poller<StaticOrchestrator>, Arc<Hub>) {
        let cache = SnapshotCache::new();
        let hub = Arc::new(Hub::new(&AuthConf::default(), cache.clone()));
        let metrics = Arc::new(MetricsCollector::new(&MetricsConf::default()).unwrap());
        let options = NormalizeOptions { show_networks: true, show_task_age: false, task_history: TaskHistory::All };
        let poller = Poller::new(api, metrics, options, ChangeDetector::new(cache), hub.clone());
        (poller, hub)
    }

    #[tokio::test]
    async fn test_identical_cycles_send_nothing() {
        let (poller, hub) = poller(StaticOrchestrator::from_endpoints(fixture("nginx:1").endpoints()));
        assert_eq!(poller.run_cycle().await, CycleOutcome::Published(0));

        let mut sub = hub.subscribe();
        assert!(sub.recv().await.is_some());

        assert_eq!(poller.run_cycle().await, CycleOutcome::Unchanged);
        assert_eq!(poller.run_cycle().await, CycleOutcome::Unchanged);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_change_is_broadcast() {
        let api = StaticOrchestrator::from_endpoints(fixture("nginx:1").endpoints());
        let (poller, hub) = poller(api);
        poller.run_cycle().await;
        let mut sub = hub.subscribe();
        let first = sub.recv().await.unwrap();

        poller.api.load(fixture("nginx:2").endpoints());
        assert_eq!(poller.run_cycle().await, CycleOutcome::Published(1));
        let second = sub.recv().await.unwrap();
        assert_ne!(first, second);
        assert!(second.contains("nginx:2"));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() {
        let api = StaticOrchestrator::from_endpoints(fixture("nginx:1").endpoints());
        let (poller, hub) = poller(api);
        poller.run_cycle().await;
        let before = poller.detector.cache().current().unwrap();

        poller.api.fail("/tasks", 500);
        assert_eq!(poller.run_cycle().await, CycleOutcome::Failed);
        assert!(Arc::ptr_eq(&before, &poller.detector.cache().current().unwrap()));

        // un abonné tardif reçoit toujours le dernier snapshot valide
        let mut sub = hub.subscribe();
        assert_eq!(sub.recv().await.as_deref(), Some(&*before.payload));
    }

    #[tokio::test]
    async fn test_reordered_bundle_is_not_a_change() {
        let fixture = fixture("nginx:1").node("n3", "gamma");
        let api = StaticOrchestrator::from_endpoints(fixture.endpoints());
        let (poller, _hub) = poller(api);
        poller.run_cycle().await;

        poller.api.load(fixture.permuted().endpoints());
        assert_eq!(poller.run_cycle().await, CycleOutcome::Unchanged);
    }
}
