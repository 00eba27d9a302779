//! Metrics collection loop.
//!
//! Runs on its own timer, independent of the orchestrator poll. Targets are
//! refreshed by the poller after every successful bundle; the loop only reads
//! them, fetches every exporter concurrently and swaps the derived metrics.

use super::exposition::{self, ExpositionError, Sample};
use super::{DerivedMetrics, MetricsState};
use crate::config::MetricsConf;
use crate::docker::{RawBundle, RawTask};
use crate::state::{new_cell, new_state, Shared, SharedCell};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("invalid exporter service pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("exporter request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid exposition document: {0}")]
    Exposition(#[from] ExpositionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterKind {
    /// node-exporter, un par nœud
    Host,
    /// cAdvisor, métriques par conteneur
    Container,
}

/// Une instance d'exporter joignable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsTarget {
    pub kind: ExporterKind,
    pub node_id: String,
    pub task_id: String,
    /// "ip:port"
    pub address: String,
}

/// Motifs de nom de service identifiant les exporters
#[derive(Debug, Clone, Default)]
pub struct ExporterPatterns {
    host: Option<(Regex, u16)>,
    container: Option<(Regex, u16)>,
}

impl ExporterPatterns {
    pub fn from_config(conf: &MetricsConf) -> Result<Self, MetricsError> {
        let compile = |pattern: &Option<String>, port: u16| -> Result<Option<(Regex, u16)>, MetricsError> {
            Ok(match pattern.as_deref().filter(|p| !p.is_empty()) {
                Some(p) => Some((Regex::new(p)?, port)),
                None => None,
            })
        };
        Ok(Self {
            host: compile(&conf.node_exporter_pattern, conf.node_exporter_port)?,
            container: compile(&conf.cadvisor_pattern, conf.cadvisor_port)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.container.is_none()
    }

    fn classify(&self, service_name: &str) -> Option<(ExporterKind, u16)> {
        if let Some((re, port)) = &self.host {
            if re.is_match(service_name) {
                return Some((ExporterKind::Host, *port));
            }
        }
        if let Some((re, port)) = &self.container {
            if re.is_match(service_name) {
                return Some((ExporterKind::Container, *port));
            }
        }
        None
    }
}

/// Première adresse d'un attachement non-ingress, sinon de n'importe quel attachement
fn task_address(task: &RawTask) -> Option<String> {
    let first_ip = |addresses: &[String]| {
        addresses
            .first()
            .and_then(|cidr| cidr.split('/').next())
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    };
    let attachments = &task.networks_attachments;
    attachments
        .iter()
        .filter(|a| !a.network.spec.ingress)
        .find_map(|a| first_ip(&a.addresses))
        .or_else(|| attachments.iter().find_map(|a| first_ip(&a.addresses)))
}

/// Tâches d'exporters en cours d'exécution, assignées et adressables
pub fn discover_targets(bundle: &RawBundle, patterns: &ExporterPatterns) -> Vec<MetricsTarget> {
    let kinds: HashMap<&str, (ExporterKind, u16)> = bundle
        .services
        .iter()
        .filter_map(|s| patterns.classify(&s.spec.name).map(|kind| (s.id.as_str(), kind)))
        .collect();

    let mut targets: Vec<MetricsTarget> = bundle
        .tasks
        .iter()
        .filter(|t| t.status.state == "running")
        .filter_map(|task| {
            let (kind, port) = *kinds.get(task.service_id.as_str())?;
            let node_id = task.assigned_node()?;
            let ip = task_address(task)?;
            Some(MetricsTarget {
                kind,
                node_id: node_id.to_string(),
                task_id: task.id.clone(),
                address: format!("{ip}:{port}"),
            })
        })
        .collect();
    targets.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    targets
}

pub struct MetricsCollector {
    http: reqwest::Client,
    patterns: ExporterPatterns,
    mount_point: String,
    targets: Shared<Vec<MetricsTarget>>,
    state: Shared<MetricsState>,
    latest: SharedCell<Arc<DerivedMetrics>>,
}

impl MetricsCollector {
    pub fn new(conf: &MetricsConf) -> Result<Self, MetricsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(conf.fetch_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            patterns: ExporterPatterns::from_config(conf)?,
            mount_point: conf.mount_point.clone(),
            targets: new_state(Vec::new()),
            state: new_state(MetricsState::default()),
            latest: new_cell(Arc::new(DerivedMetrics::default())),
        })
    }

    pub fn enabled(&self) -> bool {
        !self.patterns.is_empty()
    }

    /// Appelé par le poller après chaque bundle complet
    pub fn update_targets(&self, bundle: &RawBundle) {
        if !self.enabled() {
            return;
        }
        let targets = discover_targets(bundle, &self.patterns);
        let mut current = self.targets.lock();
        if *current != targets {
            debug!("[metrics] {} exporter targets", targets.len());
            *current = targets;
        }
    }

    /// Dernières métriques dérivées connues
    pub fn latest(&self) -> Arc<DerivedMetrics> {
        self.latest.read().clone()
    }

    async fn fetch(&self, target: &MetricsTarget) -> Result<(Vec<Sample>, Instant), MetricsError> {
        let text = self
            .http
            .get(format!("http://{}/metrics", target.address))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let at = Instant::now();
        Ok((exposition::parse(&text)?, at))
    }

    /// Un tour de collecte : exporters injoignables ignorés, leurs champs omis
    pub async fn collect(&self) {
        let targets = self.targets.lock().clone();
        if targets.is_empty() {
            return;
        }

        let started = Instant::now();
        let results = futures::future::join_all(targets.iter().map(|t| self.fetch(t))).await;

        let mut derived = DerivedMetrics::default();
        {
            let mut state = self.state.lock();
            for (target, result) in targets.iter().zip(results) {
                let (samples, at) = match result {
                    Ok(fetched) => fetched,
                    Err(e) => {
                        warn!("[metrics] {} ({}) unavailable: {e}", target.address, target.task_id);
                        continue;
                    }
                };
                match target.kind {
                    ExporterKind::Host => {
                        let host = state.ingest_host(&target.node_id, &samples, &self.mount_point, at);
                        if !host.is_empty() {
                            derived.hosts.insert(target.node_id.clone(), host);
                        }
                    }
                    ExporterKind::Container => {
                        derived.containers.extend(state.ingest_containers(&samples, at));
                    }
                }
            }
            // tout compteur lu pendant ce tour est daté après `started`
            state.prune_older_than(started);
        }

        debug!(
            "[metrics] derived {} hosts, {} containers",
            derived.hosts.len(),
            derived.containers.len()
        );
        *self.latest.write() = Arc::new(derived);
    }

    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        info!("[metrics] collecting every {}ms", every.as_millis());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.collect().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::testing::StaticOrchestrator;
    use crate::docker::fetch_bundle;
    use swarmboard_devkit::{SwarmFixture, TaskFixture};

    fn conf() -> MetricsConf {
        MetricsConf {
            node_exporter_pattern: Some("node-exporter$".into()),
            cadvisor_pattern: Some("cadvisor$".into()),
            ..MetricsConf::default()
        }
    }

    async fn bundle(fixture: SwarmFixture) -> RawBundle {
        fetch_bundle(&StaticOrchestrator::from_endpoints(fixture.endpoints())).await.unwrap()
    }

    #[tokio::test]
    async fn test_discover_running_exporters_with_addresses() {
        let fixture = SwarmFixture::new()
            .node("n1", "alpha")
            .node("n2", "beta")
            .network("net-ingress", "ingress", true)
            .network("net-mon", "monitoring", false)
            .service("s-ne", "mon_node-exporter", "prom/node-exporter", &["net-mon"])
            .service("s-ca", "mon_cadvisor", "gcr.io/cadvisor", &["net-mon"])
            .service("s-web", "web", "nginx", &["net-ingress"])
            .task(
                TaskFixture::running("t-ne1", "s-ne", "n1", "prom/node-exporter")
                    .attachment("ingress", true, "10.0.0.7/24")
                    .attachment("monitoring", false, "10.0.9.3/24"),
            )
            .task(TaskFixture::running("t-ne2", "s-ne", "n2", "prom/node-exporter").state("failed").attachment(
                "monitoring",
                false,
                "10.0.9.4/24",
            ))
            .task(TaskFixture::running("t-ca1", "s-ca", "n1", "gcr.io/cadvisor").attachment("monitoring", false, "10.0.9.5/24"))
            .task(TaskFixture::planned("t-ca2", "s-ca", "gcr.io/cadvisor"))
            .task(TaskFixture::running("t-web", "s-web", "n2", "nginx").attachment("ingress", true, "10.0.0.9/24"));

        let patterns = ExporterPatterns::from_config(&conf()).unwrap();
        let targets = discover_targets(&bundle(fixture).await, &patterns);

        assert_eq!(
            targets,
            vec![
                MetricsTarget {
                    kind: ExporterKind::Container,
                    node_id: "n1".into(),
                    task_id: "t-ca1".into(),
                    address: "10.0.9.5:8080".into(),
                },
                MetricsTarget {
                    kind: ExporterKind::Host,
                    node_id: "n1".into(),
                    task_id: "t-ne1".into(),
                    address: "10.0.9.3:9100".into(),
                },
            ]
        );
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let bad = MetricsConf { node_exporter_pattern: Some("(".into()), ..MetricsConf::default() };
        assert!(matches!(ExporterPatterns::from_config(&bad), Err(MetricsError::Pattern(_))));
    }

    #[test]
    fn test_unset_patterns_disable_collection() {
        let collector = MetricsCollector::new(&MetricsConf::default()).unwrap();
        assert!(!collector.enabled());
    }

    #[tokio::test]
    async fn test_unreachable_exporter_leaves_metrics_empty() {
        let collector = MetricsCollector::new(&MetricsConf {
            fetch_timeout_ms: 200,
            node_exporter_port: 1,
            ..conf()
        })
        .unwrap();
        let fixture = SwarmFixture::new()
            .node("n1", "alpha")
            .network("net-mon", "monitoring", false)
            .service("s-ne", "mon_node-exporter", "prom/node-exporter", &["net-mon"])
            .task(TaskFixture::running("t-ne1", "s-ne", "n1", "prom/node-exporter").attachment("monitoring", false, "127.0.0.1/8"));
        collector.update_targets(&bundle(fixture).await);

        // rien n'écoute sur 127.0.0.1:1 : échec isolé, pas de panique
        collector.collect().await;
        assert!(collector.latest().hosts.is_empty());
    }
}
