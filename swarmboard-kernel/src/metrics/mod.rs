/**
 * MÉTRIQUES - Dérivation des pourcentages hôtes et conteneurs
 *
 * RÔLE :
 * Transforme les échantillons bruts des exporters (node-exporter par nœud,
 * cAdvisor par conteneur) en petites chaînes lisibles fusionnées dans le
 * champ `info` des nœuds et des tâches.
 *
 * FONCTIONNEMENT :
 * - disque : 100 × (1 − avail/size) pour le point de montage configuré
 * - CPU : taux du compteur cumulatif non-idle entre deux collectes successives
 *   (un échantillon isolé ne donne aucun pourcentage)
 * - mémoire hôte : 100 × (1 − (free+cached+buffers)/total)
 * - mémoire conteneur : RSS en octets, sans taux
 * - toute entrée manquante omet simplement le champ dérivé
 *
 * Les échantillons bruts ne sortent jamais de `MetricsState` : seul
 * `DerivedMetrics` est partagé avec la normalisation.
 */

pub mod collector;
pub mod exposition;

use exposition::Sample;
use std::collections::HashMap;
use std::time::Instant;

pub use collector::{MetricsCollector, MetricsError};

/// Label cAdvisor portant l'identité de tâche Swarm
pub const TASK_ID_LABEL: &str = "container_label_com_docker_swarm_task_id";

/// Valeur d'un compteur cumulatif à un instant donné
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSample {
    pub at: Instant,
    pub value: f64,
}

/// Pourcentage d'utilisation dérivé de deux lectures successives d'un compteur en secondes
pub fn rate_percent(previous: Option<CounterSample>, current: CounterSample) -> Option<f64> {
    let previous = previous?;
    let elapsed = current.at.checked_duration_since(previous.at)?.as_secs_f64();
    let delta = current.value - previous.value;
    // compteur remis à zéro (redémarrage de l'exporter) : pas de taux ce tour-ci
    if elapsed <= 0.0 || delta < 0.0 {
        return None;
    }
    Some(100.0 * delta / elapsed)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostMetrics {
    pub disk: Option<f64>,
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
}

impl HostMetrics {
    pub fn is_empty(&self) -> bool {
        self.disk.is_none() && self.cpu.is_none() && self.memory.is_none()
    }

    /// "disk: 42% | cpu: 10% | mem: 55%", champs absents omis
    pub fn summary(&self) -> Option<String> {
        let parts: Vec<String> = [("disk", self.disk), ("cpu", self.cpu), ("mem", self.memory)]
            .into_iter()
            .filter_map(|(label, value)| value.map(|v| format!("{label}: {v:.0}%")))
            .collect();
        (!parts.is_empty()).then(|| parts.join(" | "))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerMetrics {
    pub cpu: Option<f64>,
    pub memory_bytes: Option<f64>,
}

impl ContainerMetrics {
    pub fn cpu_label(&self) -> Option<String> {
        self.cpu.map(|v| format!("cpu: {v:.0}%"))
    }

    pub fn memory_label(&self) -> Option<String> {
        self.memory_bytes.map(|b| format!("mem: {}", format_bytes(b)))
    }
}

fn format_bytes(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    if bytes >= GB {
        format!("{:.1} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.0} MB", bytes / MB)
    } else {
        format!("{:.0} KB", bytes / KB)
    }
}

/// Dernières métriques connues, réutilisées entre deux collectes
#[derive(Debug, Clone, Default)]
pub struct DerivedMetrics {
    /// Par identité de nœud
    pub hosts: HashMap<String, HostMetrics>,
    /// Par identité de tâche
    pub containers: HashMap<String, ContainerMetrics>,
}

fn value_of(samples: &[Sample], name: &str) -> Option<f64> {
    samples.iter().find(|s| s.name == name).map(|s| s.value)
}

pub fn disk_percent(samples: &[Sample], mount_point: &str) -> Option<f64> {
    let on_mount = |name: &str| {
        samples
            .iter()
            .find(|s| s.name == name && s.label("mountpoint") == Some(mount_point))
            .map(|s| s.value)
    };
    let size = on_mount("node_filesystem_size_bytes")?;
    let avail = on_mount("node_filesystem_avail_bytes")?;
    (size > 0.0).then(|| 100.0 * (1.0 - avail / size))
}

/// Somme des secondes CPU hors mode idle, tous cœurs confondus
pub fn busy_cpu_seconds(samples: &[Sample]) -> Option<f64> {
    samples
        .iter()
        .filter(|s| s.name == "node_cpu_seconds_total" && s.label("mode") != Some("idle"))
        .map(|s| s.value)
        .reduce(|a, b| a + b)
}

pub fn memory_percent(samples: &[Sample]) -> Option<f64> {
    let total = value_of(samples, "node_memory_MemTotal_bytes")?;
    let free = value_of(samples, "node_memory_MemFree_bytes")?;
    let cached = value_of(samples, "node_memory_Cached_bytes")?;
    let buffers = value_of(samples, "node_memory_Buffers_bytes")?;
    (total > 0.0).then(|| 100.0 * (1.0 - (free + cached + buffers) / total))
}

/// Somme par tâche d'une série cAdvisor (une ligne par cpu ou par conteneur)
pub fn per_task_sum(samples: &[Sample], name: &str) -> HashMap<String, f64> {
    let mut sums = HashMap::new();
    for sample in samples.iter().filter(|s| s.name == name) {
        if let Some(task_id) = sample.label(TASK_ID_LABEL).filter(|id| !id.is_empty()) {
            *sums.entry(task_id.to_string()).or_insert(0.0) += sample.value;
        }
    }
    sums
}

/// Compteurs précédents, propriété exclusive du collecteur
#[derive(Debug, Default)]
pub struct MetricsState {
    host_cpu: HashMap<String, CounterSample>,
    container_cpu: HashMap<String, CounterSample>,
}

impl MetricsState {
    pub fn ingest_host(&mut self, node_id: &str, samples: &[Sample], mount_point: &str, at: Instant) -> HostMetrics {
        let cpu = busy_cpu_seconds(samples).and_then(|value| {
            let current = CounterSample { at, value };
            let previous = self.host_cpu.insert(node_id.to_string(), current);
            rate_percent(previous, current)
        });

        HostMetrics {
            disk: disk_percent(samples, mount_point),
            cpu,
            memory: memory_percent(samples),
        }
    }

    pub fn ingest_containers(&mut self, samples: &[Sample], at: Instant) -> HashMap<String, ContainerMetrics> {
        let mut containers: HashMap<String, ContainerMetrics> = HashMap::new();

        for (task_id, value) in per_task_sum(samples, "container_cpu_usage_seconds_total") {
            let current = CounterSample { at, value };
            let previous = self.container_cpu.insert(task_id.clone(), current);
            if let Some(cpu) = rate_percent(previous, current) {
                containers.entry(task_id).or_default().cpu = Some(cpu);
            }
        }
        for (task_id, rss) in per_task_sum(samples, "container_memory_rss") {
            containers.entry(task_id).or_default().memory_bytes = Some(rss);
        }

        containers
    }

    /// Oublie les compteurs non rafraîchis depuis `cutoff` (tâche disparue, nœud muet)
    pub fn prune_older_than(&mut self, cutoff: Instant) {
        self.host_cpu.retain(|_, sample| sample.at >= cutoff);
        self.container_cpu.retain(|_, sample| sample.at >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use swarmboard_devkit::{CadvisorFixture, NodeExporterFixture};

    fn host_samples(busy: f64) -> Vec<Sample> {
        let doc = NodeExporterFixture { cpu_busy_seconds: busy, ..NodeExporterFixture::default() }.render();
        exposition::parse(&doc).unwrap()
    }

    #[test]
    fn test_cpu_rate_over_ten_seconds() {
        let t0 = Instant::now();
        let mut state = MetricsState::default();

        let first = state.ingest_host("n1", &host_samples(100.0), "/", t0);
        assert_eq!(first.cpu, None);

        let second = state.ingest_host("n1", &host_samples(102.0), "/", t0 + Duration::from_secs(10));
        let cpu = second.cpu.unwrap();
        assert!((cpu - 20.0).abs() < 1e-9, "cpu was {cpu}");
    }

    #[test]
    fn test_cpu_rate_is_per_node() {
        let t0 = Instant::now();
        let mut state = MetricsState::default();
        state.ingest_host("n1", &host_samples(100.0), "/", t0);
        let other = state.ingest_host("n2", &host_samples(500.0), "/", t0 + Duration::from_secs(5));
        assert_eq!(other.cpu, None);
    }

    #[test]
    fn test_rate_requires_positive_elapsed_and_monotonic_counter() {
        let t0 = Instant::now();
        let a = CounterSample { at: t0, value: 10.0 };
        assert_eq!(rate_percent(Some(a), a), None);
        let reset = CounterSample { at: t0 + Duration::from_secs(5), value: 1.0 };
        assert_eq!(rate_percent(Some(a), reset), None);
        assert_eq!(rate_percent(None, reset), None);
    }

    #[test]
    fn test_disk_and_memory_percentages() {
        let doc = NodeExporterFixture {
            mount_point: "/data".into(),
            fs_size_bytes: 200.0,
            fs_avail_bytes: 116.0,
            mem_total_bytes: 1000.0,
            mem_free_bytes: 200.0,
            mem_cached_bytes: 200.0,
            mem_buffers_bytes: 50.0,
            ..NodeExporterFixture::default()
        }
        .render();
        let samples = exposition::parse(&doc).unwrap();

        assert_eq!(disk_percent(&samples, "/data").map(f64::round), Some(42.0));
        assert_eq!(disk_percent(&samples, "/"), None);
        assert_eq!(memory_percent(&samples).map(f64::round), Some(55.0));
    }

    #[test]
    fn test_missing_inputs_omit_fields() {
        let samples = exposition::parse("node_memory_MemTotal_bytes 1000\n").unwrap();
        let mut state = MetricsState::default();
        let host = state.ingest_host("n1", &samples, "/", Instant::now());
        assert!(host.is_empty());
        assert_eq!(host.summary(), None);
    }

    #[test]
    fn test_host_summary_format() {
        let host = HostMetrics { disk: Some(42.2), cpu: Some(9.6), memory: Some(55.0) };
        assert_eq!(host.summary().as_deref(), Some("disk: 42% | cpu: 10% | mem: 55%"));

        let partial = HostMetrics { disk: None, cpu: None, memory: Some(12.0) };
        assert_eq!(partial.summary().as_deref(), Some("mem: 12%"));
    }

    #[test]
    fn test_container_cpu_and_memory_by_task() {
        let t0 = Instant::now();
        let mut state = MetricsState::default();

        let first = CadvisorFixture::default()
            .container("task-a", 10.0, 64.0 * 1024.0 * 1024.0)
            .render();
        let containers = state.ingest_containers(&exposition::parse(&first).unwrap(), t0);
        assert_eq!(containers["task-a"].cpu, None);
        assert_eq!(containers["task-a"].memory_label().as_deref(), Some("mem: 64 MB"));

        let second = CadvisorFixture::default()
            .container("task-a", 11.0, 64.0 * 1024.0 * 1024.0)
            .render();
        let containers = state.ingest_containers(&exposition::parse(&second).unwrap(), t0 + Duration::from_secs(4));
        assert_eq!(containers["task-a"].cpu_label().as_deref(), Some("cpu: 25%"));
    }

    #[test]
    fn test_rescheduled_tasks_do_not_accumulate() {
        let t0 = Instant::now();
        let mut state = MetricsState::default();
        for round in 0..100u64 {
            let at = t0 + Duration::from_secs(round);
            let doc = CadvisorFixture::default().container(&format!("task-{round}"), 1.0, 1024.0).render();
            state.ingest_containers(&exposition::parse(&doc).unwrap(), at);
            state.ingest_host(&format!("n{}", round % 2), &host_samples(round as f64), "/", at);
            state.prune_older_than(at);
        }
        assert_eq!(state.container_cpu.len(), 1);
        assert!(state.container_cpu.contains_key("task-99"));
        assert_eq!(state.host_cpu.len(), 1);
        assert!(state.host_cpu.contains_key("n1"));
    }

    #[test]
    fn test_counter_survives_prune_when_refreshed() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(10);
        let mut state = MetricsState::default();
        state.ingest_host("n1", &host_samples(100.0), "/", t0);
        state.prune_older_than(t0);

        let host = state.ingest_host("n1", &host_samples(102.0), "/", t1);
        state.prune_older_than(t1);
        assert!(host.cpu.is_some());
        assert_eq!(state.host_cpu.len(), 1);
    }

    #[test]
    fn test_per_task_sum_adds_per_cpu_series() {
        let samples = exposition::parse(&format!(
            "container_cpu_usage_seconds_total{{cpu=\"cpu00\",{TASK_ID_LABEL}=\"t1\"}} 1.5\n\
             container_cpu_usage_seconds_total{{cpu=\"cpu01\",{TASK_ID_LABEL}=\"t1\"}} 2.5\n\
             container_cpu_usage_seconds_total{{cpu=\"cpu00\",id=\"/system.slice\"}} 99\n"
        ))
        .unwrap();
        let sums = per_task_sum(&samples, "container_cpu_usage_seconds_total");
        assert_eq!(sums.len(), 1);
        assert_eq!(sums["t1"], 4.0);
    }

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(512.0 * 1024.0), "512 KB");
        assert_eq!(format_bytes(3.0 * 1024.0 * 1024.0 * 1024.0), "3.0 GB");
    }
}
