/**
 * NORMALISATION - Bundle brut Docker → Snapshot canonique
 *
 * RÔLE :
 * Produit le snapshot exposé aux observateurs à partir d'un bundle complet et
 * des dernières métriques dérivées.
 *
 * FONCTIONNEMENT :
 * - Redaction : seuls les champs du schéma canonique (`models`) sont recopiés
 * - Réseaux : identités résolues, référence inconnue → réseau vide de substitution
 * - Tâches : séparées en assignées (NodeID présent) / planifiées
 * - Âge relatif calculé depuis le timestamp de statut (optionnel)
 * - Ordre stable : nœuds et services par nom, réseaux ingress d'abord puis par nom,
 *   tâches par (service, slot, id). L'API Docker renvoie des collections non
 *   ordonnées alors que l'empreinte dépend de l'ordre.
 */

use crate::docker::{RawBundle, RawNetwork, RawTask};
use crate::metrics::DerivedMetrics;
use crate::models::{
    ContainerSpec, ManagerStatus, Network, Node, NodeStatus, Service, Snapshot, Task, TaskInfo, TaskStatus,
};
use crate::topology;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

/// Post-filtre optionnel de l'historique des tâches assignées
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskHistory {
    /// Toutes les tâches rapportées par l'orchestrateur
    #[default]
    All,
    /// Sans les tâches `rejected` / `shutdown`
    WithoutCompleted,
    /// Sans les tâches terminées ni les échecs antérieurs à la dernière tâche saine du slot
    WithoutFailedHistory,
}

impl FromStr for TaskHistory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "without-completed" => Ok(Self::WithoutCompleted),
            "without-failed-history" => Ok(Self::WithoutFailedHistory),
            other => Err(format!("unknown task history mode '{other}'")),
        }
    }
}

fn is_completed(task: &Task) -> bool {
    matches!(task.status.state.as_str(), "rejected" | "shutdown")
}

fn is_failed(task: &Task) -> bool {
    task.status.state == "failed"
}

fn status_time(task: &Task) -> OffsetDateTime {
    OffsetDateTime::parse(&task.status.timestamp, &Rfc3339).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

impl TaskHistory {
    pub fn apply(self, tasks: Vec<Task>) -> Vec<Task> {
        match self {
            TaskHistory::All => tasks,
            TaskHistory::WithoutCompleted => tasks.into_iter().filter(|t| !is_completed(t)).collect(),
            TaskHistory::WithoutFailedHistory => {
                let mut groups: BTreeMap<(String, u64), Vec<Task>> = BTreeMap::new();
                for task in tasks.into_iter().filter(|t| !is_completed(t)) {
                    let key = (task.service_id.clone(), task.slot.unwrap_or(0));
                    groups.entry(key).or_default().push(task);
                }
                groups.into_values().flat_map(prune_failed_history).collect()
            }
        }
    }
}

/// Un slot : on retire les échecs plus anciens que la dernière tâche non échouée ;
/// sans tâche saine, on ne garde que la plus récente
fn prune_failed_history(mut tasks: Vec<Task>) -> Vec<Task> {
    let latest_healthy = tasks.iter().filter(|t| !is_failed(t)).map(status_time).max();
    match latest_healthy {
        Some(healthy) => {
            tasks.retain(|t| !(is_failed(t) && status_time(t) < healthy));
            tasks
        }
        None => {
            tasks.sort_by_key(|t| std::cmp::Reverse(status_time(t)));
            tasks.truncate(1);
            tasks
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    pub show_networks: bool,
    pub show_task_age: bool,
    pub task_history: TaskHistory,
}

/// Âge humain façon "3 minutes ago" / "in a minute"
pub fn relative_age(then: OffsetDateTime, now: OffsetDateTime) -> String {
    let seconds = (now - then).whole_seconds();
    let phrase = humanize(seconds.unsigned_abs());
    if seconds < 0 {
        format!("in {phrase}")
    } else {
        format!("{phrase} ago")
    }
}

fn humanize(seconds: u64) -> String {
    let minutes = (seconds as f64 / 60.0).round() as u64;
    let hours = (seconds as f64 / 3600.0).round() as u64;
    let days = (seconds as f64 / 86400.0).round() as u64;
    match seconds {
        s if s < 45 => "a few seconds".to_string(),
        s if s < 90 => "a minute".to_string(),
        _ if minutes < 45 => format!("{minutes} minutes"),
        _ if minutes < 90 => "an hour".to_string(),
        _ if hours < 22 => format!("{hours} hours"),
        _ if hours < 36 => "a day".to_string(),
        _ => format!("{days} days"),
    }
}

fn network_record(raw: &RawNetwork) -> Network {
    Network { id: raw.id.clone(), name: raw.name.clone(), ingress: raw.ingress }
}

fn task_record(
    raw: &RawTask,
    service_images: &HashMap<&str, &str>,
    metrics: &DerivedMetrics,
    options: &NormalizeOptions,
    now: OffsetDateTime,
) -> Task {
    let image = raw.spec.container_spec.image.clone();
    let stale = service_images
        .get(raw.service_id.as_str())
        .is_some_and(|service_image| *service_image != image);

    let timestate_info = options
        .show_task_age
        .then(|| OffsetDateTime::parse(&raw.status.timestamp, &Rfc3339).ok())
        .flatten()
        .map(|then| relative_age(then, now));

    let info = metrics
        .containers
        .get(&raw.id)
        .map(|c| TaskInfo { cpu: c.cpu_label(), memory: c.memory_label() })
        .unwrap_or_default();

    Task {
        id: raw.id.clone(),
        service_id: raw.service_id.clone(),
        node_id: raw.assigned_node().map(str::to_string),
        slot: raw.slot,
        status: TaskStatus {
            timestamp: raw.status.timestamp.clone(),
            timestate_info,
            state: raw.status.state.clone(),
        },
        desired_state: raw.desired_state.clone(),
        container_spec: ContainerSpec { image },
        info,
        stale,
    }
}

fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        (&a.service_id, a.slot, &a.node_id, &a.id).cmp(&(&b.service_id, b.slot, &b.node_id, &b.id))
    });
}

pub fn normalize(
    bundle: &RawBundle,
    metrics: &DerivedMetrics,
    options: &NormalizeOptions,
    now: OffsetDateTime,
) -> Snapshot {
    let mut nodes: Vec<Node> = bundle
        .nodes
        .iter()
        .map(|raw| Node {
            id: raw.id.clone(),
            name: raw.description.hostname.clone(),
            role: raw.spec.role,
            status: NodeStatus { state: raw.status.state.clone(), address: raw.status.addr.clone() },
            manager_status: raw
                .manager_status
                .as_ref()
                .map(|m| ManagerStatus { leader: m.leader, reachability: m.reachability.clone() }),
            info: metrics.hosts.get(&raw.id).and_then(|h| h.summary()),
        })
        .collect();
    nodes.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));

    let network_index: HashMap<&str, &RawNetwork> = bundle.networks.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut services: Vec<Service> = bundle
        .services
        .iter()
        .map(|raw| Service {
            id: raw.id.clone(),
            name: raw.spec.name.clone(),
            container_spec: ContainerSpec { image: raw.spec.task_template.container_spec.image.clone() },
            networks: raw
                .network_ids()
                .into_iter()
                .map(|id| network_index.get(id).map_or_else(Network::placeholder, |n| network_record(n)))
                .collect(),
        })
        .collect();
    services.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));

    let networks = if options.show_networks {
        let mut seen = HashSet::new();
        let mut columns: Vec<Network> = services
            .iter()
            .flat_map(|s| s.networks.iter())
            .filter(|n| !n.id.is_empty() && seen.insert(n.id.clone()))
            .cloned()
            .collect();
        columns.sort_by(|a, b| (!a.ingress, &a.name, &a.id).cmp(&(!b.ingress, &b.name, &b.id)));
        columns
    } else {
        Vec::new()
    };

    let service_images: HashMap<&str, &str> = bundle
        .services
        .iter()
        .map(|s| (s.id.as_str(), s.spec.task_template.container_spec.image.as_str()))
        .collect();

    let (assigned, mut planned_tasks): (Vec<Task>, Vec<Task>) = bundle
        .tasks
        .iter()
        .map(|raw| task_record(raw, &service_images, metrics, options, now))
        .partition(Task::is_assigned);
    let mut assigned_tasks = options.task_history.apply(assigned);
    sort_tasks(&mut assigned_tasks);
    sort_tasks(&mut planned_tasks);

    let connections = topology::resolve(&services, &networks);

    Snapshot {
        nodes,
        networks,
        services,
        assigned_tasks,
        planned_tasks,
        connections,
        refresh_time: format_refresh_time(now),
        fingerprint: String::new(),
    }
}

fn format_refresh_time(now: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
    now.format(&format).unwrap_or_default()
}
