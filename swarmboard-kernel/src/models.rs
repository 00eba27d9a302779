/**
 * SCHÉMA CANONIQUE - Ce que les observateurs reçoivent réellement
 *
 * RÔLE :
 * Liste blanche des champs exposés sur le fil. Tout ce qui n'est pas déclaré ici
 * (variables d'environnement, labels, secrets, contraintes de placement...) ne
 * peut pas apparaître dans un snapshot sérialisé.
 *
 * FONCTIONNEMENT :
 * - Construit par `normalize` à partir des structures brutes de `docker`
 * - Sérialisé en camelCase (format attendu par le client web)
 * - `fingerprint` est rempli par le détecteur de changements
 */

use crate::topology::ServiceConnections;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Manager,
    Worker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub state: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    pub leader: bool,
    pub reachability: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub role: NodeRole,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_status: Option<ManagerStatus>,
    /// Résumé métriques, ex: "disk: 42% | cpu: 10% | mem: 55%"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: String,
    pub name: String,
    pub ingress: bool,
}

impl Network {
    /// Réseau de substitution pour une référence introuvable
    pub fn placeholder() -> Self {
        Self { id: String::new(), name: String::new(), ingress: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub container_spec: ContainerSpec,
    pub networks: Vec<Network>,
}

impl Service {
    pub fn is_attached_to(&self, network_id: &str) -> bool {
        self.networks.iter().any(|n| n.id == network_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Horodatage RFC3339 tel que rapporté par l'orchestrateur
    pub timestamp: String,
    /// Âge relatif ("3 minutes ago"), si activé
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestate_info: Option<String>,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub service_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<u64>,
    pub status: TaskStatus,
    pub desired_state: String,
    pub container_spec: ContainerSpec,
    pub info: TaskInfo,
    /// Image de la tâche différente de celle du service (rolling update en cours)
    pub stale: bool,
}

impl Task {
    pub fn is_assigned(&self) -> bool {
        self.node_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub nodes: Vec<Node>,
    pub networks: Vec<Network>,
    pub services: Vec<Service>,
    pub assigned_tasks: Vec<Task>,
    pub planned_tasks: Vec<Task>,
    pub connections: Vec<ServiceConnections>,
    pub refresh_time: String,
    pub fingerprint: String,
}
