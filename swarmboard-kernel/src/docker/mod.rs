/**
 * DOCKER API - Lecture brute de l'orchestrateur (nodes, services, networks, tasks)
 *
 * RÔLE :
 * Décrit le sous-ensemble du schéma de l'Engine API que le kernel lit, et
 * récupère les quatre collections en un seul "bundle" cohérent.
 *
 * FONCTIONNEMENT :
 * - Les structures `Raw*` ne déclarent que les champs utiles : tout le reste du
 *   JSON (Env, Labels, Secrets, Placement...) est ignoré dès la désérialisation
 * - `fetch_bundle` lance les quatre requêtes en parallèle ; un seul échec
 *   annule tout le cycle (jamais de bundle partiel)
 * - `OrchestratorApi` abstrait le transport (socket Unix en prod, mémoire en test)
 */

#[cfg(unix)]
pub mod socket;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;

/// Erreurs possibles lors d'un cycle de lecture de l'orchestrateur
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("cannot reach docker socket {socket}: {source}")]
    Connect { socket: String, source: std::io::Error },
    #[error("HTTP error on {path}: {source}")]
    Http { path: String, source: hyper::Error },
    #[error("invalid request for {path}: {source}")]
    Request { path: String, source: axum::http::Error },
    #[error("{path} answered with status {status}")]
    Status { path: String, status: u16 },
    #[error("invalid JSON from {path}: {source}")]
    Json { path: String, source: serde_json::Error },
}

/// Transport vers l'API de lecture de l'orchestrateur
pub trait OrchestratorApi: Send + Sync {
    /// GET `path`, renvoie le corps brut d'une réponse 2xx
    fn get(&self, path: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawNode {
    #[serde(rename = "ID")]
    pub id: String,
    pub description: RawNodeDescription,
    pub spec: RawNodeSpec,
    pub status: RawNodeStatus,
    pub manager_status: Option<RawManagerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawNodeDescription {
    pub hostname: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawNodeSpec {
    pub role: crate::models::NodeRole,
}

impl Default for RawNodeSpec {
    fn default() -> Self {
        Self { role: crate::models::NodeRole::Worker }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawNodeStatus {
    pub state: String,
    pub addr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawManagerStatus {
    pub leader: bool,
    pub reachability: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawNetwork {
    pub id: String,
    pub name: String,
    pub ingress: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawService {
    #[serde(rename = "ID")]
    pub id: String,
    pub spec: RawServiceSpec,
    pub endpoint: Option<RawEndpoint>,
}

impl RawService {
    /// Réseaux attachés : VirtualIPs de l'endpoint, sinon réseaux du template de tâche
    pub fn network_ids(&self) -> Vec<&str> {
        match self.endpoint.as_ref().and_then(|e| e.virtual_ips.as_ref()) {
            Some(vips) => vips.iter().map(|vip| vip.network_id.as_str()).collect(),
            None => self.spec.task_template.networks.iter().map(|n| n.target.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawServiceSpec {
    pub name: String,
    pub task_template: RawTaskTemplate,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawTaskTemplate {
    pub container_spec: RawContainerSpec,
    pub networks: Vec<RawNetworkTarget>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawNetworkTarget {
    pub target: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawContainerSpec {
    pub image: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawEndpoint {
    #[serde(rename = "VirtualIPs")]
    pub virtual_ips: Option<Vec<RawVirtualIp>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawVirtualIp {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawTask {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(rename = "NodeID")]
    pub node_id: Option<String>,
    pub slot: Option<u64>,
    pub desired_state: String,
    pub status: RawTaskStatus,
    pub spec: RawTaskSpec,
    pub networks_attachments: Vec<RawNetworkAttachment>,
}

impl RawTask {
    /// Un NodeID vide équivaut à une tâche non planifiée
    pub fn assigned_node(&self) -> Option<&str> {
        self.node_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawTaskStatus {
    pub timestamp: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawTaskSpec {
    pub container_spec: RawContainerSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawNetworkAttachment {
    pub network: RawAttachedNetwork,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawAttachedNetwork {
    pub spec: RawAttachedNetworkSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawAttachedNetworkSpec {
    pub name: String,
    pub ingress: bool,
}

/// Résultat complet d'un cycle de lecture
#[derive(Debug, Clone, Default)]
pub struct RawBundle {
    pub nodes: Vec<RawNode>,
    pub services: Vec<RawService>,
    pub networks: Vec<RawNetwork>,
    pub tasks: Vec<RawTask>,
}

async fn fetch_list<A, T>(api: &A, path: &str) -> Result<Vec<T>, FetchError>
where
    A: OrchestratorApi,
    T: DeserializeOwned,
{
    let body = api.get(path).await?;
    serde_json::from_slice(&body).map_err(|source| FetchError::Json { path: path.to_string(), source })
}

/// Lit les quatre collections en parallèle ; échoue dès qu'une seule échoue
pub async fn fetch_bundle<A: OrchestratorApi>(api: &A) -> Result<RawBundle, FetchError> {
    let (nodes, services, networks, tasks) = tokio::try_join!(
        fetch_list(api, "/nodes"),
        fetch_list(api, "/services"),
        fetch_list(api, "/networks"),
        fetch_list(api, "/tasks"),
    )?;
    Ok(RawBundle { nodes, services, networks, tasks })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{FetchError, OrchestratorApi};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Orchestrateur en mémoire : un corps JSON ou un code d'erreur par chemin
    #[derive(Default)]
    pub struct StaticOrchestrator {
        responses: Mutex<HashMap<String, Result<Vec<u8>, u16>>>,
    }

    impl StaticOrchestrator {
        pub fn from_endpoints(endpoints: Vec<(&'static str, serde_json::Value)>) -> Self {
            let orchestrator = Self::default();
            orchestrator.load(endpoints);
            orchestrator
        }

        pub fn load(&self, endpoints: Vec<(&'static str, serde_json::Value)>) {
            let mut responses = self.responses.lock();
            for (path, body) in endpoints {
                responses.insert(path.to_string(), Ok(body.to_string().into_bytes()));
            }
        }

        pub fn set_raw(&self, path: &str, body: &str) {
            self.responses.lock().insert(path.to_string(), Ok(body.as_bytes().to_vec()));
        }

        pub fn fail(&self, path: &str, status: u16) {
            self.responses.lock().insert(path.to_string(), Err(status));
        }
    }

    impl OrchestratorApi for StaticOrchestrator {
        async fn get(&self, path: &str) -> Result<Vec<u8>, FetchError> {
            let response = self.responses.lock().get(path).cloned();
            match response {
                Some(Ok(body)) => Ok(body),
                Some(Err(status)) => Err(FetchError::Status { path: path.to_string(), status }),
                None => Err(FetchError::Status { path: path.to_string(), status: 404 }),
            }
        }
    }
}
