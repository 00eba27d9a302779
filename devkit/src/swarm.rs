/*!
Faux état de swarm au format brut de l'Engine API

Chaque collection est rendue telle que `/nodes`, `/networks`, `/services` et
`/tasks` la renverraient, champs inutiles au kernel compris.
*/

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

/// Valeur présente uniquement dans des champs qui ne doivent jamais sortir du kernel
pub const SECRET_MARKER: &str = "sw4rmb0ard-s3cret";

/// Builder d'état de cluster
#[derive(Debug, Clone, Default)]
pub struct SwarmFixture {
    nodes: Vec<Value>,
    networks: Vec<Value>,
    services: Vec<Value>,
    tasks: Vec<Value>,
}

impl SwarmFixture {
    pub fn new() -> Self {
        Self::default()
    }

    fn node_json(&self, id: &str, hostname: &str, role: &str) -> Value {
        json!({
            "ID": id,
            "Version": { "Index": 42 },
            "Description": {
                "Hostname": hostname,
                "Platform": { "Architecture": "x86_64", "OS": "linux" },
                "Engine": { "EngineVersion": "24.0.7", "Labels": { "token": SECRET_MARKER } }
            },
            "Spec": {
                "Role": role,
                "Availability": "active",
                "Labels": { "vault.key": SECRET_MARKER }
            },
            "Status": { "State": "ready", "Addr": format!("10.0.0.{}", self.nodes.len() + 1) }
        })
    }

    /// Nœud worker
    pub fn node(mut self, id: &str, hostname: &str) -> Self {
        let node = self.node_json(id, hostname, "worker");
        self.nodes.push(node);
        self
    }

    /// Nœud manager leader
    pub fn leader(mut self, id: &str, hostname: &str) -> Self {
        let mut node = self.node_json(id, hostname, "manager");
        node["ManagerStatus"] = json!({
            "Leader": true,
            "Reachability": "reachable",
            "Addr": format!("10.0.0.{}:2377", self.nodes.len() + 1)
        });
        self.nodes.push(node);
        self
    }

    pub fn network(mut self, id: &str, name: &str, ingress: bool) -> Self {
        self.networks.push(json!({
            "Name": name,
            "Id": id,
            "Scope": "swarm",
            "Driver": "overlay",
            "Ingress": ingress,
            "Options": { "com.docker.network.driver.overlay.vxlanid_list": "4097" },
            "Labels": { "secret": SECRET_MARKER }
        }));
        self
    }

    /// Service attaché aux réseaux donnés (référencés par identité)
    pub fn service(mut self, id: &str, name: &str, image: &str, networks: &[&str]) -> Self {
        let vips: Vec<Value> = networks
            .iter()
            .enumerate()
            .map(|(i, net)| json!({ "NetworkID": net, "Addr": format!("10.0.{}.2/24", i + 1) }))
            .collect();
        let targets: Vec<Value> = networks.iter().map(|net| json!({ "Target": net })).collect();
        self.services.push(json!({
            "ID": id,
            "Version": { "Index": 7 },
            "Spec": {
                "Name": name,
                "Labels": { "com.example.api-key": SECRET_MARKER },
                "TaskTemplate": {
                    "ContainerSpec": {
                        "Image": image,
                        "Env": [format!("DB_PASSWORD={SECRET_MARKER}")],
                        "Secrets": [{ "SecretName": "db", "SecretID": SECRET_MARKER }]
                    },
                    "Placement": { "Constraints": [format!("node.labels.key=={SECRET_MARKER}")] },
                    "Networks": targets
                },
                "Mode": { "Replicated": { "Replicas": 1 } }
            },
            "Endpoint": { "Spec": { "Mode": "vip" }, "VirtualIPs": vips }
        }));
        self
    }

    pub fn task(mut self, task: TaskFixture) -> Self {
        self.tasks.push(task.to_json());
        self
    }

    /// Réponses par chemin d'API
    pub fn endpoints(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("/nodes", Value::Array(self.nodes.clone())),
            ("/networks", Value::Array(self.networks.clone())),
            ("/services", Value::Array(self.services.clone())),
            ("/tasks", Value::Array(self.tasks.clone())),
        ]
    }

    /// Même état, collections dans un autre ordre (l'API ne garantit aucun ordre)
    pub fn permuted(&self) -> Self {
        let mut permuted = self.clone();
        for list in [&mut permuted.nodes, &mut permuted.networks, &mut permuted.services, &mut permuted.tasks] {
            list.reverse();
            if list.len() > 2 {
                list.rotate_left(1);
            }
        }
        permuted
    }
}

/// Builder de tâche
#[derive(Debug, Clone)]
pub struct TaskFixture {
    id: String,
    service_id: String,
    node_id: Option<String>,
    image: String,
    slot: Option<u64>,
    state: String,
    desired_state: String,
    timestamp: String,
    attachments: Vec<(String, bool, String)>,
}

impl TaskFixture {
    fn base(id: &str, service_id: &str, node_id: Option<&str>, image: &str, state: &str) -> Self {
        Self {
            id: id.to_string(),
            service_id: service_id.to_string(),
            node_id: node_id.map(str::to_string),
            image: image.to_string(),
            slot: None,
            state: state.to_string(),
            desired_state: "running".to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            attachments: Vec::new(),
        }
    }

    /// Tâche assignée à un nœud, en cours d'exécution
    pub fn running(id: &str, service_id: &str, node_id: &str, image: &str) -> Self {
        Self::base(id, service_id, Some(node_id), image, "running")
    }

    /// Tâche sans nœud (en attente de planification)
    pub fn planned(id: &str, service_id: &str, image: &str) -> Self {
        Self::base(id, service_id, None, image, "pending")
    }

    pub fn slot(mut self, slot: u64) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn state(mut self, state: &str) -> Self {
        self.state = state.to_string();
        self
    }

    pub fn desired(mut self, desired_state: &str) -> Self {
        self.desired_state = desired_state.to_string();
        self
    }

    /// Horodatage RFC3339 du statut
    pub fn at(mut self, timestamp: &str) -> Self {
        self.timestamp = timestamp.to_string();
        self
    }

    /// Attachement réseau avec une adresse CIDR ("10.0.9.3/24")
    pub fn attachment(mut self, network_name: &str, ingress: bool, cidr: &str) -> Self {
        self.attachments.push((network_name.to_string(), ingress, cidr.to_string()));
        self
    }

    pub fn to_json(&self) -> Value {
        let attachments: Vec<Value> = self
            .attachments
            .iter()
            .map(|(name, ingress, cidr)| {
                json!({
                    "Network": {
                        "ID": format!("net-{name}"),
                        "Spec": { "Name": name, "Ingress": ingress, "Labels": { "k": SECRET_MARKER } }
                    },
                    "Addresses": [cidr]
                })
            })
            .collect();

        let mut task = json!({
            "ID": self.id,
            "ServiceID": self.service_id,
            "DesiredState": self.desired_state,
            "Status": {
                "Timestamp": self.timestamp,
                "State": self.state,
                "Message": "started",
                "ContainerStatus": { "ContainerID": format!("c-{}", self.id), "PID": 4242 }
            },
            "Spec": {
                "ContainerSpec": { "Image": self.image, "Env": [format!("TOKEN={SECRET_MARKER}")] },
                "Placement": { "Constraints": [format!("node.id!={SECRET_MARKER}")] }
            },
            "NetworksAttachments": attachments
        });
        if let Some(node_id) = &self.node_id {
            task["NodeID"] = json!(node_id);
        }
        if let Some(slot) = self.slot {
            task["Slot"] = json!(slot);
        }
        task
    }
}
