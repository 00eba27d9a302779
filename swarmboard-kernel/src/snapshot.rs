//! Change detection and the current-snapshot cache.
//!
//! The poll cycle is the only writer. A snapshot is published only when its
//! fingerprint differs from the cached one; otherwise the cycle is discarded.
//! The cache itself is swapped by `Hub::publish`, under the subscriber registry lock.

use crate::models::{Network, Node, Service, Snapshot, Task};
use crate::state::{new_cell, SharedCell};
use crate::topology::ServiceConnections;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::sync::Arc;

/// Snapshot publié, avec sa forme sérialisée prête à être poussée
#[derive(Debug)]
pub struct Published {
    pub snapshot: Snapshot,
    pub payload: Arc<str>,
}

impl Published {
    pub fn fingerprint(&self) -> &str {
        &self.snapshot.fingerprint
    }
}

/// Vue empruntée du snapshot couverte par l'empreinte (sans refreshTime ni fingerprint)
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintView<'a> {
    nodes: &'a [Node],
    networks: &'a [Network],
    services: &'a [Service],
    assigned_tasks: &'a [Task],
    planned_tasks: &'a [Task],
    connections: &'a [ServiceConnections],
}

pub fn fingerprint(snapshot: &Snapshot) -> Result<String, serde_json::Error> {
    let view = FingerprintView {
        nodes: &snapshot.nodes,
        networks: &snapshot.networks,
        services: &snapshot.services,
        assigned_tasks: &snapshot.assigned_tasks,
        planned_tasks: &snapshot.planned_tasks,
        connections: &snapshot.connections,
    };
    let canonical = serde_json::to_vec(&view)?;
    Ok(hex::encode(Sha1::digest(&canonical)))
}

/// Dernier snapshot publié, lu par chaque nouvel abonné
#[derive(Clone, Default)]
pub struct SnapshotCache {
    current: SharedCell<Option<Arc<Published>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self { current: new_cell(None) }
    }

    pub fn current(&self) -> Option<Arc<Published>> {
        self.current.read().clone()
    }

    pub fn replace(&self, published: Arc<Published>) {
        *self.current.write() = Some(published);
    }
}

pub struct ChangeDetector {
    cache: SnapshotCache,
}

impl ChangeDetector {
    pub fn new(cache: SnapshotCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// `Some` si le contenu diffère du cache (à publier via le hub), `None` si le cycle est à jeter
    pub fn offer(&self, mut snapshot: Snapshot) -> Result<Option<Arc<Published>>, serde_json::Error> {
        let fingerprint = fingerprint(&snapshot)?;
        if let Some(current) = self.cache.current() {
            if current.fingerprint() == fingerprint {
                return Ok(None);
            }
        }

        snapshot.fingerprint = fingerprint;
        let payload: Arc<str> = serde_json::to_string_pretty(&snapshot)?.into();
        Ok(Some(Arc::new(Published { snapshot, payload })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(refresh: &str, node_name: &str) -> Snapshot {
        Snapshot {
            nodes: vec![Node {
                id: "n1".into(),
                name: node_name.into(),
                role: crate::models::NodeRole::Manager,
                status: crate::models::NodeStatus { state: "ready".into(), address: "10.0.0.1".into() },
                manager_status: None,
                info: None,
            }],
            networks: vec![],
            services: vec![],
            assigned_tasks: vec![],
            planned_tasks: vec![],
            connections: vec![],
            refresh_time: refresh.into(),
            fingerprint: String::new(),
        }
    }

    fn offer_and_store(detector: &ChangeDetector, snapshot: Snapshot) -> Option<Arc<Published>> {
        let published = detector.offer(snapshot).unwrap()?;
        detector.cache().replace(published.clone());
        Some(published)
    }

    #[test]
    fn test_first_offer_is_a_change() {
        let detector = ChangeDetector::new(SnapshotCache::new());
        let published = detector.offer(snapshot("t0", "alpha")).unwrap().unwrap();
        assert_eq!(published.fingerprint().len(), 40);
        assert!(published.payload.contains(published.fingerprint()));
        assert!(published.payload.contains("\"refreshTime\": \"t0\""));
        // la détection seule ne touche pas au cache
        assert!(detector.cache().current().is_none());
    }

    #[test]
    fn test_identical_content_is_discarded() {
        let detector = ChangeDetector::new(SnapshotCache::new());
        offer_and_store(&detector, snapshot("t0", "alpha")).unwrap();

        // seule l'heure de rafraîchissement change : rien à publier, cache intact
        assert!(offer_and_store(&detector, snapshot("t1", "alpha")).is_none());
        assert_eq!(detector.cache().current().unwrap().snapshot.refresh_time, "t0");
    }

    #[test]
    fn test_changed_content_replaces_cache() {
        let detector = ChangeDetector::new(SnapshotCache::new());
        let first = offer_and_store(&detector, snapshot("t0", "alpha")).unwrap();
        let second = offer_and_store(&detector, snapshot("t1", "beta")).unwrap();
        assert_ne!(first.fingerprint(), second.fingerprint());
        assert_eq!(detector.cache().current().unwrap().snapshot.nodes[0].name, "beta");
    }

    #[test]
    fn test_fingerprint_ignores_previous_fingerprint_field() {
        let mut a = snapshot("t0", "alpha");
        let b = a.clone();
        a.fingerprint = "deadbeef".into();
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }
}
