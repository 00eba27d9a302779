/**
 * HUB - Registre des abonnés WebSocket et jetons d'accès à usage unique
 *
 * RÔLE :
 * Distribue chaque snapshot publié à tous les abonnés authentifiés.
 *
 * FONCTIONNEMENT :
 * - `issue_token` : jeton opaque (uuid v4), valable `token_ttl`, consommé à la 1ère connexion
 * - `admit` : auth désactivée → accepté ; sinon jeton présent et non expiré → accepté
 * - `subscribe` : pousse immédiatement le snapshot en cache, sous le verrou du registre
 * - `publish` : remplace le cache et diffuse sous ce même verrou ; un abonné reçoit donc
 *   un snapshot donné soit par le cache, soit par la diffusion, jamais les deux
 * - diffusion : purge des abonnés fermés, puis envoi non bloquant à chacun ;
 *   un abonné dont le canal est plein est retiré (il se reconnectera)
 */

use crate::config::AuthConf;
use crate::snapshot::{Published, SnapshotCache};
use crate::state::{new_state, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Message unique envoyé à une connexion refusée avant sa fermeture
pub const WRONG_AUTH_TOKEN: &str = "WrongAuthToken";

/// Snapshots en attente par abonné avant d'être considéré à la traîne
const SUBSCRIBER_BUFFER: usize = 8;

type Registry = Shared<HashMap<u64, mpsc::Sender<Arc<str>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected,
}

pub struct Hub {
    auth_enabled: bool,
    token_ttl: Duration,
    reject_grace: Duration,
    cache: SnapshotCache,
    tokens: Shared<HashMap<String, Instant>>,
    subscribers: Registry,
    next_id: AtomicU64,
}

/// Abonnement actif ; le drop le retire du registre
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Arc<str>>,
    registry: Registry,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

impl Hub {
    pub fn new(auth: &AuthConf, cache: SnapshotCache) -> Self {
        Self {
            auth_enabled: auth.enabled,
            token_ttl: Duration::from_secs(auth.token_ttl_secs),
            reject_grace: Duration::from_millis(auth.reject_grace_ms),
            cache,
            tokens: new_state(HashMap::new()),
            subscribers: new_state(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn reject_grace(&self) -> Duration {
        self.reject_grace
    }

    pub fn issue_token(&self) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let ttl = self.token_ttl;
        let mut tokens = self.tokens.lock();
        tokens.retain(|_, issued| issued.elapsed() < ttl);
        tokens.insert(token.clone(), Instant::now());
        token
    }

    pub fn pending_tokens(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Consomme le jeton s'il est valide
    pub fn admit(&self, token: Option<&str>) -> Admission {
        if !self.auth_enabled {
            return Admission::Accepted;
        }
        let issued = token.and_then(|t| self.tokens.lock().remove(t));
        match issued {
            Some(at) if at.elapsed() < self.token_ttl => Admission::Accepted,
            _ => Admission::Rejected,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);

        let mut subscribers = self.subscribers.lock();
        if let Some(current) = self.cache.current() {
            // canal neuf : ne peut pas être plein
            let _ = tx.try_send(current.payload.clone());
        }
        subscribers.insert(id, tx);
        debug!("[hub] subscriber {id} joined ({} total)", subscribers.len());

        Subscription { id, receiver, registry: self.subscribers.clone() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Remplace le snapshot courant et le diffuse ; renvoie le nombre d'abonnés servis
    pub fn publish(&self, published: Arc<Published>) -> usize {
        let mut subscribers = self.subscribers.lock();
        let payload = published.payload.clone();
        self.cache.replace(published);
        broadcast(&mut subscribers, payload)
    }
}

fn broadcast(subscribers: &mut HashMap<u64, mpsc::Sender<Arc<str>>>, payload: Arc<str>) -> usize {
    let before = subscribers.len();
    subscribers.retain(|_, tx| !tx.is_closed());
    if subscribers.len() < before {
        debug!("[hub] dropped {} closed subscribers", before - subscribers.len());
    }

    let mut delivered = 0;
    subscribers.retain(|id, tx| match tx.try_send(payload.clone()) {
        Ok(()) => {
            delivered += 1;
            true
        }
        Err(TrySendError::Full(_)) => {
            warn!("[hub] subscriber {id} is lagging, disconnecting");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    });
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ChangeDetector;
    use crate::models::Snapshot;

    fn auth(enabled: bool, ttl: u64) -> AuthConf {
        AuthConf {
            enabled,
            username: Some("admin".into()),
            password: Some("secret".into()),
            token_ttl_secs: ttl,
            ..AuthConf::default()
        }
    }

    fn empty_snapshot(node_count: usize) -> Snapshot {
        Snapshot {
            nodes: (0..node_count)
                .map(|i| crate::models::Node {
                    id: format!("n{i}"),
                    name: format!("node-{i}"),
                    role: crate::models::NodeRole::Worker,
                    status: crate::models::NodeStatus { state: "ready".into(), address: String::new() },
                    manager_status: None,
                    info: None,
                })
                .collect(),
            networks: vec![],
            services: vec![],
            assigned_tasks: vec![],
            planned_tasks: vec![],
            connections: vec![],
            refresh_time: String::new(),
            fingerprint: String::new(),
        }
    }

    #[test]
    fn test_token_is_single_use() {
        let hub = Hub::new(&auth(true, 60), SnapshotCache::new());
        let token = hub.issue_token();
        assert_eq!(hub.admit(Some(&token)), Admission::Accepted);
        assert_eq!(hub.admit(Some(&token)), Admission::Rejected);
        assert_eq!(hub.admit(None), Admission::Rejected);
        assert_eq!(hub.admit(Some("made-up")), Admission::Rejected);
    }

    #[test]
    fn test_expired_token_is_rejected_and_pruned() {
        let hub = Hub::new(&auth(true, 0), SnapshotCache::new());
        let token = hub.issue_token();
        assert_eq!(hub.admit(Some(&token)), Admission::Rejected);

        hub.issue_token();
        hub.issue_token();
        // chaque émission purge les jetons expirés
        assert_eq!(hub.pending_tokens(), 1);
    }

    #[test]
    fn test_auth_disabled_accepts_everything() {
        let hub = Hub::new(&auth(false, 60), SnapshotCache::new());
        assert_eq!(hub.admit(None), Admission::Accepted);
        assert_eq!(hub.admit(Some("whatever")), Admission::Accepted);
    }

    fn published(node_count: usize) -> Arc<Published> {
        ChangeDetector::new(SnapshotCache::new()).offer(empty_snapshot(node_count)).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_new_subscriber_gets_cached_snapshot_immediately() {
        let hub = Hub::new(&auth(false, 60), SnapshotCache::new());
        let published = published(1);
        assert_eq!(hub.publish(published.clone()), 0);

        let mut sub = hub.subscribe();
        assert_eq!(sub.recv().await.as_deref(), Some(&*published.payload));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_subscriber_joining_mid_cycle_gets_snapshot_once() {
        let cache = SnapshotCache::new();
        let detector = ChangeDetector::new(cache.clone());
        let hub = Hub::new(&auth(false, 60), cache.clone());
        hub.publish(detector.offer(empty_snapshot(1)).unwrap().unwrap());

        // nouveau contenu détecté, l'abonné arrive avant la publication
        let next = detector.offer(empty_snapshot(2)).unwrap().unwrap();
        let mut sub = hub.subscribe();
        assert_eq!(hub.publish(next.clone()), 1);

        let first = sub.try_recv().unwrap();
        let second = sub.try_recv().unwrap();
        assert_ne!(first, second);
        assert_eq!(second, next.payload);
        assert!(sub.try_recv().is_none());
        assert!(Arc::ptr_eq(&cache.current().unwrap(), &next));
    }

    #[test]
    fn test_no_cache_means_no_initial_push() {
        let hub = Hub::new(&auth(false, 60), SnapshotCache::new());
        let mut sub = hub.subscribe();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_publish_reaches_all_and_drop_unsubscribes() {
        let hub = Hub::new(&auth(false, 60), SnapshotCache::new());
        let mut a = hub.subscribe();
        let b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(b);
        assert_eq!(hub.subscriber_count(), 1);

        let published = published(1);
        assert_eq!(hub.publish(published.clone()), 1);
        assert_eq!(a.recv().await.as_deref(), Some(&*published.payload));
    }

    #[test]
    fn test_closed_receiver_is_swept_before_publish() {
        let hub = Hub::new(&auth(false, 60), SnapshotCache::new());
        let mut sub = hub.subscribe();
        sub.receiver.close();
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.publish(published(1)), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_lagging_subscriber_is_removed() {
        let hub = Hub::new(&auth(false, 60), SnapshotCache::new());
        let _slow = hub.subscribe();
        let published = published(1);
        for _ in 0..SUBSCRIBER_BUFFER {
            assert_eq!(hub.publish(published.clone()), 1);
        }
        assert_eq!(hub.publish(published), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
