use crate::hub::Hub;
use crate::snapshot::SnapshotCache;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub status: String,
    pub uptime_seconds: u64,
    pub subscribers: usize,
    pub pending_tokens: usize,
    /// Empreinte du snapshot en cache, absente avant le premier cycle réussi
    pub fingerprint: Option<String>,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { start_time: Instant::now() }
    }

    pub fn get_health(&self, hub: &Hub, cache: &SnapshotCache) -> KernelHealth {
        KernelHealth {
            status: "ok".into(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            subscribers: hub.subscriber_count(),
            pending_tokens: hub.pending_tokens(),
            fingerprint: cache.current().map(|p| p.fingerprint().to_string()),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}
