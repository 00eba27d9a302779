/*!
Documents d'exposition texte (format Prometheus) pour les exporters
*/

use std::fmt::Write;

/// Label cAdvisor portant l'identité de tâche swarm
pub const TASK_ID_LABEL: &str = "container_label_com_docker_swarm_task_id";

/// Sortie d'un node-exporter à un instant donné
#[derive(Debug, Clone)]
pub struct NodeExporterFixture {
    /// Secondes CPU cumulées hors idle (réparties user/system)
    pub cpu_busy_seconds: f64,
    pub mount_point: String,
    pub fs_size_bytes: f64,
    pub fs_avail_bytes: f64,
    pub mem_total_bytes: f64,
    pub mem_free_bytes: f64,
    pub mem_cached_bytes: f64,
    pub mem_buffers_bytes: f64,
}

impl Default for NodeExporterFixture {
    fn default() -> Self {
        Self {
            cpu_busy_seconds: 0.0,
            mount_point: "/".to_string(),
            fs_size_bytes: 100.0 * 1024.0 * 1024.0 * 1024.0,
            fs_avail_bytes: 50.0 * 1024.0 * 1024.0 * 1024.0,
            mem_total_bytes: 8.0 * 1024.0 * 1024.0 * 1024.0,
            mem_free_bytes: 2.0 * 1024.0 * 1024.0 * 1024.0,
            mem_cached_bytes: 1024.0 * 1024.0 * 1024.0,
            mem_buffers_bytes: 256.0 * 1024.0 * 1024.0,
        }
    }
}

impl NodeExporterFixture {
    pub fn render(&self) -> String {
        let mut doc = String::new();
        let busy = self.cpu_busy_seconds;
        let _ = writeln!(doc, "# HELP node_cpu_seconds_total Seconds the CPUs spent in each mode.");
        let _ = writeln!(doc, "# TYPE node_cpu_seconds_total counter");
        let _ = writeln!(doc, "node_cpu_seconds_total{{cpu=\"0\",mode=\"idle\"}} 98765.25");
        let _ = writeln!(doc, "node_cpu_seconds_total{{cpu=\"0\",mode=\"user\"}} {}", busy * 0.75);
        let _ = writeln!(doc, "node_cpu_seconds_total{{cpu=\"0\",mode=\"system\"}} {}", busy * 0.25);
        let _ = writeln!(doc, "# TYPE node_filesystem_avail_bytes gauge");
        let _ = writeln!(doc, "node_filesystem_avail_bytes{{device=\"tmpfs\",fstype=\"tmpfs\",mountpoint=\"/run\"}} 1000");
        let _ = writeln!(
            doc,
            "node_filesystem_avail_bytes{{device=\"/dev/sda1\",fstype=\"ext4\",mountpoint=\"{}\"}} {}",
            self.mount_point, self.fs_avail_bytes
        );
        let _ = writeln!(doc, "# TYPE node_filesystem_size_bytes gauge");
        let _ = writeln!(doc, "node_filesystem_size_bytes{{device=\"tmpfs\",fstype=\"tmpfs\",mountpoint=\"/run\"}} 4000");
        let _ = writeln!(
            doc,
            "node_filesystem_size_bytes{{device=\"/dev/sda1\",fstype=\"ext4\",mountpoint=\"{}\"}} {}",
            self.mount_point, self.fs_size_bytes
        );
        let _ = writeln!(doc, "# TYPE node_memory_MemTotal_bytes gauge");
        let _ = writeln!(doc, "node_memory_MemTotal_bytes {}", self.mem_total_bytes);
        let _ = writeln!(doc, "node_memory_MemFree_bytes {}", self.mem_free_bytes);
        let _ = writeln!(doc, "node_memory_Cached_bytes {}", self.mem_cached_bytes);
        let _ = writeln!(doc, "node_memory_Buffers_bytes {}", self.mem_buffers_bytes);
        doc
    }
}

/// Sortie d'un cAdvisor : une entrée par conteneur de tâche
#[derive(Debug, Clone, Default)]
pub struct CadvisorFixture {
    containers: Vec<(String, f64, f64)>,
}

impl CadvisorFixture {
    /// `cpu_seconds` cumulées (réparties sur deux cœurs), `rss_bytes` résident
    pub fn container(mut self, task_id: &str, cpu_seconds: f64, rss_bytes: f64) -> Self {
        self.containers.push((task_id.to_string(), cpu_seconds, rss_bytes));
        self
    }

    pub fn render(&self) -> String {
        let mut doc = String::new();
        let _ = writeln!(doc, "# TYPE container_cpu_usage_seconds_total counter");
        let _ = writeln!(doc, "container_cpu_usage_seconds_total{{cpu=\"total\",id=\"/system.slice/docker.service\"}} 5000");
        for (task_id, cpu, _) in &self.containers {
            for (core, share) in [("cpu00", 0.5), ("cpu01", 0.5)] {
                let _ = writeln!(
                    doc,
                    "container_cpu_usage_seconds_total{{cpu=\"{core}\",id=\"/docker/{task_id}\",{TASK_ID_LABEL}=\"{task_id}\"}} {}",
                    cpu * share
                );
            }
        }
        let _ = writeln!(doc, "# TYPE container_memory_rss gauge");
        for (task_id, _, rss) in &self.containers {
            let _ = writeln!(doc, "container_memory_rss{{id=\"/docker/{task_id}\",{TASK_ID_LABEL}=\"{task_id}\"}} {rss}");
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_exporter_uses_mount_point() {
        let doc = NodeExporterFixture { mount_point: "/data".into(), ..Default::default() }.render();
        assert!(doc.contains("mountpoint=\"/data\""));
        assert!(doc.contains("node_memory_MemTotal_bytes"));
    }

    #[test]
    fn test_cadvisor_labels_tasks() {
        let doc = CadvisorFixture::default().container("t1", 2.0, 1024.0).render();
        assert_eq!(doc.matches(&format!("{TASK_ID_LABEL}=\"t1\"")).count(), 3);
    }
}
