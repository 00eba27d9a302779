/**
 * CONFIGURATION - Fichier YAML + surcharges par variables d'environnement
 *
 * RÔLE :
 * Produit la `KernelConfig` validée utilisée par tous les composants.
 *
 * FONCTIONNEMENT :
 * - Chemin du fichier : SWARMBOARD_CONFIG (défaut swarmboard.yaml), absent → défauts
 * - Variables d'environnement (PORT, DOCKER_UPDATE_INTERVAL...) appliquées ensuite
 * - Validation finale : une config invalide est fatale au démarrage
 */

use crate::normalize::{NormalizeOptions, TaskHistory};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid config file {path}: {source}")]
    Yaml { path: String, source: serde_yaml::Error },
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidValue { var: String, value: String, reason: String },
    #[error("invalid exporter pattern for {var}: {source}")]
    Pattern { var: &'static str, source: regex::Error },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DockerConf {
    pub socket: String,
    pub update_interval_ms: u64,
}

impl Default for DockerConf {
    fn default() -> Self {
        Self { socket: "/var/run/docker.sock".into(), update_interval_ms: 5000 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConf {
    pub update_interval_ms: u64,
    /// Motif du nom de service node-exporter ; absent = pas de métriques hôte
    pub node_exporter_pattern: Option<String>,
    pub node_exporter_port: u16,
    /// Motif du nom de service cAdvisor ; absent = pas de métriques conteneur
    pub cadvisor_pattern: Option<String>,
    pub cadvisor_port: u16,
    /// Point de montage dont on rapporte l'occupation disque
    pub mount_point: String,
    pub fetch_timeout_ms: u64,
}

impl Default for MetricsConf {
    fn default() -> Self {
        Self {
            update_interval_ms: 30_000,
            node_exporter_pattern: None,
            node_exporter_port: 9100,
            cadvisor_pattern: None,
            cadvisor_port: 8080,
            mount_point: "/".into(),
            fetch_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AuthConf {
    pub enabled: bool,
    pub realm: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token_ttl_secs: u64,
    /// Délai entre le message de rejet et la fermeture du socket
    pub reject_grace_ms: u64,
}

impl Default for AuthConf {
    fn default() -> Self {
        Self {
            enabled: false,
            realm: "swarmboard".into(),
            username: None,
            password: None,
            token_ttl_secs: 60,
            reject_grace_ms: 10_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HttpsConf {
    pub enabled: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FeaturesConf {
    pub networks: bool,
    pub task_age: bool,
    pub data_api: bool,
    pub task_history: TaskHistory,
}

impl Default for FeaturesConf {
    fn default() -> Self {
        Self { networks: true, task_age: true, data_api: false, task_history: TaskHistory::All }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub port: u16,
    /// Préfixe de montage derrière un reverse proxy ("/" ou "/swarm")
    pub path_prefix: String,
    pub docker: DockerConf,
    pub metrics: MetricsConf,
    pub auth: AuthConf,
    pub https: HttpsConf,
    pub features: FeaturesConf,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            path_prefix: "/".into(),
            docker: DockerConf::default(),
            metrics: MetricsConf::default(),
            auth: AuthConf::default(),
            https: HttpsConf::default(),
            features: FeaturesConf::default(),
        }
    }
}

impl KernelConfig {
    pub fn docker_interval(&self) -> Duration {
        Duration::from_millis(self.docker.update_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics.update_interval_ms)
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            show_networks: self.features.networks,
            show_task_age: self.features.task_age,
            task_history: self.features.task_history,
        }
    }

    /// Identifiants basic auth quand l'authentification est active
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if !self.auth.enabled {
            return None;
        }
        Some((self.auth.username.as_deref()?, self.auth.password.as_deref()?))
    }

    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.path_prefix = normalize_prefix(&self.path_prefix);

        if self.docker.update_interval_ms == 0 || self.metrics.update_interval_ms == 0 {
            return Err(ConfigError::Invalid("update intervals must be greater than zero".into()));
        }
        if self.auth.enabled && (self.auth.username.is_none() || self.auth.password.is_none()) {
            return Err(ConfigError::Invalid("authentication enabled without USERNAME and PASSWORD".into()));
        }
        if self.https.enabled && (self.https.cert_path.is_none() || self.https.key_path.is_none()) {
            return Err(ConfigError::Invalid("https enabled without HTTPS_CERT_PATH and HTTPS_KEY_PATH".into()));
        }
        for (var, pattern) in [
            ("NODE_EXPORTER_SERVICE_NAME_REGEX", &self.metrics.node_exporter_pattern),
            ("CADVISOR_SERVICE_NAME_REGEX", &self.metrics.cadvisor_pattern),
        ] {
            if let Some(p) = pattern {
                regex::Regex::new(p).map_err(|source| ConfigError::Pattern { var, source })?;
            }
        }
        Ok(())
    }
}

/// "/" reste "/", sinon un seul slash en tête et aucun en fin
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".into()
    } else {
        format!("/{trimmed}")
    }
}

fn parse_var<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_flag(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}

/// Applique les variables d'environnement présentes (`lookup` = std::env::var en prod)
pub fn apply_env_overrides<F>(cfg: &mut KernelConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let text = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

    if let Some(v) = text("PORT") {
        cfg.port = parse_var("PORT", &v)?;
    }
    if let Some(v) = text("PATH_PREFIX") {
        cfg.path_prefix = v;
    }
    if let Some(v) = text("DOCKER_SOCKET") {
        cfg.docker.socket = v;
    }
    if let Some(v) = text("DOCKER_UPDATE_INTERVAL") {
        cfg.docker.update_interval_ms = parse_var("DOCKER_UPDATE_INTERVAL", &v)?;
    }
    if let Some(v) = text("METRICS_UPDATE_INTERVAL") {
        cfg.metrics.update_interval_ms = parse_var("METRICS_UPDATE_INTERVAL", &v)?;
    }
    if let Some(v) = text("NODE_EXPORTER_SERVICE_NAME_REGEX") {
        cfg.metrics.node_exporter_pattern = Some(v);
    }
    if let Some(v) = text("NODE_EXPORTER_PORT") {
        cfg.metrics.node_exporter_port = parse_var("NODE_EXPORTER_PORT", &v)?;
    }
    if let Some(v) = text("NODE_EXPORTER_INTERESTING_MOUNT_POINT") {
        cfg.metrics.mount_point = v;
    }
    if let Some(v) = text("CADVISOR_SERVICE_NAME_REGEX") {
        cfg.metrics.cadvisor_pattern = Some(v);
    }
    if let Some(v) = text("CADVISOR_PORT") {
        cfg.metrics.cadvisor_port = parse_var("CADVISOR_PORT", &v)?;
    }
    if let Some(v) = lookup("ENABLE_AUTHENTICATION") {
        cfg.auth.enabled = parse_flag("ENABLE_AUTHENTICATION", &v)?;
    }
    if let Some(v) = text("AUTHENTICATION_REALM") {
        cfg.auth.realm = v;
    }
    if let Some(v) = text("USERNAME") {
        cfg.auth.username = Some(v);
    }
    if let Some(v) = text("PASSWORD") {
        cfg.auth.password = Some(v);
    }
    if let Some(v) = lookup("ENABLE_HTTPS") {
        cfg.https.enabled = parse_flag("ENABLE_HTTPS", &v)?;
    }
    if let Some(v) = text("HTTPS_CERT_PATH") {
        cfg.https.cert_path = Some(PathBuf::from(v));
    }
    if let Some(v) = text("HTTPS_KEY_PATH") {
        cfg.https.key_path = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("ENABLE_DATA_API") {
        cfg.features.data_api = parse_flag("ENABLE_DATA_API", &v)?;
    }
    if let Some(v) = lookup("ENABLE_NETWORKS") {
        cfg.features.networks = parse_flag("ENABLE_NETWORKS", &v)?;
    }
    if let Some(v) = lookup("SHOW_TASK_TIMESTATE") {
        cfg.features.task_age = parse_flag("SHOW_TASK_TIMESTATE", &v)?;
    }
    if let Some(v) = text("TASK_HISTORY") {
        cfg.features.task_history = parse_var("TASK_HISTORY", &v)?;
    }
    Ok(())
}

/// Fichier YAML puis surcharges, puis validation
pub async fn load_config_from<F>(path: &Path, lookup: F) -> Result<KernelConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let path_str = path.display().to_string();
    let mut cfg = if path.exists() {
        let txt = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io { path: path_str.clone(), source })?;
        if txt.trim().is_empty() {
            KernelConfig::default()
        } else {
            serde_yaml::from_str(&txt).map_err(|source| ConfigError::Yaml { path: path_str.clone(), source })?
        }
    } else {
        info!("[kernel] pas de {}, usage config par défaut", path_str);
        KernelConfig::default()
    };

    apply_env_overrides(&mut cfg, lookup)?;
    cfg.validate()?;
    Ok(cfg)
}

pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = std::env::var("SWARMBOARD_CONFIG").unwrap_or_else(|_| "swarmboard.yaml".into());
    load_config_from(Path::new(&path), |var| std::env::var(var).ok()).await
}
