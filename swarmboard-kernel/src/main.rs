/**
 * SWARMBOARD KERNEL - Point d'entrée principal du serveur Swarmboard
 *
 * RÔLE : Orchestration de tous les modules : config, poller Docker, métriques, hub, HTTP.
 * Bootstrap du système complet avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : deux boucles indépendantes (orchestrateur, métriques) alimentent un cache
 * à écrivain unique ; le hub pousse chaque snapshot modifié aux abonnés WebSocket.
 */

mod config;
mod docker;
mod health;
mod http;
mod hub;
mod metrics;
mod models;
mod normalize;
mod poller;
mod snapshot;
mod state;
mod tls;
mod topology;

use crate::config::load_config;
use crate::docker::socket::DockerSocket;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::hub::Hub;
use crate::metrics::MetricsCollector;
use crate::poller::Poller;
use crate::snapshot::{ChangeDetector, SnapshotCache};

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swarmboard_kernel=info")))
        .init();

    let cfg = load_config().await.context("loading configuration")?;

    // cache partagé : écrit par le poller, lu par le hub et /data
    let cache = SnapshotCache::new();
    let hub = Arc::new(Hub::new(&cfg.auth, cache.clone()));

    let metrics = Arc::new(MetricsCollector::new(&cfg.metrics).context("building metrics collector")?);
    if metrics.enabled() {
        metrics.clone().spawn(cfg.metrics_interval());
    } else {
        info!("[kernel] no exporter pattern configured, metrics disabled");
    }

    let poller = Arc::new(Poller::new(
        DockerSocket::new(&cfg.docker.socket),
        metrics,
        cfg.normalize_options(),
        ChangeDetector::new(cache.clone()),
        hub.clone(),
    ));
    poller.spawn(cfg.docker_interval());

    let app_state = AppState::new(&cfg, hub, cache, HealthTracker::new());
    let app = http::build_router(app_state, &cfg.path_prefix);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    if cfg.https.enabled {
        let tls = tls::rustls_config(&cfg.https).await.context("loading TLS material")?;
        info!("[kernel] listening on https://{addr}{}", cfg.path_prefix);
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await
            .context("https server")?;
    } else {
        let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
        info!("[kernel] listening on http://{addr}{}", cfg.path_prefix);
        axum::serve(listener, app).await.context("http server")?;
    }
    Ok(())
}
