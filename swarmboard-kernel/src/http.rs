/**
 * API HTTP SWARMBOARD - Serveur HTTP + WebSocket du kernel
 *
 * RÔLE :
 * Expose les snapshots aux clients web : flux poussé en WebSocket et, en option,
 * lecture ponctuelle du dernier snapshot.
 *
 * FONCTIONNEMENT :
 * - Routes : /_health, /auth_token, /data, /stream?authToken=...
 * - Toutes montées sous le préfixe configuré (déploiement derrière reverse proxy)
 * - Basic auth (si activée) sur toutes les routes sauf /_health et /stream ;
 *   /stream est protégé par le jeton à usage unique obtenu via /auth_token
 * - Jeton refusé : message "WrongAuthToken" puis fermeture après un délai de grâce
 */

use crate::config::KernelConfig;
use crate::health::{HealthTracker, KernelHealth};
use crate::hub::{Admission, Hub, WRONG_AUTH_TOKEN};
use crate::snapshot::SnapshotCache;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub realm: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub cache: SnapshotCache,
    pub health_tracker: HealthTracker,
    pub basic_auth: Option<Arc<BasicAuth>>,
    pub data_api: bool,
}

impl AppState {
    pub fn new(cfg: &KernelConfig, hub: Arc<Hub>, cache: SnapshotCache, health_tracker: HealthTracker) -> Self {
        let basic_auth = cfg.credentials().map(|(username, password)| {
            Arc::new(BasicAuth {
                realm: cfg.auth.realm.clone(),
                username: username.to_string(),
                password: password.to_string(),
            })
        });
        Self { hub, cache, health_tracker, basic_auth, data_api: cfg.features.data_api }
    }
}

fn credentials_match(headers: &HeaderMap, auth: &BasicAuth) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|encoded| base64::engine::general_purpose::STANDARD.decode(encoded.trim()).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .is_some_and(|pair| match pair.split_once(':') {
            Some((user, pass)) => {
                let user_ok = user.as_bytes().ct_eq(auth.username.as_bytes());
                let pass_ok = pass.as_bytes().ct_eq(auth.password.as_bytes());
                bool::from(user_ok & pass_ok)
            }
            None => false,
        })
}

async fn require_basic_auth(State(app): State<AppState>, req: Request, next: Next) -> Response {
    let Some(auth) = app.basic_auth.as_deref() else {
        return next.run(req).await;
    };

    // Health check toujours accessible, le flux a son propre jeton
    let path = req.uri().path().to_owned();
    if path == "/_health" || path == "/stream" {
        return next.run(req).await;
    }

    if credentials_match(req.headers(), auth) {
        return next.run(req).await;
    }
    debug!("[http] basic auth refused for {path}");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, format!("Basic realm=\"{}\"", auth.realm))],
    )
        .into_response()
}

pub fn build_router(app_state: AppState, path_prefix: &str) -> Router {
    let routes = Router::new()
        .route("/_health", get(get_health))
        .route("/auth_token", get(get_auth_token))
        .route("/data", get(get_data))
        .route("/stream", get(stream))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_basic_auth))
        .with_state(app_state);

    if path_prefix == "/" {
        routes
    } else {
        Router::new().nest(path_prefix, routes)
    }
}

// GET /_health
async fn get_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.hub, &app.cache))
}

// GET /auth_token
async fn get_auth_token(State(app): State<AppState>) -> String {
    app.hub.issue_token()
}

// GET /data
async fn get_data(State(app): State<AppState>) -> Response {
    if !app.data_api {
        return StatusCode::NOT_FOUND.into_response();
    }
    match app.cache.current() {
        Some(published) => (
            [(header::CONTENT_TYPE, "application/json")],
            published.payload.to_string(),
        )
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    #[serde(rename = "authToken")]
    auth_token: Option<String>,
}

// GET /stream?authToken=...
async fn stream(
    State(app): State<AppState>,
    Query(params): Query<StreamParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        match app.hub.admit(params.auth_token.as_deref()) {
            Admission::Accepted => serve_subscriber(socket, app.hub).await,
            Admission::Rejected => reject(socket, &app.hub).await,
        }
    })
}

async fn reject(mut socket: WebSocket, hub: &Hub) {
    debug!("[http] stream rejected: wrong auth token");
    if socket.send(Message::Text(WRONG_AUTH_TOKEN.into())).await.is_ok() {
        tokio::time::sleep(hub.reject_grace()).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn serve_subscriber(socket: WebSocket, hub: Arc<Hub>) {
    let mut subscription = hub.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            payload = subscription.recv() => {
                // None : retiré du registre (abonné à la traîne)
                let Some(payload) = payload else { break };
                if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    drop(subscription);
    debug!("[hub] subscriber left ({} remaining)", hub.subscriber_count());
}
