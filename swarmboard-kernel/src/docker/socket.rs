//! Client HTTP/1 minimal vers le socket Unix du démon Docker.

use super::{FetchError, OrchestratorApi};
use axum::http::{header, Method, Request};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use tokio::net::UnixStream;
use tracing::debug;

/// Une connexion par requête : le démon ferme les connexions inactives de toute façon
#[derive(Debug, Clone)]
pub struct DockerSocket {
    path: PathBuf,
}

impl DockerSocket {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OrchestratorApi for DockerSocket {
    async fn get(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let http_err = |source| FetchError::Http { path: path.to_string(), source };

        let stream = UnixStream::connect(&self.path).await.map_err(|source| FetchError::Connect {
            socket: self.path.display().to_string(),
            source,
        })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(http_err)?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("[poller] docker connection closed with error: {e}");
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(|source| FetchError::Request { path: path.to_string(), source })?;

        let response = sender.send_request(request).await.map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { path: path.to_string(), status: status.as_u16() });
        }

        let body = response.into_body().collect().await.map_err(http_err)?.to_bytes();
        Ok(body.to_vec())
    }
}
