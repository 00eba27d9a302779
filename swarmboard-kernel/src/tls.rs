//! TLS termination material (PEM certificate + key) for the rustls listener.

use crate::config::HttpsConf;
use axum_server::tls_rustls::RustlsConfig;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("https enabled but {0} is not configured")]
    NotConfigured(&'static str),
    #[error("TLS certificate not found: {0}")]
    MissingCert(PathBuf),
    #[error("TLS key not found: {0}")]
    MissingKey(PathBuf),
    #[error("invalid TLS material: {0}")]
    Invalid(#[from] std::io::Error),
}

fn existing<'a>(path: Option<&'a PathBuf>, what: &'static str) -> Result<&'a Path, TlsError> {
    path.map(PathBuf::as_path).ok_or(TlsError::NotConfigured(what))
}

pub async fn rustls_config(https: &HttpsConf) -> Result<RustlsConfig, TlsError> {
    let cert = existing(https.cert_path.as_ref(), "HTTPS_CERT_PATH")?;
    let key = existing(https.key_path.as_ref(), "HTTPS_KEY_PATH")?;
    if !cert.is_file() {
        return Err(TlsError::MissingCert(cert.to_path_buf()));
    }
    if !key.is_file() {
        return Err(TlsError::MissingKey(key.to_path_buf()));
    }
    Ok(RustlsConfig::from_pem_file(cert, key).await?)
}
