//! Pinned trust for the relay connection.
//!
//! The relay is authenticated against a PEM bundle of pinned anchors, never
//! the system CA set. A bundle that yields zero anchors is a deployment
//! fault and fails construction.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read trust anchors {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("rejected trust anchor in {0}: {1}")]
    BadAnchor(PathBuf, rustls::Error),
    #[error("no trust anchors found in {0}")]
    NoAnchors(PathBuf),
}

/// Build a client config trusting only the anchors in `path`.
pub fn pinned_client_config(path: &Path) -> Result<Arc<rustls::ClientConfig>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::ReadFailed(path.to_path_buf(), e))?;
    let mut reader = BufReader::new(file);

    let mut roots = rustls::RootCertStore::empty();
    let mut loaded = 0usize;
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| TlsError::ReadFailed(path.to_path_buf(), e))?;
        roots
            .add(cert)
            .map_err(|e| TlsError::BadAnchor(path.to_path_buf(), e))?;
        loaded += 1;
    }
    if loaded == 0 {
        return Err(TlsError::NoAnchors(path.to_path_buf()));
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bundle_is_read_error() {
        let err = pinned_client_config(Path::new("/nonexistent/anchors.pem")).unwrap_err();
        assert!(matches!(err, TlsError::ReadFailed(_, _)));
    }

    #[test]
    fn empty_bundle_is_rejected() {
        let path = std::env::temp_dir().join(format!("courier-empty-anchors-{}", std::process::id()));
        std::fs::write(&path, "").unwrap();
        let err = pinned_client_config(&path).unwrap_err();
        assert!(matches!(err, TlsError::NoAnchors(_)));
        let _ = std::fs::remove_file(&path);
    }
}
