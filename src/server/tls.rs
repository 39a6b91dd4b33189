//! 🔒 TLS acceptor construction
//!
//! Presence of the `tls` config block turns the listener into `wss://`.
//! `ca_path` additionally requires and validates client certificates.

use crate::config::TlsConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::log_info;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

fn load_certs(path: &Path) -> GatewayResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| GatewayError::ConfigValidation {
        message: format!("cannot open {}: {e}", path.display()),
    })?;
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut BufReader::new(file)).collect();
    let certs = certs.map_err(|e| GatewayError::ConfigValidation {
        message: format!("bad certificate in {}: {e}", path.display()),
    })?;
    if certs.is_empty() {
        return Err(GatewayError::ConfigValidation {
            message: format!("no certificates found in {}", path.display()),
        });
    }
    Ok(certs)
}

fn load_key(path: &Path) -> GatewayResult<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| GatewayError::ConfigValidation {
        message: format!("cannot open {}: {e}", path.display()),
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| GatewayError::ConfigValidation {
            message: format!("bad private key in {}: {e}", path.display()),
        })?
        .ok_or_else(|| GatewayError::ConfigValidation {
            message: format!("no private key found in {}", path.display()),
        })
}

/// Build the acceptor from the configured key/cert (and optional client CA)
pub fn build_acceptor(config: &TlsConfig) -> GatewayResult<TlsAcceptor> {
    let certs = load_certs(&config.cert_path)?;
    let key = load_key(&config.key_path)?;

    let builder = match &config.ca_path {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots.add(cert).map_err(|e| GatewayError::ConfigValidation {
                    message: format!("bad CA certificate in {}: {e}", ca_path.display()),
                })?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| GatewayError::ConfigValidation {
                    message: format!("client verifier: {e}"),
                })?;
            log_info!("tls", "🔒 Client certificate validation enabled");
            ServerConfig::builder().with_client_cert_verifier(verifier)
        }
        None => ServerConfig::builder().with_no_client_auth(),
    };

    let server_config = builder
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::ConfigValidation {
            message: format!("tls key/cert mismatch: {e}"),
        })?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_cert_file_is_config_error() {
        let config = TlsConfig {
            key_path: "/nonexistent/key.pem".into(),
            cert_path: "/nonexistent/cert.pem".into(),
            ca_path: None,
        };
        let err = match build_acceptor(&config) {
            Ok(_) => panic!("expected build_acceptor to fail"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), "config_error");
    }

    #[test]
    fn test_empty_pem_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        File::create(&cert_path)
            .unwrap()
            .write_all(b"not a pem")
            .unwrap();
        File::create(&key_path).unwrap().write_all(b"").unwrap();

        let config = TlsConfig {
            key_path,
            cert_path,
            ca_path: None,
        };
        assert!(build_acceptor(&config).is_err());
    }
}
