//! TLS for TCP listeners
//!
//! Certificates follow the Docker daemon conventions: `cert.pem` and
//! `key.pem` identify the proxy, and with `tls_verify` clients must present
//! a certificate signed by `ca.pem`.

use crate::config::TlsConfig;
use crate::error::{ProxyError, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// Build the acceptor used to wrap TCP connections, or `None` when TLS is off.
pub fn load_acceptor(config: &TlsConfig) -> Result<Option<TlsAcceptor>> {
    if !config.enabled() {
        return Ok(None);
    }

    let certs = load_certs(&config.cert_path())?;
    let key = load_key(&config.key_path())?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::Tls(e.to_string()))?;

    let builder = if config.tls_verify {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(&config.ca_cert_path())? {
            roots
                .add(cert)
                .map_err(|e| ProxyError::Tls(format!("Invalid CA certificate: {e}")))?;
        }
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| ProxyError::Tls(format!("Failed to build client verifier: {e}")))?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    let mut server_config = builder
        .with_single_cert(certs, key)
        .map_err(|e| ProxyError::Tls(format!("Invalid certificate or key: {e}")))?;

    // Docker API is HTTP/1.1 only
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    debug!(
        "TLS enabled (client verification: {})",
        if config.tls_verify { "on" } else { "off" }
    );
    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

fn read_pem(what: &'static str, path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| ProxyError::FileLoad {
        what,
        path: path.to_path_buf(),
        source,
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_pem("certificate", path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Tls(format!("Failed to parse {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(ProxyError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = read_pem("private key", path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| ProxyError::Tls(format!("Failed to parse {}: {e}", path.display())))?
        .ok_or_else(|| ProxyError::Tls(format!("No private key found in {}", path.display())))
}
