// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TLS server settings for network inputs.
//!
//! Certificates and keys are read from PEM files. The ring crypto provider is
//! installed per config rather than process-wide, so embedding applications
//! stay free to pick their own default provider.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsServerConfig {
    /// PEM file holding the certificate chain, leaf first.
    pub cert_file: PathBuf,
    /// PEM file holding the private key (PKCS#1, PKCS#8 or SEC1).
    pub key_file: PathBuf,
}

impl TlsServerConfig {
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        TlsServerConfig {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        }
    }

    /// Reads the certificate and key and builds a rustls server config.
    pub fn load(&self) -> Result<Arc<ServerConfig>, ConfigError> {
        let certs = load_certs(&self.cert_file)?;
        let key = load_key(&self.key_file)?;
        debug!(
            "Loaded {} certificate(s) from {}",
            certs.len(),
            self.cert_file.display()
        );

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ConfigError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ConfigError::Tls(format!("invalid certificate or key: {e}")))?;
        Ok(Arc::new(config))
    }
}

fn open(path: &Path) -> Result<BufReader<File>, ConfigError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ConfigError::Tls(format!("failed to open {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("failed to parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ConfigError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| ConfigError::Tls(format!("failed to parse {}: {e}", path.display())))?
        .ok_or_else(|| ConfigError::Tls(format!("no private key found in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    #[test]
    fn test_load_fixture() {
        let config = TlsServerConfig::new(fixture("server.crt"), fixture("server.key"));
        assert!(config.load().is_ok());
    }

    #[test]
    fn test_missing_files() {
        let config = TlsServerConfig::new("/nonexistent/server.crt", fixture("server.key"));
        let error = config.load().unwrap_err();
        assert!(error.to_string().contains("failed to open /nonexistent/server.crt"));

        let config = TlsServerConfig::new(fixture("server.crt"), "/nonexistent/server.key");
        assert!(config.load().is_err());
    }

    #[test]
    fn test_files_without_pem_blocks() {
        let mut empty = tempfile::NamedTempFile::new().unwrap();
        writeln!(empty, "not a pem file").unwrap();

        let config = TlsServerConfig::new(empty.path(), fixture("server.key"));
        assert!(config
            .load()
            .unwrap_err()
            .to_string()
            .contains("no certificates found"));

        let config = TlsServerConfig::new(fixture("server.crt"), empty.path());
        assert!(config
            .load()
            .unwrap_err()
            .to_string()
            .contains("no private key found"));
    }

    #[test]
    fn test_decode() {
        let config: TlsServerConfig = serde_json::from_value(serde_json::json!({
            "cert_file": "/etc/certs/server.crt",
            "key_file": "/etc/certs/server.key"
        }))
        .unwrap();
        assert_eq!(config.cert_file, PathBuf::from("/etc/certs/server.crt"));
    }
}
