//! Upgrade options and rustls configuration building.

use std::io::BufRead;
use std::net::IpAddr;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use serde::{Deserialize, Serialize};

use crate::config::TlsSettings;
use crate::error::{HandshakeFailure, NetError, NetResult};
use crate::tls::verify::AcceptAnyServerCert;

/// Side of the handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsRole {
    Client,
    Server,
}

/// Per-upgrade options. Certificates and keys are PEM text.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsOptions {
    /// SNI hostname and the name the server certificate must match.
    pub server_name: Option<String>,
    /// Application protocols in preference order.
    pub alpn_protocols: Vec<String>,
    /// Required for servers; optional client certificate otherwise.
    pub certificate_chain: Option<String>,
    pub private_key: Option<String>,
    /// Extra trust anchors for this upgrade only.
    pub ca_certs: Option<String>,
    /// Clients verify the server certificate. Servers with `ca_certs`
    /// require and verify a client certificate.
    #[serde(alias = "verifyMode")]
    pub verify_peer: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            server_name: None,
            alpn_protocols: Vec::new(),
            certificate_chain: None,
            private_key: None,
            ca_certs: None,
            verify_peer: true,
        }
    }
}

/// Process-wide TLS state: crypto provider and configured trust anchors.
#[derive(Debug, Clone)]
pub struct TlsContext {
    provider: Arc<CryptoProvider>,
    roots: Arc<RootCertStore>,
}

impl TlsContext {
    pub fn from_settings(settings: &TlsSettings) -> NetResult<Self> {
        let mut roots = RootCertStore::empty();
        if settings.use_webpki_roots {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        if let Some(path) = &settings.ca_file {
            let pem = std::fs::read(path).map_err(|e| {
                NetError::invalid_argument(format!("failed to read CA file {path}: {e}"))
            })?;
            for cert in parse_certs(&mut pem.as_slice())? {
                roots.add(cert).map_err(|e| {
                    NetError::invalid_argument(format!("bad CA certificate in {path}: {e}"))
                })?;
            }
        }
        tracing::debug!(trust_anchors = roots.len(), "TLS context initialized");
        Ok(Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            roots: Arc::new(roots),
        })
    }

    /// A context trusting only the given PEM anchors.
    pub fn with_roots_pem(pem: &str) -> NetResult<Self> {
        let mut roots = RootCertStore::empty();
        for cert in parse_certs(&mut pem.as_bytes())? {
            roots
                .add(cert)
                .map_err(|e| NetError::invalid_argument(format!("bad CA certificate: {e}")))?;
        }
        Ok(Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            roots: Arc::new(roots),
        })
    }

    fn roots_for(&self, options: &TlsOptions) -> NetResult<Arc<RootCertStore>> {
        let Some(pem) = &options.ca_certs else {
            return Ok(Arc::clone(&self.roots));
        };
        let mut roots = (*self.roots).clone();
        for cert in parse_certs(&mut pem.as_bytes())? {
            roots
                .add(cert)
                .map_err(|e| NetError::invalid_argument(format!("bad CA certificate: {e}")))?;
        }
        Ok(Arc::new(roots))
    }

    pub fn client_config(&self, options: &TlsOptions) -> NetResult<Arc<ClientConfig>> {
        let builder = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(config_error)?;
        let builder = if options.verify_peer {
            builder.with_root_certificates(self.roots_for(options)?)
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(Arc::clone(
                    &self.provider,
                ))))
        };
        let mut config = match identity(options)? {
            Some((chain, key)) => builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| certificate_error(format!("client certificate rejected: {e}")))?,
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = alpn(options);
        Ok(Arc::new(config))
    }

    pub fn server_config(&self, options: &TlsOptions) -> NetResult<Arc<ServerConfig>> {
        let (chain, key) = identity(options)?.ok_or_else(|| {
            certificate_error("server role requires certificateChain and privateKey")
        })?;
        let builder = ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(config_error)?;
        let builder = match (&options.ca_certs, options.verify_peer) {
            (Some(_), true) => {
                let verifier = WebPkiClientVerifier::builder_with_provider(
                    self.roots_for(options)?,
                    Arc::clone(&self.provider),
                )
                .build()
                .map_err(|e| NetError::invalid_argument(format!("client verifier: {e}")))?;
                builder.with_client_cert_verifier(verifier)
            }
            _ => builder.with_no_client_auth(),
        };
        let mut config = builder
            .with_single_cert(chain, key)
            .map_err(|e| certificate_error(format!("server certificate rejected: {e}")))?;
        config.alpn_protocols = alpn(options);
        Ok(Arc::new(config))
    }
}

/// Name the client verifies the server against: the configured server name,
/// or the peer's IP address.
pub fn server_name_for(options: &TlsOptions, peer_ip: Option<IpAddr>) -> NetResult<ServerName<'static>> {
    match (&options.server_name, peer_ip) {
        (Some(name), _) => ServerName::try_from(name.clone())
            .map_err(|_| NetError::invalid_argument(format!("invalid server name: {name}"))),
        (None, Some(ip)) => Ok(ServerName::IpAddress(ip.into())),
        (None, None) => Err(NetError::invalid_argument(
            "client upgrade needs serverName on a connection without an IP peer",
        )),
    }
}

fn alpn(options: &TlsOptions) -> Vec<Vec<u8>> {
    options
        .alpn_protocols
        .iter()
        .map(|p| p.as_bytes().to_vec())
        .collect()
}

type Identity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn identity(options: &TlsOptions) -> NetResult<Option<Identity>> {
    match (&options.certificate_chain, &options.private_key) {
        (Some(chain), Some(key)) => {
            let chain = parse_certs(&mut chain.as_bytes())?;
            if chain.is_empty() {
                return Err(certificate_error("certificateChain holds no certificates"));
            }
            let key = rustls_pemfile::private_key(&mut key.as_bytes())
                .map_err(|e| certificate_error(format!("unreadable private key: {e}")))?
                .ok_or_else(|| certificate_error("privateKey holds no key"))?;
            Ok(Some((chain, key)))
        }
        (None, None) => Ok(None),
        _ => Err(certificate_error(
            "certificateChain and privateKey must be given together",
        )),
    }
}

fn parse_certs(reader: &mut dyn BufRead) -> NetResult<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| certificate_error(format!("unreadable certificate: {e}")))
}

fn certificate_error(message: impl Into<String>) -> NetError {
    NetError::handshake(HandshakeFailure::Certificate, message)
}

fn config_error(err: rustls::Error) -> NetError {
    NetError::handshake(HandshakeFailure::Protocol, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn context() -> TlsContext {
        TlsContext::from_settings(&TlsSettings {
            use_webpki_roots: false,
            ca_file: None,
        })
        .unwrap()
    }

    #[test]
    fn server_without_identity_is_certificate_failure() {
        let err = context().server_config(&TlsOptions::default()).unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::TlsHandshakeFailed(HandshakeFailure::Certificate)
        );
    }

    #[test]
    fn options_deserialize_from_camel_case() {
        let options: TlsOptions = serde_json::from_value(serde_json::json!({
            "serverName": "example.com",
            "alpnProtocols": ["h2", "http/1.1"],
            "verifyMode": false,
        }))
        .unwrap();
        assert_eq!(options.server_name.as_deref(), Some("example.com"));
        assert_eq!(alpn(&options), vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
        assert!(!options.verify_peer);
    }

    #[test]
    fn server_name_falls_back_to_peer_ip() {
        let options = TlsOptions::default();
        let name = server_name_for(&options, Some("127.0.0.1".parse().unwrap())).unwrap();
        assert!(matches!(name, ServerName::IpAddress(_)));
        assert!(server_name_for(&options, None).is_err());
    }

    #[test]
    fn client_config_carries_alpn() {
        let options = TlsOptions {
            alpn_protocols: vec!["h2".into()],
            ..TlsOptions::default()
        };
        let config = context().client_config(&options).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }
}
