//! Per-connection TLS session state.
//!
//! ```text
//! Idle ──▶ Handshaking ──▶ Established ──▶ Closing ──▶ Closed
//!              │                │
//!              └──▶ Failed ◀────┘ (record error)
//! ```

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

use crate::error::{ErrorKind, NetError};
use crate::net::stream::TlsIo;
use crate::tls::config::TlsRole;
use crate::tls::verify::rustls_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TlsState {
    Idle,
    Handshaking,
    Established,
    Closing,
    Closed,
    Failed,
}

impl TlsState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TlsState::Idle,
            1 => TlsState::Handshaking,
            2 => TlsState::Established,
            3 => TlsState::Closing,
            4 => TlsState::Closed,
            _ => TlsState::Failed,
        }
    }
}

/// Facts fixed by the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeInfo {
    pub role: TlsRole,
    pub alpn_protocol: Option<String>,
    pub protocol_version: Option<String>,
    pub cipher_suite: Option<String>,
    pub server_name: Option<String>,
    pub peer_certificates: usize,
}

impl HandshakeInfo {
    pub(crate) fn capture(role: TlsRole, stream: &TlsIo, server_name: Option<String>) -> Self {
        let (_, common) = stream.get_ref();
        let server_name = match stream {
            tokio_rustls::TlsStream::Server(s) => s.get_ref().1.server_name().map(str::to_owned),
            tokio_rustls::TlsStream::Client(_) => server_name,
        };
        Self {
            role,
            alpn_protocol: common
                .alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            protocol_version: common.protocol_version().map(|v| format!("{v:?}")),
            cipher_suite: common
                .negotiated_cipher_suite()
                .map(|s| format!("{:?}", s.suite())),
            server_name,
            peer_certificates: common.peer_certificates().map_or(0, |certs| certs.len()),
        }
    }
}

/// Snapshot returned by `tlsInfo`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsInfo {
    pub state: TlsState,
    #[serde(flatten)]
    pub handshake: Option<HandshakeInfo>,
}

#[derive(Debug)]
pub struct TlsSession {
    role: TlsRole,
    state: AtomicU8,
    info: OnceLock<HandshakeInfo>,
}

impl TlsSession {
    pub fn new(role: TlsRole) -> Self {
        Self {
            role,
            state: AtomicU8::new(TlsState::Idle as u8),
            info: OnceLock::new(),
        }
    }

    pub fn state(&self) -> TlsState {
        TlsState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn info(&self) -> TlsInfo {
        TlsInfo {
            state: self.state(),
            handshake: self.info.get().cloned(),
        }
    }

    /// Move to `to` if the current state is one of `from`.
    fn transition(&self, from: &[TlsState], to: TlsState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !from.contains(&TlsState::from_u8(current)) {
                return false;
            }
            match self
                .state
                .compare_exchange(current, to as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    tracing::trace!(
                        role = ?self.role,
                        from = ?TlsState::from_u8(current),
                        to = ?to,
                        "TLS state"
                    );
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn start_handshake(&self) -> bool {
        self.transition(&[TlsState::Idle], TlsState::Handshaking)
    }

    pub(crate) fn established(&self, info: HandshakeInfo) -> bool {
        let _ = self.info.set(info);
        self.transition(&[TlsState::Handshaking], TlsState::Established)
    }

    pub(crate) fn fail(&self) {
        self.transition(
            &[TlsState::Handshaking, TlsState::Established, TlsState::Closing],
            TlsState::Failed,
        );
    }

    /// Close-notify is about to be sent.
    pub fn begin_closing(&self) {
        self.transition(&[TlsState::Established], TlsState::Closing);
    }

    /// Both directions are down.
    pub fn finish_closing(&self) {
        self.transition(&[TlsState::Established, TlsState::Closing], TlsState::Closed);
    }

    /// Interpret an I/O error from the encrypted stream. Record-layer
    /// failures fail the session and become `TlsRecordError`; anything else
    /// is left to the generic mapping.
    pub fn record_error(&self, err: &io::Error) -> Option<NetError> {
        let tls_err = rustls_error(err)?;
        self.fail();
        Some(NetError::new(
            ErrorKind::TlsRecordError,
            format!("TLS record error: {tls_err}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_the_lifecycle() {
        let session = TlsSession::new(TlsRole::Client);
        assert_eq!(session.state(), TlsState::Idle);
        // Closing before establishment is ignored.
        session.begin_closing();
        assert_eq!(session.state(), TlsState::Idle);

        assert!(session.start_handshake());
        assert!(!session.start_handshake());
        assert!(session.established(HandshakeInfo {
            role: TlsRole::Client,
            alpn_protocol: Some("h2".into()),
            protocol_version: None,
            cipher_suite: None,
            server_name: None,
            peer_certificates: 1,
        }));
        session.begin_closing();
        assert_eq!(session.state(), TlsState::Closing);
        session.finish_closing();
        assert_eq!(session.state(), TlsState::Closed);

        // Terminal.
        session.fail();
        assert_eq!(session.state(), TlsState::Closed);
    }

    #[test]
    fn record_errors_fail_the_session() {
        let session = TlsSession::new(TlsRole::Server);
        session.start_handshake();
        session.established(HandshakeInfo {
            role: TlsRole::Server,
            alpn_protocol: None,
            protocol_version: None,
            cipher_suite: None,
            server_name: None,
            peer_certificates: 0,
        });

        let plain = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(session.record_error(&plain).is_none());
        assert_eq!(session.state(), TlsState::Established);

        let bad = io::Error::new(io::ErrorKind::InvalidData, rustls::Error::DecryptError);
        let err = session.record_error(&bad).unwrap();
        assert_eq!(err.kind(), ErrorKind::TlsRecordError);
        assert_eq!(session.state(), TlsState::Failed);
    }
}
