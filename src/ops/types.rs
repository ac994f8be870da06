//! Wire shapes of the op surface.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{HandshakeFailure, NetError};
use crate::net::{Half, NetAddr, ReadOutcome};
use crate::resolver::{AddressCandidate, AddressFamily};
use crate::resource::Handle;
use crate::tls::{TlsInfo, TlsOptions, TlsRole};

/// What `net.listen` binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenKind {
    Tcp,
    Udp,
    Unix,
}

/// Where `net.connect` goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// Pre-resolved addresses, tried in order.
    Candidates(Vec<AddressCandidate>),
    /// Resolve first, then try the candidates.
    Host {
        host: String,
        port: u16,
        family: Option<AddressFamily>,
    },
    Unix(PathBuf),
}

/// Bytes in a request: a JSON string is taken as UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.into_bytes(),
            Payload::Bytes(bytes) => bytes,
        }
    }
}

/// One op request, tagged by its op name.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all_fields = "camelCase")]
pub enum OpRequest {
    #[serde(rename = "net.resolve")]
    Resolve {
        host: String,
        #[serde(default)]
        port: u16,
        #[serde(default)]
        family: Option<AddressFamily>,
    },
    #[serde(rename = "net.listen")]
    Listen {
        kind: ListenKind,
        local_addr: String,
        #[serde(default)]
        backlog: Option<u32>,
    },
    #[serde(rename = "net.accept")]
    Accept { handle: Handle },
    #[serde(rename = "net.connect")]
    Connect {
        #[serde(default)]
        candidates: Option<Vec<SocketAddr>>,
        #[serde(default)]
        host: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        family: Option<AddressFamily>,
        #[serde(default)]
        path: Option<PathBuf>,
    },
    #[serde(rename = "net.read")]
    Read { handle: Handle, max_len: usize },
    #[serde(rename = "net.write")]
    Write { handle: Handle, data: Payload },
    #[serde(rename = "net.shutdown")]
    Shutdown { handle: Handle, half: Half },
    #[serde(rename = "net.setOption")]
    SetOption {
        handle: Handle,
        option: String,
        value: serde_json::Value,
    },
    #[serde(rename = "net.sendTo")]
    SendTo {
        handle: Handle,
        data: Payload,
        addr: SocketAddr,
    },
    #[serde(rename = "net.receiveFrom")]
    ReceiveFrom { handle: Handle, max_len: usize },
    #[serde(rename = "net.tlsUpgrade")]
    TlsUpgrade {
        handle: Handle,
        role: TlsRole,
        #[serde(default)]
        config: TlsOptions,
    },
    #[serde(rename = "net.tlsInfo")]
    TlsInfo { handle: Handle },
    #[serde(rename = "net.localAddr")]
    LocalAddr { handle: Handle },
    #[serde(rename = "net.peerAddr")]
    PeerAddr { handle: Handle },
    #[serde(rename = "net.close")]
    Close { handle: Handle },
    #[serde(rename = "net.closeAll")]
    CloseAll,
}

impl OpRequest {
    pub fn name(&self) -> &'static str {
        match self {
            OpRequest::Resolve { .. } => "net.resolve",
            OpRequest::Listen { .. } => "net.listen",
            OpRequest::Accept { .. } => "net.accept",
            OpRequest::Connect { .. } => "net.connect",
            OpRequest::Read { .. } => "net.read",
            OpRequest::Write { .. } => "net.write",
            OpRequest::Shutdown { .. } => "net.shutdown",
            OpRequest::SetOption { .. } => "net.setOption",
            OpRequest::SendTo { .. } => "net.sendTo",
            OpRequest::ReceiveFrom { .. } => "net.receiveFrom",
            OpRequest::TlsUpgrade { .. } => "net.tlsUpgrade",
            OpRequest::TlsInfo { .. } => "net.tlsInfo",
            OpRequest::LocalAddr { .. } => "net.localAddr",
            OpRequest::PeerAddr { .. } => "net.peerAddr",
            OpRequest::Close { .. } => "net.close",
            OpRequest::CloseAll => "net.closeAll",
        }
    }
}

/// Turn the loose `net.connect` fields into a target. Exactly one of
/// candidates, host or path must be present.
pub fn connect_target(
    candidates: Option<Vec<SocketAddr>>,
    host: Option<String>,
    port: Option<u16>,
    family: Option<AddressFamily>,
    path: Option<PathBuf>,
) -> Result<ConnectTarget, NetError> {
    match (candidates, host, path) {
        (Some(addrs), None, None) => Ok(ConnectTarget::Candidates(
            addrs.into_iter().map(AddressCandidate::new).collect(),
        )),
        (None, Some(host), None) => {
            let port = port.ok_or_else(|| NetError::invalid_argument("connect by host needs a port"))?;
            Ok(ConnectTarget::Host { host, port, family })
        }
        (None, None, Some(path)) => Ok(ConnectTarget::Unix(path)),
        _ => Err(NetError::invalid_argument(
            "connect needs exactly one of candidates, host or path",
        )),
    }
}

/// Successful op result.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum OpValue {
    Candidates(Vec<AddressCandidate>),
    Accepted { handle: Handle, remote_addr: NetAddr },
    Handle { handle: Handle },
    Read(ReadOutcome),
    Written { written: usize },
    Received { data: Vec<u8>, from: SocketAddr },
    Address { addr: NetAddr },
    TlsInfo(TlsInfo),
    Closed { closed: usize },
    Done,
}

/// Error crossing the op boundary: kind name, handshake reason when there
/// is one, and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub class: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<HandshakeFailure>,
    pub message: String,
}

impl From<&NetError> for ErrorBody {
    fn from(err: &NetError) -> Self {
        let reason = match err.kind() {
            crate::error::ErrorKind::TlsHandshakeFailed(reason) => Some(reason),
            _ => None,
        };
        Self {
            class: err.kind().name(),
            reason,
            message: err.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Ok(OpValue),
    Err(ErrorBody),
}

impl From<Result<OpValue, NetError>> for Outcome {
    fn from(result: Result<OpValue, NetError>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(err) => Outcome::Err(ErrorBody::from(&err)),
        }
    }
}

/// Exactly one of these is emitted per dispatched op.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    /// `None` for lines that could not be parsed far enough to find an id.
    pub id: Option<u64>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn requests_parse_by_op_name() {
        let request: OpRequest = serde_json::from_value(json!({
            "op": "net.read", "handle": 3, "maxLen": 1024
        }))
        .unwrap();
        assert!(matches!(request, OpRequest::Read { handle: Handle(3), max_len: 1024 }));

        let request: OpRequest = serde_json::from_value(json!({
            "op": "net.write", "handle": 3, "data": "ping"
        }))
        .unwrap();
        let OpRequest::Write { data, .. } = request else {
            panic!("expected write");
        };
        assert_eq!(data.into_bytes(), b"ping");

        let request: OpRequest = serde_json::from_value(json!({
            "op": "net.tlsUpgrade", "handle": 4, "role": "client",
            "config": { "serverName": "localhost", "verifyMode": false }
        }))
        .unwrap();
        assert_eq!(request.name(), "net.tlsUpgrade");
    }

    #[test]
    fn connect_needs_exactly_one_target() {
        let target = connect_target(None, Some("example.com".into()), Some(443), None, None).unwrap();
        assert!(matches!(target, ConnectTarget::Host { port: 443, .. }));

        let err = connect_target(None, None, None, None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = connect_target(None, Some("example.com".into()), None, None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn completions_serialize_as_ok_or_err() {
        let ok = Completion {
            id: Some(1),
            outcome: Outcome::Ok(OpValue::Written { written: 4 }),
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"id": 1, "ok": {"written": 4}})
        );

        let err = NetError::handshake(HandshakeFailure::Certificate, "unknown issuer");
        let completion = Completion {
            id: Some(2),
            outcome: Outcome::from(Err(err)),
        };
        assert_eq!(
            serde_json::to_value(&completion).unwrap(),
            json!({"id": 2, "err": {
                "class": "TlsHandshakeFailed",
                "reason": "certificate",
                "message": "unknown issuer"
            }})
        );

        let eof = Completion {
            id: Some(3),
            outcome: Outcome::Ok(OpValue::Read(ReadOutcome::Eof)),
        };
        assert_eq!(serde_json::to_value(&eof).unwrap(), json!({"id": 3, "ok": "eof"}));
    }
}
