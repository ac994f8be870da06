//! Error taxonomy shared by every subsystem.
//!
//! # Responsibilities
//! - Interpret operating-system failures into a small, closed set of kinds
//! - Carry a human-readable message alongside the kind
//! - Keep internal invariant violations distinct from network conditions
//!
//! # Design Decisions
//! - `WouldBlock` never escapes: the runtime turns it into a suspended
//!   operation, so seeing one here is reported as `Internal`
//! - Errors are `Clone` so a single coalesced lookup can complete many waiters

use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::resource::Handle;

/// Why a TLS handshake failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandshakeFailure {
    /// Certificate missing, invalid, expired or untrusted.
    Certificate,
    /// Version, cipher or ALPN negotiation failed, or the peer misbehaved.
    Protocol,
    /// The peer sent an alert or dropped the transport mid-handshake.
    PeerAbort,
}

impl fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeFailure::Certificate => write!(f, "certificate"),
            HandshakeFailure::Protocol => write!(f, "protocol"),
            HandshakeFailure::PeerAbort => write!(f, "peer-abort"),
        }
    }
}

/// Error kinds that cross the op boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    AddressInUse,
    AddressNotAvailable,
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    NotConnected,
    BrokenPipe,
    UnexpectedEof,
    NameNotFound,
    ResolverUnavailable,
    Timeout,
    PermissionDenied,
    /// Unknown or already-closed handle.
    InvalidHandle,
    /// The handle is live but the op does not apply to its kind.
    BadResource,
    InvalidArgument,
    /// The caller abandoned the op before it completed.
    Cancelled,
    TlsHandshakeFailed(HandshakeFailure),
    TlsRecordError,
    /// Any other interpreted OS failure.
    Io,
    /// Broken internal invariant. Never retryable.
    Internal,
}

impl ErrorKind {
    /// Stable class name used by the op boundary.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::AddressInUse => "AddressInUse",
            ErrorKind::AddressNotAvailable => "AddressNotAvailable",
            ErrorKind::ConnectionRefused => "ConnectionRefused",
            ErrorKind::ConnectionReset => "ConnectionReset",
            ErrorKind::ConnectionAborted => "ConnectionAborted",
            ErrorKind::NotConnected => "NotConnected",
            ErrorKind::BrokenPipe => "BrokenPipe",
            ErrorKind::UnexpectedEof => "UnexpectedEof",
            ErrorKind::NameNotFound => "NameNotFound",
            ErrorKind::ResolverUnavailable => "ResolverUnavailable",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::InvalidHandle => "InvalidHandle",
            ErrorKind::BadResource => "BadResource",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::TlsHandshakeFailed(_) => "TlsHandshakeFailed",
            ErrorKind::TlsRecordError => "TlsRecordError",
            ErrorKind::Io => "Io",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TlsHandshakeFailed(reason) => write!(f, "TlsHandshakeFailed({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Error returned by every network operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct NetError {
    kind: ErrorKind,
    message: String,
}

/// Result type for network operations.
pub type NetResult<T> = Result<T, NetError>;

impl NetError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn invalid_handle(handle: Handle) -> Self {
        Self::new(ErrorKind::InvalidHandle, format!("no live resource for {handle}"))
    }

    pub fn resource_closed(handle: Handle) -> Self {
        Self::new(ErrorKind::InvalidHandle, format!("{handle} was closed during the operation"))
    }

    pub fn bad_resource(handle: Handle, expected: &str) -> Self {
        Self::new(ErrorKind::BadResource, format!("{handle} is not a {expected}"))
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(ErrorKind::Timeout, format!("{operation} timed out"))
    }

    pub fn cancelled(operation: &str) -> Self {
        Self::new(ErrorKind::Cancelled, format!("{operation} was cancelled"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn handshake(reason: HandshakeFailure, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TlsHandshakeFailed(reason), message)
    }
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::AddrInUse => ErrorKind::AddressInUse,
            io::ErrorKind::AddrNotAvailable => ErrorKind::AddressNotAvailable,
            io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset => ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted => ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected => ErrorKind::NotConnected,
            io::ErrorKind::BrokenPipe => ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof => ErrorKind::UnexpectedEof,
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidArgument,
            io::ErrorKind::WouldBlock => {
                return NetError::internal("operation would block outside the reactor");
            }
            _ => ErrorKind::Io,
        };
        NetError::new(kind, err.to_string())
    }
}
