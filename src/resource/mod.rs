//! Resource registry subsystem.
//!
//! # Data Flow
//! ```text
//! driver creates OS object (listener / stream / datagram socket)
//!     → table.rs allocates a never-reused Handle
//!     → caller only ever holds the Handle
//!     → each op: get(handle) → Arc<Resource> held for the op's duration
//!     → close: remove(handle) → close signal → in-flight ops bail out
//!     → OS object dropped with the last Arc
//! ```
//!
//! # Design Decisions
//! - The table is the single source of truth for liveness
//! - Ops hold their own `Arc`, so removal never frees state in use
//! - Per-half issue order is enforced by `ordered.rs`, not by locks alone

pub mod ordered;
pub mod table;

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{NetError, NetResult};
use crate::net::{Connection, DatagramSocket, NetAddr, NetListener};

pub use ordered::{Ordered, OrderedGuard, Ticket};
pub use table::ResourceTable;

/// Opaque identifier of a live resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Kind tag of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    TcpListener,
    TcpConnection,
    UdpSocket,
    UnixListener,
    UnixConnection,
    TlsConnection,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::TcpListener => "tcp listener",
            ResourceKind::TcpConnection => "tcp connection",
            ResourceKind::UdpSocket => "udp socket",
            ResourceKind::UnixListener => "unix listener",
            ResourceKind::UnixConnection => "unix connection",
            ResourceKind::TlsConnection => "tls connection",
        };
        f.write_str(name)
    }
}

/// The owned I/O object behind a handle.
pub enum ResourceBody {
    Listener(NetListener),
    Connection(Connection),
    Datagram(DatagramSocket),
}

impl ResourceBody {
    pub fn local_addr(&self) -> &NetAddr {
        match self {
            ResourceBody::Listener(listener) => listener.local_addr(),
            ResourceBody::Connection(conn) => conn.local_addr(),
            ResourceBody::Datagram(socket) => socket.local_addr(),
        }
    }
}

/// An entry of the resource table.
pub struct Resource {
    handle: Handle,
    body: ResourceBody,
    closed: watch::Sender<bool>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Resource {
    pub(crate) fn new(handle: Handle, body: ResourceBody) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            handle,
            body,
            closed,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> ResourceKind {
        match &self.body {
            ResourceBody::Listener(listener) => listener.kind(),
            ResourceBody::Connection(conn) => conn.kind(),
            ResourceBody::Datagram(_) => ResourceKind::UdpSocket,
        }
    }

    pub fn body(&self) -> &ResourceBody {
        &self.body
    }

    pub fn as_listener(&self) -> NetResult<&NetListener> {
        match &self.body {
            ResourceBody::Listener(listener) => Ok(listener),
            _ => Err(NetError::bad_resource(self.handle, "listener")),
        }
    }

    pub fn as_connection(&self) -> NetResult<&Connection> {
        match &self.body {
            ResourceBody::Connection(conn) => Ok(conn),
            _ => Err(NetError::bad_resource(self.handle, "connection")),
        }
    }

    pub fn as_datagram(&self) -> NetResult<&DatagramSocket> {
        match &self.body {
            ResourceBody::Datagram(socket) => Ok(socket),
            _ => Err(NetError::bad_resource(self.handle, "datagram socket")),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Flip the closed flag. Returns true only for the first caller.
    pub(crate) fn mark_closed(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Run `fut` unless the resource is closed first.
    ///
    /// An op racing with `close` completes with `InvalidHandle` instead of
    /// touching the I/O object after its owner let go of it.
    pub async fn guard<T, F>(&self, fut: F) -> NetResult<T>
    where
        F: Future<Output = NetResult<T>>,
    {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(NetError::resource_closed(self.handle));
        }
        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => Err(NetError::resource_closed(self.handle)),
            result = fut => result,
        }
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        tracing::trace!(handle = %self.handle, "Resource released");
    }
}
