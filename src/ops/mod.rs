//! Async op bridge: the op surface over the resource table.
//!
//! # Data Flow
//! ```text
//! NetOps::<op>(args)                      (synchronous)
//!     → table.get(handle), queue tickets taken in issue order
//!     → PendingOp::spawn(work, timeout, orphan hook)
//!         work: resource.guard(driver call) → NetResult<T>
//!     → caller awaits PendingOp, or drops it to cancel
//!
//! dispatch.rs: JSON-shaped requests → NetOps → one Completion per id
//! ```
//!
//! # Design Decisions
//! - Tickets are taken before the op is spawned, so ops against one
//!   resource complete in the order they were issued
//! - Ops that create a resource publish its handle as their result; an
//!   unclaimed result closes that handle again
//! - Ops never close the resource they target, except that a TLS upgrade
//!   whose handshake consumed the stream discards the connection

pub mod dispatch;
pub mod pending;
pub mod types;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LayerConfig;
use crate::error::{NetError, NetResult};
use crate::net::{self, DatagramSocket, Half, NetAddr, NetListener, ReadOutcome, SocketOption};
use crate::resolver::{AddressCandidate, AddressFamily, Resolver};
use crate::resource::{Handle, Resource, ResourceBody, ResourceTable};
use crate::tls::{self, TlsContext, TlsInfo, TlsOptions, TlsRole};

pub use dispatch::Dispatcher;
pub use pending::PendingOp;
pub use types::{Completion, ConnectTarget, ListenKind, OpRequest, OpValue};

struct LayerState {
    table: ResourceTable,
    resolver: Resolver,
    tls: TlsContext,
    config: LayerConfig,
}

/// Entry point for every network op.
///
/// Cheap to clone; clones share the same resource table.
#[derive(Clone)]
pub struct NetOps {
    state: Arc<LayerState>,
    op_timeout: Option<Duration>,
}

impl NetOps {
    /// Build the layer from configuration: hickory resolver with system
    /// fallback, trust anchors from the TLS settings.
    pub fn new(config: LayerConfig) -> NetResult<Self> {
        let resolver = Resolver::from_settings(&config.resolver)?;
        let tls = TlsContext::from_settings(&config.tls)?;
        Ok(Self::with_parts(config, resolver, tls))
    }

    pub fn with_parts(config: LayerConfig, resolver: Resolver, tls: TlsContext) -> Self {
        Self {
            state: Arc::new(LayerState {
                table: ResourceTable::new(),
                resolver,
                tls,
                config,
            }),
            op_timeout: None,
        }
    }

    /// A view of the same layer whose ops race against `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            state: Arc::clone(&self.state),
            op_timeout: Some(timeout),
        }
    }

    pub fn table(&self) -> &ResourceTable {
        &self.state.table
    }

    pub fn resolver(&self) -> &Resolver {
        &self.state.resolver
    }

    pub fn config(&self) -> &LayerConfig {
        &self.state.config
    }

    fn spawn<T, F>(&self, op: &'static str, work: F) -> PendingOp<T>
    where
        T: Send + 'static,
        F: std::future::Future<Output = NetResult<T>> + Send + 'static,
    {
        PendingOp::spawn(op, self.op_timeout, work, |_| {})
    }

    /// Like `spawn` for ops that publish a new handle: an unclaimed result
    /// closes it.
    fn spawn_creating<T, F>(&self, op: &'static str, work: F, handle_of: fn(&T) -> Handle) -> PendingOp<T>
    where
        T: Send + 'static,
        F: std::future::Future<Output = NetResult<T>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        PendingOp::spawn(op, self.op_timeout, work, move |value| {
            let handle = handle_of(&value);
            if state.table.remove(handle).is_ok() {
                tracing::debug!(op, handle = %handle, "Closed unclaimed resource");
            }
        })
    }

    fn read_limit(&self, requested: usize) -> usize {
        requested.min(self.state.config.sockets.max_read_bytes)
    }

    fn resource(&self, handle: Handle) -> NetResult<Arc<Resource>> {
        self.state.table.get(handle)
    }

    pub fn resolve(
        &self,
        host: &str,
        port: u16,
        family: Option<AddressFamily>,
    ) -> PendingOp<Vec<AddressCandidate>> {
        if let Some(candidate) = Resolver::resolve_literal(host, port) {
            if family.map_or(true, |f| f == candidate.family) {
                return PendingOp::ready("net.resolve", Ok(vec![candidate]));
            }
        }
        let resolver = self.state.resolver.clone();
        let host = host.to_string();
        self.spawn("net.resolve", async move { resolver.resolve(&host, port, family).await })
    }

    pub fn listen(&self, kind: ListenKind, local_addr: &str, backlog: Option<u32>) -> PendingOp<Handle> {
        let state = Arc::clone(&self.state);
        let local_addr = local_addr.to_string();
        self.spawn_creating(
            "net.listen",
            async move {
                let sockets = &state.config.sockets;
                let backlog = backlog.unwrap_or(sockets.default_backlog);
                let body = match kind {
                    ListenKind::Tcp => ResourceBody::Listener(NetListener::bind_tcp(
                        parse_socket_addr(&local_addr)?,
                        backlog,
                        sockets.reuse_address,
                    )?),
                    ListenKind::Udp => ResourceBody::Datagram(DatagramSocket::bind(
                        parse_socket_addr(&local_addr)?,
                        sockets.reuse_address,
                    )?),
                    #[cfg(unix)]
                    ListenKind::Unix => ResourceBody::Listener(NetListener::bind_unix(
                        std::path::Path::new(&local_addr),
                        backlog,
                    )?),
                    #[cfg(not(unix))]
                    ListenKind::Unix => {
                        return Err(NetError::invalid_argument("unix sockets are not supported here"))
                    }
                };
                state.table.allocate(body)
            },
            |handle| *handle,
        )
    }

    /// Wait for the next peer on a listener.
    pub fn accept(&self, listener: Handle) -> PendingOp<(Handle, NetAddr)> {
        let resource = match self.resource(listener) {
            Ok(resource) => resource,
            Err(e) => return PendingOp::ready("net.accept", Err(e)),
        };
        let ticket = match resource.as_listener() {
            Ok(l) => l.accept_ticket(),
            Err(e) => return PendingOp::ready("net.accept", Err(e)),
        };
        let state = Arc::clone(&self.state);
        self.spawn_creating(
            "net.accept",
            async move {
                let listener = resource.as_listener()?;
                let (conn, remote) = resource.guard(listener.accept(ticket)).await?;
                let handle = state.table.allocate(ResourceBody::Connection(conn))?;
                tracing::debug!(listener = %resource.handle(), handle = %handle, remote = %remote, "Accepted");
                Ok((handle, remote))
            },
            |(handle, _)| *handle,
        )
    }

    pub fn connect(&self, target: ConnectTarget) -> PendingOp<Handle> {
        let state = Arc::clone(&self.state);
        self.spawn_creating(
            "net.connect",
            async move {
                let attempt_timeout = state.config.timeouts.connect_attempt();
                let conn = match target {
                    ConnectTarget::Candidates(candidates) => {
                        net::connect_tcp(&candidates, attempt_timeout).await?
                    }
                    ConnectTarget::Host { host, port, family } => {
                        let candidates = state.resolver.resolve(&host, port, family).await?;
                        net::connect_tcp(&candidates, attempt_timeout).await?
                    }
                    #[cfg(unix)]
                    ConnectTarget::Unix(path) => net::connect_unix(&path).await?,
                    #[cfg(not(unix))]
                    ConnectTarget::Unix(_) => {
                        return Err(NetError::invalid_argument("unix sockets are not supported here"))
                    }
                };
                let peer = conn.peer_addr().clone();
                let handle = state.table.allocate(ResourceBody::Connection(conn))?;
                tracing::debug!(handle = %handle, peer = %peer, "Connected");
                Ok(handle)
            },
            |handle| *handle,
        )
    }

    /// Connect to a Unix socket path.
    pub fn connect_unix(&self, path: impl Into<PathBuf>) -> PendingOp<Handle> {
        self.connect(ConnectTarget::Unix(path.into()))
    }

    /// Read up to `max_len` bytes, capped at `sockets.max_read_bytes`.
    /// Suspends until data, EOF or an error.
    pub fn read(&self, handle: Handle, max_len: usize) -> PendingOp<ReadOutcome> {
        let max_len = self.read_limit(max_len);
        let resource = match self.resource(handle) {
            Ok(resource) => resource,
            Err(e) => return PendingOp::ready("net.read", Err(e)),
        };
        let ticket = match resource.as_connection() {
            Ok(conn) => conn.read_ticket(),
            Err(e) => return PendingOp::ready("net.read", Err(e)),
        };
        self.spawn("net.read", async move {
            let conn = resource.as_connection()?;
            resource.guard(conn.read(ticket, max_len)).await
        })
    }

    /// Write once; the count may be short under backpressure.
    pub fn write(&self, handle: Handle, data: Vec<u8>) -> PendingOp<usize> {
        let resource = match self.resource(handle) {
            Ok(resource) => resource,
            Err(e) => return PendingOp::ready("net.write", Err(e)),
        };
        let ticket = match resource.as_connection() {
            Ok(conn) => conn.write_ticket(),
            Err(e) => return PendingOp::ready("net.write", Err(e)),
        };
        self.spawn("net.write", async move {
            let conn = resource.as_connection()?;
            resource.guard(conn.write(ticket, &data)).await
        })
    }

    /// Shut down one or both directions. Once both are down the resource is
    /// finalized and its handle released.
    ///
    /// Shutting down a connection that was already finalized succeeds.
    pub fn shutdown(&self, handle: Handle, half: Half) -> PendingOp<()> {
        let resource = match self.resource(handle) {
            Ok(resource) => resource,
            Err(_) if self.state.table.was_issued(handle) => {
                return PendingOp::ready("net.shutdown", Ok(()))
            }
            Err(e) => return PendingOp::ready("net.shutdown", Err(e)),
        };
        let tickets = match resource.as_connection() {
            Ok(conn) => (
                matches!(half, Half::Read | Half::Both).then(|| conn.read_ticket()),
                matches!(half, Half::Write | Half::Both).then(|| conn.write_ticket()),
            ),
            Err(e) => return PendingOp::ready("net.shutdown", Err(e)),
        };
        let state = Arc::clone(&self.state);
        self.spawn("net.shutdown", async move {
            let conn = resource.as_connection()?;
            let (read, write) = tickets;
            let mut fully_closed = false;
            if let Some(ticket) = write {
                fully_closed |= resource.guard(conn.shutdown_write(ticket)).await?;
            }
            if let Some(ticket) = read {
                fully_closed |= resource.guard(conn.shutdown_read(ticket)).await?;
            }
            if fully_closed && state.table.remove(resource.handle()).is_ok() {
                tracing::debug!(handle = %resource.handle(), "Both halves closed, resource finalized");
            }
            Ok(())
        })
    }

    pub fn set_option(&self, handle: Handle, option: SocketOption) -> PendingOp<()> {
        let result = self
            .resource(handle)
            .and_then(|resource| net::options::set_option(&resource, option));
        PendingOp::ready("net.setOption", result)
    }

    /// Parse and set an option given by wire name.
    pub fn set_option_value(&self, handle: Handle, name: &str, value: &serde_json::Value) -> PendingOp<()> {
        match SocketOption::parse(name, value, self.state.config.sockets.keepalive()) {
            Ok(option) => self.set_option(handle, option),
            Err(e) => PendingOp::ready("net.setOption", Err(e)),
        }
    }

    pub fn send_to(&self, handle: Handle, data: Vec<u8>, target: SocketAddr) -> PendingOp<usize> {
        let resource = match self.resource(handle) {
            Ok(resource) => resource,
            Err(e) => return PendingOp::ready("net.sendTo", Err(e)),
        };
        let ticket = match resource.as_datagram() {
            Ok(socket) => socket.send_ticket(),
            Err(e) => return PendingOp::ready("net.sendTo", Err(e)),
        };
        self.spawn("net.sendTo", async move {
            let socket = resource.as_datagram()?;
            resource.guard(socket.send_to(ticket, &data, target)).await
        })
    }

    pub fn receive_from(&self, handle: Handle, max_len: usize) -> PendingOp<(Vec<u8>, SocketAddr)> {
        let max_len = self.read_limit(max_len);
        let resource = match self.resource(handle) {
            Ok(resource) => resource,
            Err(e) => return PendingOp::ready("net.receiveFrom", Err(e)),
        };
        let ticket = match resource.as_datagram() {
            Ok(socket) => socket.receive_ticket(),
            Err(e) => return PendingOp::ready("net.receiveFrom", Err(e)),
        };
        self.spawn("net.receiveFrom", async move {
            let socket = resource.as_datagram()?;
            resource.guard(socket.receive_from(ticket, max_len)).await
        })
    }

    /// Encrypt a connection in place. Resolves to the same handle, now a
    /// `TlsConnection`. If the handshake consumed the stream without
    /// producing a session, the handle is released.
    pub fn tls_upgrade(&self, handle: Handle, role: TlsRole, options: TlsOptions) -> PendingOp<Handle> {
        let resource = match self.resource(handle) {
            Ok(resource) => resource,
            Err(e) => return PendingOp::ready("net.tlsUpgrade", Err(e)),
        };
        let tickets = match resource.as_connection() {
            Ok(conn) => (conn.read_ticket(), conn.write_ticket()),
            Err(e) => return PendingOp::ready("net.tlsUpgrade", Err(e)),
        };
        let state = Arc::clone(&self.state);
        self.spawn("net.tlsUpgrade", async move {
            let conn = resource.as_connection()?;
            let handshake_timeout = state.config.timeouts.handshake();
            let table_state = Arc::clone(&state);
            let on_lost = move || {
                if table_state.table.remove(handle).is_ok() {
                    tracing::debug!(handle = %handle, "Connection discarded after failed TLS upgrade");
                }
            };
            let (read, write) = tickets;
            resource
                .guard(tls::upgrade(
                    conn,
                    read,
                    write,
                    &state.tls,
                    role,
                    &options,
                    handshake_timeout,
                    on_lost,
                ))
                .await?;
            Ok(handle)
        })
    }

    /// Handshake facts and session state of an encrypted connection.
    pub fn tls_info(&self, handle: Handle) -> NetResult<TlsInfo> {
        let resource = self.resource(handle)?;
        let conn = resource.as_connection()?;
        conn.tls_session()
            .map(|session| session.info())
            .ok_or_else(|| NetError::bad_resource(handle, "TLS connection"))
    }

    pub fn local_addr(&self, handle: Handle) -> NetResult<NetAddr> {
        let resource = self.resource(handle)?;
        Ok(resource.body().local_addr().clone())
    }

    pub fn peer_addr(&self, handle: Handle) -> NetResult<NetAddr> {
        let resource = self.resource(handle)?;
        Ok(resource.as_connection()?.peer_addr().clone())
    }

    /// Release a handle. Closing a handle that was already closed succeeds;
    /// a handle that was never issued is `InvalidHandle`.
    pub fn close(&self, handle: Handle) -> NetResult<()> {
        match self.state.table.remove(handle) {
            Ok(resource) => {
                tracing::debug!(handle = %handle, kind = %resource.kind(), "Closed");
                Ok(())
            }
            Err(_) if self.state.table.was_issued(handle) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Close every live resource. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let closed = self.state.table.close_all();
        tracing::info!(closed, "Closed all resources");
        closed
    }
}

fn parse_socket_addr(addr: &str) -> NetResult<SocketAddr> {
    addr.parse()
        .map_err(|_| NetError::invalid_argument(format!("invalid socket address: {addr}")))
}
