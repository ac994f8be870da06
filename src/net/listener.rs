//! Listener resources.
//!
//! # Responsibilities
//! - Bind with an explicit backlog through socket2
//! - Accept incoming connections in issue order
//! - Stay usable after a cancelled accept

use std::net::SocketAddr;
#[cfg(unix)]
use std::path::Path;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

use crate::error::NetResult;
use crate::net::{Connection, NetAddr};
use crate::resource::{Ordered, ResourceKind, Ticket};

enum ListenerIo {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// A bound, listening socket.
pub struct NetListener {
    io: ListenerIo,
    local_addr: NetAddr,
    accepts: Ordered<()>,
}

impl NetListener {
    /// Bind a TCP listener.
    pub fn bind_tcp(addr: SocketAddr, backlog: u32, reuse_address: bool) -> NetResult<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        // Windows SO_REUSEADDR means something else entirely.
        #[cfg(unix)]
        socket.set_reuse_address(reuse_address)?;
        #[cfg(not(unix))]
        let _ = reuse_address;
        socket.set_nonblocking(true)?;
        socket.bind(&SockAddr::from(addr))?;
        socket.listen(clamp_backlog(backlog))?;

        let listener = TcpListener::from_std(socket.into())?;
        let local_addr = listener.local_addr()?;
        tracing::info!(address = %local_addr, backlog, "TCP listener bound");

        Ok(Self {
            io: ListenerIo::Tcp(listener),
            local_addr: NetAddr::Inet(local_addr),
            accepts: Ordered::new(()),
        })
    }

    /// Bind a Unix-domain stream listener.
    #[cfg(unix)]
    pub fn bind_unix(path: &Path, backlog: u32) -> NetResult<Self> {
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SockAddr::unix(path)?)?;
        socket.listen(clamp_backlog(backlog))?;

        let std_listener: std::os::unix::net::UnixListener = socket.into();
        let listener = UnixListener::from_std(std_listener)?;
        let local_addr = NetAddr::from_unix(&listener.local_addr()?);
        tracing::info!(path = %path.display(), backlog, "Unix listener bound");

        Ok(Self {
            io: ListenerIo::Unix(listener),
            local_addr,
            accepts: Ordered::new(()),
        })
    }

    pub fn kind(&self) -> ResourceKind {
        match self.io {
            ListenerIo::Tcp(_) => ResourceKind::TcpListener,
            #[cfg(unix)]
            ListenerIo::Unix(_) => ResourceKind::UnixListener,
        }
    }

    pub fn local_addr(&self) -> &NetAddr {
        &self.local_addr
    }

    pub(crate) fn socket_ref(&self) -> socket2::SockRef<'_> {
        match &self.io {
            ListenerIo::Tcp(l) => socket2::SockRef::from(l),
            #[cfg(unix)]
            ListenerIo::Unix(l) => socket2::SockRef::from(l),
        }
    }

    pub fn accept_ticket(&self) -> Ticket<()> {
        self.accepts.ticket()
    }

    /// Wait for the next peer.
    ///
    /// Cancel-safe: dropping the future leaves the listener ready for the
    /// next accept and loses no pending connection.
    pub async fn accept(&self, ticket: Ticket<()>) -> NetResult<(Connection, NetAddr)> {
        let _turn = ticket.acquire().await;
        match &self.io {
            ListenerIo::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                tracing::debug!(peer_addr = %peer, "Connection accepted");
                Ok((Connection::from_tcp(stream)?, NetAddr::Inet(peer)))
            }
            #[cfg(unix)]
            ListenerIo::Unix(listener) => {
                let (stream, peer) = listener.accept().await?;
                let peer = NetAddr::from_unix(&peer);
                tracing::debug!(peer_addr = %peer, "Unix connection accepted");
                Ok((Connection::from_unix(stream)?, peer))
            }
        }
    }
}

fn clamp_backlog(backlog: u32) -> i32 {
    i32::try_from(backlog.max(1)).unwrap_or(i32::MAX)
}
