//! Socket driver subsystem.
//!
//! # Data Flow
//! ```text
//! listen(kind, addr, backlog)
//!     → listener.rs (socket2 bind/listen, Tokio listener)
//! accept(listener)
//!     → connection.rs (split halves, control socket)
//! connect(candidates | path)
//!     → connect.rs (ordered candidate loop, per-attempt timeout)
//!     → connection.rs
//! bind(udp addr)
//!     → udp.rs (datagram socket, sendTo/receiveFrom)
//! setOption(handle, option)
//!     → options.rs (socket2 on the live descriptor)
//! ```
//!
//! # Design Decisions
//! - Every driver op takes a queue ticket up front to keep issue order
//! - No driver ever blocks a worker; readiness comes from Tokio's reactor

pub mod connect;
pub mod connection;
pub mod listener;
pub mod options;
pub mod stream;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Serialize;

pub use connect::{connect_in_order, connect_tcp};
#[cfg(unix)]
pub use connect::connect_unix;
pub use connection::{Connection, Half, ReadOutcome, ReadSide, Transport, WriteSide};
pub use listener::NetListener;
pub use options::SocketOption;
pub use udp::DatagramSocket;

/// Address of either end of a socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NetAddr {
    Inet(SocketAddr),
    /// Unnamed Unix sockets have no path.
    Unix(Option<PathBuf>),
}

impl NetAddr {
    #[cfg(unix)]
    pub(crate) fn from_unix(addr: &tokio::net::unix::SocketAddr) -> Self {
        NetAddr::Unix(addr.as_pathname().map(|p| p.to_path_buf()))
    }

    pub fn as_inet(&self) -> Option<SocketAddr> {
        match self {
            NetAddr::Inet(addr) => Some(*addr),
            NetAddr::Unix(_) => None,
        }
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetAddr::Inet(addr) => write!(f, "{addr}"),
            NetAddr::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            NetAddr::Unix(None) => write!(f, "unix:(unnamed)"),
        }
    }
}
