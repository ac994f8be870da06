//! Connection resources with independently closable halves.
//!
//! # Responsibilities
//! - Own the split read/write parts of a byte stream
//! - Serialize ops per half in issue order
//! - Track half-close state; report when both halves are down
//! - Keep a control socket for options and read-side shutdown
//!
//! # Half-close
//! ```text
//! Open ──shutdown(read)──▶ ReadClosed ──shutdown(write)──▶ Closed
//!   └──shutdown(write)──▶ WriteClosed ──shutdown(read)──▶ Closed
//! ```
//! Reaching `Closed` finalizes the resource.

use std::net::Shutdown;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::{ErrorKind, NetError, NetResult};
use crate::net::stream::{self, RawStream, ReadPart, WritePart};
use crate::net::NetAddr;
use crate::resource::{Ordered, OrderedGuard, ResourceKind, Ticket};
use crate::tls::TlsSession;

const READ_CLOSED: u8 = 0b01;
const WRITE_CLOSED: u8 = 0b10;

/// Transport under a connection, independent of encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Unix,
}

/// Which direction(s) to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Half {
    Read,
    Write,
    Both,
}

/// Result of a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadOutcome {
    Data(Vec<u8>),
    Eof,
}

impl ReadOutcome {
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            ReadOutcome::Data(bytes) => Some(bytes),
            ReadOutcome::Eof => None,
        }
    }
}

pub struct ReadSide {
    pub(crate) io: Option<ReadPart>,
    pub(crate) shut: bool,
}

pub struct WriteSide {
    pub(crate) io: Option<WritePart>,
    pub(crate) shut: bool,
}

/// A connected byte stream.
pub struct Connection {
    transport: Transport,
    /// Duplicate descriptor of the same socket, for options and shutdown.
    control: socket2::Socket,
    local_addr: NetAddr,
    peer_addr: NetAddr,
    read: Ordered<ReadSide>,
    write: Ordered<WriteSide>,
    closed_halves: AtomicU8,
    tls: OnceLock<Arc<TlsSession>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport)
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn from_tcp(stream: TcpStream) -> NetResult<Self> {
        let control = socket2::SockRef::from(&stream).try_clone()?;
        let local_addr = NetAddr::Inet(stream.local_addr()?);
        let peer_addr = NetAddr::Inet(stream.peer_addr()?);
        Ok(Self::assemble(
            Transport::Tcp,
            control,
            local_addr,
            peer_addr,
            RawStream::Tcp(stream),
        ))
    }

    #[cfg(unix)]
    pub fn from_unix(stream: UnixStream) -> NetResult<Self> {
        let control = socket2::SockRef::from(&stream).try_clone()?;
        let local_addr = NetAddr::from_unix(&stream.local_addr()?);
        let peer_addr = NetAddr::from_unix(&stream.peer_addr()?);
        Ok(Self::assemble(
            Transport::Unix,
            control,
            local_addr,
            peer_addr,
            RawStream::Unix(stream),
        ))
    }

    fn assemble(
        transport: Transport,
        control: socket2::Socket,
        local_addr: NetAddr,
        peer_addr: NetAddr,
        raw: RawStream,
    ) -> Self {
        let (r, w) = stream::split_raw(raw);
        Self {
            transport,
            control,
            local_addr,
            peer_addr,
            read: Ordered::new(ReadSide {
                io: Some(r),
                shut: false,
            }),
            write: Ordered::new(WriteSide {
                io: Some(w),
                shut: false,
            }),
            closed_halves: AtomicU8::new(0),
            tls: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match (self.tls.get(), self.transport) {
            (Some(_), _) => ResourceKind::TlsConnection,
            (None, Transport::Tcp) => ResourceKind::TcpConnection,
            (None, Transport::Unix) => ResourceKind::UnixConnection,
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn local_addr(&self) -> &NetAddr {
        &self.local_addr
    }

    pub fn peer_addr(&self) -> &NetAddr {
        &self.peer_addr
    }

    pub(crate) fn control(&self) -> &socket2::Socket {
        &self.control
    }

    pub fn tls_session(&self) -> Option<&Arc<TlsSession>> {
        self.tls.get()
    }

    pub(crate) fn attach_tls(&self, session: Arc<TlsSession>) -> NetResult<()> {
        self.tls
            .set(session)
            .map_err(|_| NetError::invalid_argument("connection is already encrypted"))
    }

    /// Reserve a place in the read queue.
    pub fn read_ticket(&self) -> Ticket<ReadSide> {
        self.read.ticket()
    }

    /// Reserve a place in the write queue.
    pub fn write_ticket(&self) -> Ticket<WriteSide> {
        self.write.ticket()
    }

    pub async fn read(&self, ticket: Ticket<ReadSide>, max_len: usize) -> NetResult<ReadOutcome> {
        let mut side = ticket.acquire().await;
        if side.shut {
            return Ok(ReadOutcome::Eof);
        }
        let io = side
            .io
            .as_mut()
            .ok_or_else(lost_stream)?;

        let mut buf = vec![0u8; max_len];
        let n = io.read(&mut buf).await.map_err(|e| self.io_error(e))?;
        if n == 0 && max_len > 0 {
            return Ok(ReadOutcome::Eof);
        }
        buf.truncate(n);
        Ok(ReadOutcome::Data(buf))
    }

    /// Write once. May accept fewer bytes than offered.
    pub async fn write(&self, ticket: Ticket<WriteSide>, data: &[u8]) -> NetResult<usize> {
        let mut side = ticket.acquire().await;
        if side.shut {
            return Err(NetError::new(ErrorKind::BrokenPipe, "write half is shut down"));
        }
        let io = side
            .io
            .as_mut()
            .ok_or_else(lost_stream)?;

        let written = io.write(data).await.map_err(|e| self.io_error(e))?;
        // Pushes out ciphertext the record layer is still holding.
        io.flush().await.map_err(|e| self.io_error(e))?;
        Ok(written)
    }

    /// Shut down one direction. Idempotent.
    ///
    /// Returns true once both halves are closed.
    pub async fn shutdown_read(&self, ticket: Ticket<ReadSide>) -> NetResult<bool> {
        let mut side = ticket.acquire().await;
        if !side.shut {
            match self.control.shutdown(Shutdown::Read) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {}
                Err(e) => return Err(e.into()),
            }
            side.shut = true;
        }
        Ok(self.mark_half_closed(READ_CLOSED))
    }

    pub async fn shutdown_write(&self, ticket: Ticket<WriteSide>) -> NetResult<bool> {
        let mut side = ticket.acquire().await;
        if !side.shut {
            if let Some(session) = self.tls.get() {
                session.begin_closing();
            }
            if let Some(io) = side.io.as_mut() {
                match io.shutdown().await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {}
                    Err(e) => return Err(self.io_error(e)),
                }
            }
            side.shut = true;
        }
        Ok(self.mark_half_closed(WRITE_CLOSED))
    }

    fn mark_half_closed(&self, bit: u8) -> bool {
        let closed = self.closed_halves.fetch_or(bit, Ordering::AcqRel) | bit;
        let both = closed == READ_CLOSED | WRITE_CLOSED;
        if both {
            if let Some(session) = self.tls.get() {
                session.finish_closing();
            }
        }
        both
    }

    pub fn is_fully_closed(&self) -> bool {
        self.closed_halves.load(Ordering::Acquire) == READ_CLOSED | WRITE_CLOSED
    }

    /// Take both halves out and reunite the raw stream.
    ///
    /// Used by the TLS upgrade; the guards keep every other op on this
    /// connection queued until the halves are put back.
    pub(crate) async fn detach(
        &self,
        read: Ticket<ReadSide>,
        write: Ticket<WriteSide>,
    ) -> NetResult<(OrderedGuard<ReadSide>, OrderedGuard<WriteSide>, RawStream)> {
        let mut read = read.acquire().await;
        let mut write = write.acquire().await;
        if read.shut || write.shut {
            return Err(NetError::new(
                ErrorKind::NotConnected,
                "cannot upgrade a half-closed connection",
            ));
        }
        let (Some(r), Some(w)) = (read.io.take(), write.io.take()) else {
            return Err(NetError::internal("connection halves are detached"));
        };
        let raw = stream::reunite_raw(r, w)?;
        Ok((read, write, raw))
    }

    /// Put new halves in place after `detach`.
    pub(crate) fn reattach(
        mut read: OrderedGuard<ReadSide>,
        mut write: OrderedGuard<WriteSide>,
        parts: (ReadPart, WritePart),
    ) {
        read.io = Some(parts.0);
        write.io = Some(parts.1);
    }

    fn io_error(&self, err: std::io::Error) -> NetError {
        if let Some(session) = self.tls.get() {
            if let Some(record_err) = session.record_error(&err) {
                return record_err;
            }
        }
        NetError::from(err)
    }
}

fn lost_stream() -> NetError {
    NetError::new(
        ErrorKind::NotConnected,
        "connection stream was lost in an interrupted TLS upgrade",
    )
}
