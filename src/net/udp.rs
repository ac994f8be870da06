//! Datagram sockets.
//!
//! No handshake, no ordering or delivery guarantees beyond the OS's. Sends and
//! receives are queued separately, each in issue order.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::NetResult;
use crate::net::NetAddr;
use crate::resource::{Ordered, Ticket};

pub struct DatagramSocket {
    socket: UdpSocket,
    local_addr: NetAddr,
    sends: Ordered<()>,
    receives: Ordered<()>,
}

impl DatagramSocket {
    pub fn new(socket: UdpSocket) -> NetResult<Self> {
        let local_addr = NetAddr::Inet(socket.local_addr()?);
        Ok(Self {
            socket,
            local_addr,
            sends: Ordered::new(()),
            receives: Ordered::new(()),
        })
    }

    pub fn bind(addr: SocketAddr, reuse_address: bool) -> NetResult<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(reuse_address)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SockAddr::from(addr))?;

        let socket = UdpSocket::from_std(socket.into())?;
        let bound = Self::new(socket)?;
        tracing::info!(address = %bound.local_addr, "UDP socket bound");
        Ok(bound)
    }

    pub fn local_addr(&self) -> &NetAddr {
        &self.local_addr
    }

    pub(crate) fn socket_ref(&self) -> socket2::SockRef<'_> {
        socket2::SockRef::from(&self.socket)
    }

    pub fn send_ticket(&self) -> Ticket<()> {
        self.sends.ticket()
    }

    pub fn receive_ticket(&self) -> Ticket<()> {
        self.receives.ticket()
    }

    pub async fn send_to(&self, ticket: Ticket<()>, data: &[u8], target: SocketAddr) -> NetResult<usize> {
        let _turn = ticket.acquire().await;
        let sent = self.socket.send_to(data, target).await?;
        tracing::trace!(target = %target, bytes = sent, "Datagram sent");
        Ok(sent)
    }

    /// Receive one datagram. Bytes past `max_len` are discarded.
    pub async fn receive_from(&self, ticket: Ticket<()>, max_len: usize) -> NetResult<(Vec<u8>, SocketAddr)> {
        let _turn = ticket.acquire().await;
        let mut buf = vec![0u8; max_len];
        let (n, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, from))
    }
}
