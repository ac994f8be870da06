//! Byte-stream plumbing shared by TCP, Unix and TLS connections.
//!
//! A connection lives split into a read part and a write part so the two
//! directions can be driven and shut down independently. Plain streams use
//! Tokio's owned halves; TLS streams use `tokio::io::split` because the
//! record layer state is shared between directions.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::tcp;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::{unix, UnixStream};

use crate::error::{NetError, NetResult};

/// Unencrypted transport under a connection.
pub enum RawStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// A TLS session over a raw stream.
pub type TlsIo = tokio_rustls::TlsStream<RawStream>;

impl AsyncRead for RawStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RawStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            RawStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Read direction of a connection.
pub enum ReadPart {
    Tcp(tcp::OwnedReadHalf),
    #[cfg(unix)]
    Unix(unix::OwnedReadHalf),
    Tls(ReadHalf<TlsIo>),
}

/// Write direction of a connection.
pub enum WritePart {
    Tcp(tcp::OwnedWriteHalf),
    #[cfg(unix)]
    Unix(unix::OwnedWriteHalf),
    Tls(WriteHalf<TlsIo>),
}

impl AsyncRead for ReadPart {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ReadPart::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            ReadPart::Unix(s) => Pin::new(s).poll_read(cx, buf),
            ReadPart::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WritePart {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            WritePart::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            WritePart::Unix(s) => Pin::new(s).poll_write(cx, buf),
            WritePart::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WritePart::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            WritePart::Unix(s) => Pin::new(s).poll_flush(cx),
            WritePart::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WritePart::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            WritePart::Unix(s) => Pin::new(s).poll_shutdown(cx),
            WritePart::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Split an unencrypted stream into independent halves.
pub fn split_raw(stream: RawStream) -> (ReadPart, WritePart) {
    match stream {
        RawStream::Tcp(s) => {
            let (r, w) = s.into_split();
            (ReadPart::Tcp(r), WritePart::Tcp(w))
        }
        #[cfg(unix)]
        RawStream::Unix(s) => {
            let (r, w) = s.into_split();
            (ReadPart::Unix(r), WritePart::Unix(w))
        }
    }
}

pub fn split_tls(stream: TlsIo) -> (ReadPart, WritePart) {
    let (r, w) = tokio::io::split(stream);
    (ReadPart::Tls(r), WritePart::Tls(w))
}

/// Put the raw stream back together, e.g. to hand it to a TLS handshake.
///
/// Fails for halves that belong to different streams or to a TLS session.
pub fn reunite_raw(read: ReadPart, write: WritePart) -> NetResult<RawStream> {
    match (read, write) {
        (ReadPart::Tcp(r), WritePart::Tcp(w)) => r
            .reunite(w)
            .map(RawStream::Tcp)
            .map_err(|_| NetError::internal("tcp halves belong to different streams")),
        #[cfg(unix)]
        (ReadPart::Unix(r), WritePart::Unix(w)) => r
            .reunite(w)
            .map(RawStream::Unix)
            .map_err(|_| NetError::internal("unix halves belong to different streams")),
        (ReadPart::Tls(_), WritePart::Tls(_)) => {
            Err(NetError::invalid_argument("connection is already encrypted"))
        }
        _ => Err(NetError::internal("mismatched connection halves")),
    }
}
