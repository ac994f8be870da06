//! TLS upgrade layer.
//!
//! # Data Flow
//! ```text
//! upgrade(connection, role, options)
//!     → config.rs (rustls client/server config; server identity checked
//!       before the stream is touched)
//!     → connection.detach (waits behind earlier reads/writes, holds later ones)
//!     → tokio-rustls handshake, bounded by the handshake timeout
//!     → session.rs (Established + handshake facts)
//!     → connection.reattach (encrypted halves; queued ops resume)
//! ```
//!
//! # Design Decisions
//! - The connection keeps its handle; its kind becomes `TlsConnection`
//! - A failed or abandoned handshake has consumed the raw stream; the
//!   caller's `on_lost` hook discards the connection
//! - Unflushed ciphertext is held by the rustls record layer; every write
//!   flushes, so record boundaries survive short OS writes

pub mod config;
pub mod session;
pub mod verify;

use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{ErrorKind, NetError, NetResult};
use crate::net::stream::{self, TlsIo};
use crate::net::{Connection, ReadSide, WriteSide};
use crate::resource::Ticket;

pub use config::{server_name_for, TlsContext, TlsOptions, TlsRole};
pub use session::{HandshakeInfo, TlsInfo, TlsSession, TlsState};

/// Runs its callback on drop unless disarmed.
struct OnLost<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> OnLost<F> {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl<F: FnOnce()> Drop for OnLost<F> {
    fn drop(&mut self) {
        if let Some(lost) = self.0.take() {
            lost();
        }
    }
}

enum Handshake {
    Client(Arc<rustls::ClientConfig>, rustls::pki_types::ServerName<'static>),
    Server(Arc<rustls::ServerConfig>),
}

/// Run a TLS handshake over `conn` and switch it to encrypted I/O.
///
/// `read` and `write` are the connection's queue tickets, taken when the
/// upgrade was issued. `on_lost` runs once the raw stream has been handed
/// to the handshake and no session comes back: on failure, on timeout, or
/// when this future is dropped mid-handshake. It runs before queued ops on
/// the connection are released.
#[allow(clippy::too_many_arguments)]
pub async fn upgrade<L>(
    conn: &Connection,
    read: Ticket<ReadSide>,
    write: Ticket<WriteSide>,
    ctx: &TlsContext,
    role: TlsRole,
    options: &TlsOptions,
    handshake_timeout: Duration,
    on_lost: L,
) -> NetResult<Arc<TlsSession>>
where
    L: FnOnce(),
{
    if conn.tls_session().is_some() {
        return Err(NetError::invalid_argument("connection is already encrypted"));
    }
    let plan = match role {
        TlsRole::Client => {
            let peer_ip = conn.peer_addr().as_inet().map(|addr| addr.ip());
            Handshake::Client(
                ctx.client_config(options)?,
                server_name_for(options, peer_ip)?,
            )
        }
        TlsRole::Server => Handshake::Server(ctx.server_config(options)?),
    };

    let (read_guard, write_guard, raw) = conn.detach(read, write).await?;
    // Declared after the guards so it fires before they release.
    let lost = OnLost(Some(on_lost));

    let session = Arc::new(TlsSession::new(role));
    session.start_handshake();
    tracing::debug!(role = ?role, peer = %conn.peer_addr(), "TLS handshake started");

    let handshake = async {
        match plan {
            Handshake::Client(config, server_name) => TlsConnector::from(config)
                .connect(server_name, raw)
                .await
                .map(TlsIo::from),
            Handshake::Server(config) => TlsAcceptor::from(config)
                .accept(raw)
                .await
                .map(TlsIo::from),
        }
    };

    let tls = match tokio::time::timeout(handshake_timeout, handshake).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            session.fail();
            let reason = verify::classify_handshake_error(&e);
            tracing::debug!(role = ?role, reason = %reason, error = %e, "TLS handshake failed");
            return Err(NetError::handshake(reason, e.to_string()));
        }
        Err(_) => {
            session.fail();
            return Err(NetError::new(
                ErrorKind::Timeout,
                format!("TLS handshake timed out after {handshake_timeout:?}"),
            ));
        }
    };

    let info = HandshakeInfo::capture(role, &tls, options.server_name.clone());
    tracing::debug!(
        role = ?role,
        alpn = ?info.alpn_protocol,
        version = ?info.protocol_version,
        "TLS session established"
    );
    session.established(info);
    conn.attach_tls(Arc::clone(&session))?;
    lost.disarm();
    Connection::reattach(read_guard, write_guard, stream::split_tls(tls));
    Ok(session)
}
