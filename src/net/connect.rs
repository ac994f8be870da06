//! Outbound connection establishment.
//!
//! Candidates are attempted strictly in order, one at a time. A refused,
//! reset or timed-out attempt is not fatal; the loop moves on and only the
//! last attempt's error is reported when every candidate fails.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::Path;
use std::time::Duration;

use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::error::{NetError, NetResult};
use crate::net::Connection;
use crate::resolver::AddressCandidate;

/// Try `attempt` against each candidate until one succeeds.
///
/// Returns the established value and the candidate that produced it.
/// Candidates after the first success are never attempted.
pub async fn connect_in_order<T, F, Fut>(
    candidates: &[AddressCandidate],
    attempt_timeout: Duration,
    mut attempt: F,
) -> NetResult<(T, AddressCandidate)>
where
    F: FnMut(SocketAddr) -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut last_error = None;

    for (i, candidate) in candidates.iter().enumerate() {
        match timeout(attempt_timeout, attempt(candidate.addr)).await {
            Ok(Ok(value)) => {
                tracing::debug!(candidate_idx = i, addr = %candidate.addr, "Connected");
                return Ok((value, *candidate));
            }
            Ok(Err(e)) => {
                tracing::debug!(candidate_idx = i, addr = %candidate.addr, error = %e, "Connect failed, trying next candidate");
                last_error = Some(NetError::from(e));
            }
            Err(_) => {
                tracing::debug!(candidate_idx = i, addr = %candidate.addr, "Connect timed out, trying next candidate");
                last_error = Some(NetError::timeout(&format!("connect to {}", candidate.addr)));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| NetError::invalid_argument("no address candidates to connect to")))
}

/// Open a TCP connection to the first reachable candidate.
pub async fn connect_tcp(
    candidates: &[AddressCandidate],
    attempt_timeout: Duration,
) -> NetResult<Connection> {
    let (stream, _) = connect_in_order(candidates, attempt_timeout, TcpStream::connect).await?;
    Connection::from_tcp(stream)
}

#[cfg(unix)]
pub async fn connect_unix(path: &Path) -> NetResult<Connection> {
    let stream = UnixStream::connect(path).await?;
    Connection::from_unix(stream)
}
