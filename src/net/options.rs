//! Recognized socket options.

use std::time::Duration;

use serde_json::Value;
use socket2::{Socket, TcpKeepalive};

use crate::error::{NetError, NetResult};
use crate::net::Transport;
use crate::resource::{Resource, ResourceBody, ResourceKind};

/// A socket option and the value to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    /// Disable send coalescing (Nagle).
    NoDelay(bool),
    /// Periodic liveness probes at the given interval; `None` disables them.
    KeepAlive(Option<Duration>),
    /// Allow binding to an address still in time-wait.
    ReuseAddress(bool),
    /// Allow sending to broadcast addresses.
    Broadcast(bool),
}

impl SocketOption {
    /// Parse an option from its wire name and a dynamic value.
    ///
    /// `keep_alive` takes `true`/`false` or an interval in seconds; `true`
    /// uses `default_keepalive`.
    pub fn parse(name: &str, value: &Value, default_keepalive: Duration) -> NetResult<Self> {
        let flag = |v: &Value| {
            v.as_bool()
                .ok_or_else(|| NetError::invalid_argument(format!("option {name} expects a boolean")))
        };
        match name {
            "no_delay" | "noDelay" => Ok(SocketOption::NoDelay(flag(value)?)),
            "reuse_address" | "reuseAddress" => Ok(SocketOption::ReuseAddress(flag(value)?)),
            "broadcast" => Ok(SocketOption::Broadcast(flag(value)?)),
            "keep_alive" | "keepAlive" => match value {
                Value::Bool(true) => Ok(SocketOption::KeepAlive(Some(default_keepalive))),
                Value::Bool(false) => Ok(SocketOption::KeepAlive(None)),
                Value::Number(n) => match n.as_u64() {
                    Some(secs) if secs > 0 => Ok(SocketOption::KeepAlive(Some(Duration::from_secs(secs)))),
                    _ => Err(NetError::invalid_argument(
                        "keep_alive interval must be a positive number of seconds",
                    )),
                },
                _ => Err(NetError::invalid_argument(
                    "keep_alive expects a boolean or an interval in seconds",
                )),
            },
            other => Err(NetError::invalid_argument(format!("unknown socket option: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SocketOption::NoDelay(_) => "no_delay",
            SocketOption::KeepAlive(_) => "keep_alive",
            SocketOption::ReuseAddress(_) => "reuse_address",
            SocketOption::Broadcast(_) => "broadcast",
        }
    }

    fn applies_to(&self, kind: ResourceKind, transport: Option<Transport>) -> bool {
        let tcp_stream = matches!(
            kind,
            ResourceKind::TcpConnection | ResourceKind::TlsConnection
        ) && transport == Some(Transport::Tcp);
        match self {
            SocketOption::NoDelay(_) | SocketOption::KeepAlive(_) => tcp_stream,
            SocketOption::ReuseAddress(_) => {
                tcp_stream || matches!(kind, ResourceKind::TcpListener | ResourceKind::UdpSocket)
            }
            SocketOption::Broadcast(_) => kind == ResourceKind::UdpSocket,
        }
    }

    fn apply_to(&self, socket: &Socket) -> std::io::Result<()> {
        match *self {
            SocketOption::NoDelay(on) => socket.set_nodelay(on),
            SocketOption::KeepAlive(None) => socket.set_keepalive(false),
            SocketOption::KeepAlive(Some(interval)) => {
                let keepalive = TcpKeepalive::new().with_time(interval);
                #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", windows))]
                let keepalive = keepalive.with_interval(interval);
                socket.set_tcp_keepalive(&keepalive)
            }
            SocketOption::ReuseAddress(on) => socket.set_reuse_address(on),
            SocketOption::Broadcast(on) => socket.set_broadcast(on),
        }
    }
}

/// Set `option` on the live socket behind `resource`.
pub fn set_option(resource: &Resource, option: SocketOption) -> NetResult<()> {
    let kind = resource.kind();
    let transport = match resource.body() {
        ResourceBody::Connection(conn) => Some(conn.transport()),
        _ => None,
    };
    if !option.applies_to(kind, transport) {
        return Err(NetError::bad_resource(
            resource.handle(),
            &format!("socket supporting {}", option.name()),
        ));
    }

    match resource.body() {
        ResourceBody::Connection(conn) => option.apply_to(conn.control())?,
        ResourceBody::Listener(listener) => option.apply_to(&listener.socket_ref())?,
        ResourceBody::Datagram(socket) => option.apply_to(&socket.socket_ref())?,
    }
    tracing::debug!(handle = %resource.handle(), option = ?option, "Socket option set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    const DEFAULT: Duration = Duration::from_secs(75);

    #[test]
    fn parses_recognized_options() {
        assert_eq!(
            SocketOption::parse("no_delay", &json!(true), DEFAULT).unwrap(),
            SocketOption::NoDelay(true)
        );
        assert_eq!(
            SocketOption::parse("keep_alive", &json!(true), DEFAULT).unwrap(),
            SocketOption::KeepAlive(Some(DEFAULT))
        );
        assert_eq!(
            SocketOption::parse("keepAlive", &json!(30), DEFAULT).unwrap(),
            SocketOption::KeepAlive(Some(Duration::from_secs(30)))
        );
        assert_eq!(
            SocketOption::parse("broadcast", &json!(false), DEFAULT).unwrap(),
            SocketOption::Broadcast(false)
        );
    }

    #[test]
    fn rejects_unknown_options_and_bad_values() {
        let err = SocketOption::parse("so_linger", &json!(1), DEFAULT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = SocketOption::parse("no_delay", &json!("yes"), DEFAULT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = SocketOption::parse("keep_alive", &json!(0), DEFAULT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn applicability_follows_resource_kind() {
        let nodelay = SocketOption::NoDelay(true);
        assert!(nodelay.applies_to(ResourceKind::TcpConnection, Some(Transport::Tcp)));
        assert!(nodelay.applies_to(ResourceKind::TlsConnection, Some(Transport::Tcp)));
        assert!(!nodelay.applies_to(ResourceKind::TlsConnection, Some(Transport::Unix)));
        assert!(!nodelay.applies_to(ResourceKind::UdpSocket, None));

        let broadcast = SocketOption::Broadcast(true);
        assert!(broadcast.applies_to(ResourceKind::UdpSocket, None));
        assert!(!broadcast.applies_to(ResourceKind::TcpListener, None));
    }
}
