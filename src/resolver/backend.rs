//! Lookup strategies behind the resolver.
//!
//! # Strategies
//! - `HickoryBackend`: the configured DNS resolver (explicit nameservers or
//!   the system's resolv.conf), queried per record type
//! - `SystemBackend`: the platform resolver (`getaddrinfo`), which also
//!   consults the hosts file; used as the secondary strategy
//! - `StaticBackend`: a fixed host table

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hickory_resolver::config::{
    NameServerConfig, NameServerConfigGroup, Protocol, ResolverConfig, ResolverOpts,
};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::RecordType as DnsRecordType;
use hickory_resolver::TokioAsyncResolver;

use crate::config::ResolverSettings;
use crate::error::{ErrorKind, NetError, NetResult};
use crate::resolver::RecordType;

/// A way of turning a hostname into addresses of one record type.
pub trait LookupBackend: Send + Sync {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Look up `host`. An answer with no addresses is `NameNotFound`.
    fn lookup(&self, host: String, record: RecordType) -> BoxFuture<'static, NetResult<Vec<IpAddr>>>;
}

/// DNS resolution through hickory.
#[derive(Clone)]
pub struct HickoryBackend {
    resolver: TokioAsyncResolver,
}

impl HickoryBackend {
    pub fn from_settings(settings: &ResolverSettings) -> NetResult<Self> {
        let (config, mut opts) = if settings.nameservers.is_empty() {
            hickory_resolver::system_conf::read_system_conf().map_err(|e| {
                NetError::new(
                    ErrorKind::ResolverUnavailable,
                    format!("failed to read system resolver configuration: {e}"),
                )
            })?
        } else {
            let mut servers = Vec::with_capacity(settings.nameservers.len() * 2);
            for server in &settings.nameservers {
                let addr = parse_nameserver(server)?;
                servers.push(NameServerConfig::new(addr, Protocol::Udp));
                servers.push(NameServerConfig::new(addr, Protocol::Tcp));
            }
            let group = NameServerConfigGroup::from(servers);
            (ResolverConfig::from_parts(None, vec![], group), ResolverOpts::default())
        };
        opts.timeout = Duration::from_millis(settings.timeout_ms);
        opts.attempts = settings.attempts;

        Ok(Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        })
    }
}

impl LookupBackend for HickoryBackend {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn lookup(&self, host: String, record: RecordType) -> BoxFuture<'static, NetResult<Vec<IpAddr>>> {
        let resolver = self.resolver.clone();
        async move {
            let record_type = match record {
                RecordType::A => DnsRecordType::A,
                RecordType::Aaaa => DnsRecordType::AAAA,
            };
            let lookup = resolver
                .lookup(host.as_str(), record_type)
                .await
                .map_err(|e| map_resolve_error(&host, e))?;
            let addrs: Vec<IpAddr> = lookup.iter().filter_map(|rdata| rdata.ip_addr()).collect();
            non_empty(&host, addrs)
        }
        .boxed()
    }
}

fn map_resolve_error(host: &str, err: ResolveError) -> NetError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => {
            NetError::new(ErrorKind::NameNotFound, format!("no records found for {host}"))
        }
        ResolveErrorKind::Timeout => {
            NetError::new(ErrorKind::Timeout, format!("lookup of {host} timed out"))
        }
        _ => NetError::new(
            ErrorKind::ResolverUnavailable,
            format!("lookup of {host} failed: {err}"),
        ),
    }
}

fn parse_nameserver(server: &str) -> NetResult<SocketAddr> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    server
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| NetError::invalid_argument(format!("invalid nameserver address: {server}")))
}

fn non_empty(host: &str, addrs: Vec<IpAddr>) -> NetResult<Vec<IpAddr>> {
    if addrs.is_empty() {
        Err(NetError::new(
            ErrorKind::NameNotFound,
            format!("no addresses found for {host}"),
        ))
    } else {
        Ok(addrs)
    }
}

/// The platform resolver, including the hosts file.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

impl LookupBackend for SystemBackend {
    fn name(&self) -> &'static str {
        "system"
    }

    fn lookup(&self, host: String, record: RecordType) -> BoxFuture<'static, NetResult<Vec<IpAddr>>> {
        async move {
            // getaddrinfo does not say why a name failed, so every failure
            // other than a timeout reads as "no such name".
            let resolved = tokio::net::lookup_host((host.as_str(), 0)).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::TimedOut {
                    NetError::new(ErrorKind::Timeout, format!("lookup of {host} timed out"))
                } else {
                    NetError::new(ErrorKind::NameNotFound, format!("lookup of {host} failed: {e}"))
                }
            })?;
            let addrs: Vec<IpAddr> = resolved
                .map(|addr| addr.ip())
                .filter(|ip| record.matches(ip))
                .collect();
            non_empty(&host, addrs)
        }
        .boxed()
    }
}

/// A fixed host table.
#[derive(Debug, Clone, Default)]
pub struct StaticBackend {
    hosts: Arc<HashMap<String, Vec<IpAddr>>>,
}

impl StaticBackend {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<IpAddr>)>,
        S: AsRef<str>,
    {
        let hosts = entries
            .into_iter()
            .map(|(host, addrs)| (host.as_ref().to_ascii_lowercase(), addrs))
            .collect();
        Self {
            hosts: Arc::new(hosts),
        }
    }
}

impl LookupBackend for StaticBackend {
    fn name(&self) -> &'static str {
        "static"
    }

    fn lookup(&self, host: String, record: RecordType) -> BoxFuture<'static, NetResult<Vec<IpAddr>>> {
        let addrs: Vec<IpAddr> = self
            .hosts
            .get(&host)
            .map(|addrs| addrs.iter().copied().filter(|ip| record.matches(ip)).collect())
            .unwrap_or_default();
        async move { non_empty(&host, addrs) }.boxed()
    }
}
