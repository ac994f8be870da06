//! Address resolution subsystem.
//!
//! # Data Flow
//! ```text
//! resolve(host, port, family?)
//!     → numeric literal? → single candidate, no lookup
//!     → per record type (A / AAAA):
//!         cache.rs hit? → addresses
//!         in-flight lookup for (host, type)? → join it
//!         otherwise start one: primary backend → on failure, fallback backend
//!     → order.rs (family filter or interleave) → candidates
//! ```
//!
//! # Design Decisions
//! - One outbound query per (host, record type) at a time; every concurrent
//!   caller completes from its single result
//! - Only successful answers are cached
//! - When both strategies fail, the primary's error is reported

pub mod backend;
pub mod cache;
pub mod order;

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;

use crate::config::ResolverSettings;
use crate::error::{ErrorKind, NetError, NetResult};
use crate::observability::metrics;

pub use backend::{HickoryBackend, LookupBackend, StaticBackend, SystemBackend};
pub use cache::DnsCache;
pub use order::{order_candidates, AddressCandidate, AddressFamily};

/// DNS record type of an address query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
}

impl RecordType {
    pub fn for_family(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => RecordType::A,
            AddressFamily::Ipv6 => RecordType::Aaaa,
        }
    }

    pub fn matches(&self, ip: &IpAddr) -> bool {
        matches!(
            (self, ip),
            (RecordType::A, IpAddr::V4(_)) | (RecordType::Aaaa, IpAddr::V6(_))
        )
    }
}

/// Identity of a lookup: normalized hostname plus record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub host: String,
    pub record: RecordType,
}

impl QueryKey {
    pub fn new(host: &str, record: RecordType) -> Self {
        Self {
            host: host.trim_end_matches('.').to_ascii_lowercase(),
            record,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.host, self.record)
    }
}

type SharedLookup = Shared<BoxFuture<'static, NetResult<Arc<Vec<IpAddr>>>>>;

struct ResolverInner {
    primary: Arc<dyn LookupBackend>,
    fallback: Option<Arc<dyn LookupBackend>>,
    cache: DnsCache,
    inflight: DashMap<QueryKey, SharedLookup>,
    first_family: AddressFamily,
}

/// Caching, coalescing hostname resolver.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<ResolverInner>,
}

impl Resolver {
    /// Build the configured resolver: hickory first, the system resolver as
    /// fallback when enabled.
    pub fn from_settings(settings: &ResolverSettings) -> NetResult<Self> {
        let primary: Arc<dyn LookupBackend> = Arc::new(HickoryBackend::from_settings(settings)?);
        let fallback: Option<Arc<dyn LookupBackend>> = if settings.system_fallback {
            Some(Arc::new(SystemBackend))
        } else {
            None
        };
        Ok(Self::with_backends(primary, fallback, settings))
    }

    pub fn with_backends(
        primary: Arc<dyn LookupBackend>,
        fallback: Option<Arc<dyn LookupBackend>>,
        settings: &ResolverSettings,
    ) -> Self {
        tracing::debug!(
            primary = primary.name(),
            fallback = fallback.as_ref().map(|b| b.name()),
            cache_ttl_secs = settings.cache_ttl_secs,
            "Resolver initialized"
        );
        Self {
            inner: Arc::new(ResolverInner {
                primary,
                fallback,
                cache: DnsCache::new(
                    Duration::from_secs(settings.cache_ttl_secs),
                    settings.max_cache_entries,
                ),
                inflight: DashMap::new(),
                first_family: settings.first_family,
            }),
        }
    }

    /// Resolve a numeric address literal without any lookup.
    pub fn resolve_literal(host: &str, port: u16) -> Option<AddressCandidate> {
        let trimmed = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        trimmed
            .parse::<IpAddr>()
            .ok()
            .map(|ip| AddressCandidate::new(SocketAddr::new(ip, port)))
    }

    /// Resolve `host` into ordered connection candidates.
    pub async fn resolve(
        &self,
        host: &str,
        port: u16,
        family: Option<AddressFamily>,
    ) -> NetResult<Vec<AddressCandidate>> {
        if let Some(candidate) = Self::resolve_literal(host, port) {
            return match family {
                Some(f) if f != candidate.family => Err(NetError::new(
                    ErrorKind::NameNotFound,
                    format!("{host} is not an {f:?} address"),
                )),
                _ => Ok(vec![candidate]),
            };
        }
        if host.is_empty() {
            return Err(NetError::invalid_argument("hostname is empty"));
        }

        let candidates = match family {
            Some(f) => {
                let addrs = self.query(QueryKey::new(host, RecordType::for_family(f))).await?;
                order_candidates(&addrs, &addrs, port, Some(f), self.inner.first_family)
            }
            None => {
                let (v4, v6) = tokio::join!(
                    self.query(QueryKey::new(host, RecordType::A)),
                    self.query(QueryKey::new(host, RecordType::Aaaa)),
                );
                let (v4, v6) = combine(v4, v6)?;
                order_candidates(&v4, &v6, port, None, self.inner.first_family)
            }
        };

        tracing::debug!(host, port, candidates = candidates.len(), "Resolved");
        Ok(candidates)
    }

    /// Addresses for one (host, record type), cached and coalesced.
    pub async fn query(&self, key: QueryKey) -> NetResult<Arc<Vec<IpAddr>>> {
        if let Some(addrs) = self.inner.cache.get(&key) {
            return Ok(addrs);
        }

        let lookup = match self.inner.inflight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                tracing::trace!(query = %key, "Joining in-flight lookup");
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                let inner = Arc::clone(&self.inner);
                let lookup = async move {
                    let result = inner.lookup_chain(&key).await;
                    if let Ok(addrs) = &result {
                        inner.cache.insert(key.clone(), Arc::clone(addrs));
                    }
                    inner.inflight.remove(&key);
                    result
                }
                .boxed()
                .shared();
                slot.insert(lookup.clone());
                lookup
            }
        };
        lookup.await
    }

    pub fn cache(&self) -> &DnsCache {
        &self.inner.cache
    }
}

impl ResolverInner {
    async fn lookup_chain(&self, key: &QueryKey) -> NetResult<Arc<Vec<IpAddr>>> {
        metrics::record_resolver_query(self.primary.name());
        let primary_err = match self.primary.lookup(key.host.clone(), key.record).await {
            Ok(addrs) => return Ok(Arc::new(addrs)),
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };
        tracing::debug!(
            query = %key,
            error = %primary_err,
            fallback = fallback.name(),
            "Primary lookup failed, trying fallback"
        );
        metrics::record_resolver_query(fallback.name());
        match fallback.lookup(key.host.clone(), key.record).await {
            Ok(addrs) => Ok(Arc::new(addrs)),
            Err(e) => {
                tracing::debug!(query = %key, error = %e, "Fallback lookup failed");
                Err(primary_err)
            }
        }
    }
}

/// Merge per-family answers. A family with no records is not an error as
/// long as the other family has some.
fn combine(
    v4: NetResult<Arc<Vec<IpAddr>>>,
    v6: NetResult<Arc<Vec<IpAddr>>>,
) -> NetResult<(Arc<Vec<IpAddr>>, Arc<Vec<IpAddr>>)> {
    match (v4, v6) {
        (Ok(v4), Ok(v6)) => Ok((v4, v6)),
        (Ok(v4), Err(_)) => Ok((v4, Arc::default())),
        (Err(_), Ok(v6)) => Ok((Arc::default(), v6)),
        (Err(a), Err(b)) => {
            // A transport failure says more than "no such name".
            if a.kind() == ErrorKind::NameNotFound {
                Err(b)
            } else {
                Err(a)
            }
        }
    }
}
