//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the layer.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resolver::AddressFamily;

/// Root configuration for the network layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LayerConfig {
    /// Worker pool settings.
    pub runtime: RuntimeConfig,

    /// Hostname resolution settings.
    pub resolver: ResolverSettings,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Socket defaults.
    pub sockets: SocketConfig,

    /// Trust anchors for TLS upgrades.
    pub tls: TlsSettings,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads; `None` uses one per core.
    pub worker_threads: Option<usize>,

    /// Name given to worker threads.
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name: "netlayer-worker".to_string(),
        }
    }
}

/// Resolver configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Nameserver addresses ("1.1.1.1" or "[::1]:5353"). Empty uses the
    /// system configuration.
    pub nameservers: Vec<String>,

    /// Per-query timeout in milliseconds.
    pub timeout_ms: u64,

    /// Query attempts per nameserver.
    pub attempts: usize,

    /// Lifetime of cached answers in seconds (0 disables the cache).
    pub cache_ttl_secs: u64,

    /// Maximum number of cached (host, record type) answers.
    pub max_cache_entries: usize,

    /// Family that leads the interleaved candidate list.
    pub first_family: AddressFamily,

    /// Consult the system resolver when the configured one fails.
    pub system_fallback: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            timeout_ms: 5_000,
            attempts: 2,
            cache_ttl_secs: 60,
            max_cache_entries: 1_024,
            first_family: AddressFamily::Ipv6,
            system_fallback: true,
        }
    }
}

/// Timeout configuration for suspending operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on a single connect candidate attempt in milliseconds.
    pub connect_attempt_ms: u64,

    /// Bound on a TLS handshake in milliseconds.
    pub handshake_ms: u64,
}

impl TimeoutConfig {
    pub fn connect_attempt(&self) -> Duration {
        Duration::from_millis(self.connect_attempt_ms)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_attempt_ms: 10_000,
            handshake_ms: 10_000,
        }
    }
}

/// Socket defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Listen backlog used when a request does not give one.
    pub default_backlog: u32,

    /// Keepalive interval when `keep_alive` is enabled without one.
    pub keepalive_secs: u64,

    /// Set `SO_REUSEADDR` on new listeners and datagram sockets.
    pub reuse_address: bool,

    /// Upper bound on the buffer a single read or receive allocates.
    /// Larger requests are served with at most this many bytes.
    pub max_read_bytes: usize,
}

impl SocketConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            default_backlog: 128,
            keepalive_secs: 75,
            reuse_address: true,
            max_read_bytes: 64 * 1024,
        }
    }
}

/// TLS trust configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Trust the bundled Mozilla root set.
    pub use_webpki_roots: bool,

    /// Extra PEM bundle of trusted CA certificates.
    pub ca_file: Option<String>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            use_webpki_roots: true,
            ca_file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
