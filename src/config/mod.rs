//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → LayerConfig (validated, immutable)
//!     → shared via Arc with the op bridge
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    LayerConfig, LogFormat, ObservabilityConfig, ResolverSettings, RuntimeConfig, SocketConfig,
    TimeoutConfig, TlsSettings,
};
