//! Asynchronous network resource layer.
//!
//! Handle-addressed TCP, UDP and Unix sockets, hostname resolution with
//! caching and fallback, in-place TLS upgrades, and a notify-on-completion
//! op surface for a message-driven front end.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod ops;
pub mod resolver;
pub mod resource;
pub mod tls;

pub use config::LayerConfig;
pub use error::{ErrorKind, HandshakeFailure, NetError, NetResult};
pub use lifecycle::Shutdown;
pub use ops::{Dispatcher, NetOps, PendingOp};
pub use resource::{Handle, ResourceKind};
