//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build worker pool → Start metrics
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop reading requests → close_all → Exit
//!
//! Signals (signals.rs):
//!     SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
