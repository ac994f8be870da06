//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the bounded worker pool from configuration
//! - Initialize metrics once a runtime exists
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Readiness I/O and timers come from the same runtime

use std::io;

use tokio::runtime::{Builder, Runtime};

use crate::config::{ObservabilityConfig, RuntimeConfig};
use crate::observability::metrics;

/// Build the multi-threaded worker pool that drives every op.
pub fn build_runtime(config: &RuntimeConfig) -> io::Result<Runtime> {
    let mut builder = Builder::new_multi_thread();
    builder.enable_all().thread_name(config.thread_name.clone());
    if let Some(workers) = config.worker_threads {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;
    tracing::info!(
        worker_threads = ?config.worker_threads,
        thread_name = %config.thread_name,
        "Worker pool started"
    );
    Ok(runtime)
}

/// Start the metrics endpoint if enabled. Call from inside the runtime.
pub fn start_metrics(config: &ObservabilityConfig) {
    if !config.metrics_enabled {
        return;
    }
    match config.metrics_address.parse() {
        Ok(addr) => metrics::init_metrics(addr),
        Err(_) => tracing::error!(
            metrics_address = %config.metrics_address,
            "Failed to parse metrics address"
        ),
    }
}
