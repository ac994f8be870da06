//! Layer-wide shutdown signal.
//!
//! Triggering is sticky: a task that subscribes after the trigger still
//! observes it, and the driver can ask afterwards whether it happened.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared trigger. Clones control the same signal.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            tracing::debug!("Shutdown triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the signal.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown has been triggered. Pends forever if every
    /// `Shutdown` is dropped without triggering.
    pub async fn triggered(&mut self) {
        let fired = self.rx.wait_for(|triggered| *triggered).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn every_subscriber_observes_trigger() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.clone().subscribe();

        shutdown.trigger();
        a.triggered().await;
        b.triggered().await;
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn late_subscribers_still_observe_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();

        let mut late = shutdown.subscribe();
        tokio::time::timeout(Duration::from_secs(1), late.triggered())
            .await
            .expect("trigger before subscribe was lost");
    }

    #[tokio::test]
    async fn untriggered_signal_pends() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        assert!(!shutdown.is_triggered());
        assert!(
            tokio::time::timeout(Duration::from_millis(20), signal.triggered())
                .await
                .is_err()
        );
    }
}
