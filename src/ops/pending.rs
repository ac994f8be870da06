//! One notify-on-completion unit of work per op.
//!
//! Each op runs as its own task and hands its result over a oneshot
//! channel. The receiving side is the `PendingOp` future; dropping it is
//! cancellation. The task races the work against that drop, so a cancelled
//! op stops at its next suspend point and releases whatever it held. A
//! result nobody claimed goes to the op's orphan hook, which closes anything
//! the op created. That holds whichever side sees the result last: the task
//! when the receiver is already gone, or the receiver's drop when the result
//! was delivered but never polled out.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{ErrorKind, NetError, NetResult};
use crate::observability::metrics;

type Orphan<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A submitted op. Resolves exactly once; drop to cancel.
#[must_use = "dropping a PendingOp cancels it"]
pub struct PendingOp<T> {
    op: &'static str,
    rx: oneshot::Receiver<NetResult<T>>,
    orphan: Option<Orphan<T>>,
}

impl<T: Send + 'static> PendingOp<T> {
    /// Start `work` on the runtime.
    ///
    /// `timeout` races the work against a timer; the timer winning yields
    /// `Timeout` and drops the work like a cancellation. `orphan` receives a
    /// successful result nobody is waiting for anymore. It runs at most once.
    pub fn spawn<F, O>(op: &'static str, timeout: Option<Duration>, work: F, orphan: O) -> Self
    where
        F: Future<Output = NetResult<T>> + Send + 'static,
        O: Fn(T) + Send + Sync + 'static,
    {
        let orphan: Orphan<T> = Arc::new(orphan);
        let task_orphan = Arc::clone(&orphan);
        let (mut tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let started = Instant::now();
            let work = async {
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, work)
                        .await
                        .unwrap_or_else(|_| Err(NetError::timeout(op))),
                    None => work.await,
                }
            };

            let result = tokio::select! {
                biased;
                _ = tx.closed() => {
                    tracing::trace!(op, "Op cancelled before completion");
                    metrics::record_op(op, "cancelled", started);
                    return;
                }
                result = work => result,
            };

            let outcome = match &result {
                Ok(_) => "ok",
                Err(e) if e.kind() == ErrorKind::Timeout => "timeout",
                Err(_) => "error",
            };
            metrics::record_op(op, outcome, started);

            if let Err(Ok(value)) = tx.send(result) {
                tracing::debug!(op, "Op result unclaimed, releasing it");
                task_orphan(value);
            }
        });
        Self {
            op,
            rx,
            orphan: Some(orphan),
        }
    }

    /// An op that completed at submission.
    pub fn ready(op: &'static str, result: NetResult<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self {
            op,
            rx,
            orphan: None,
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }
}

impl<T> Future for PendingOp<T> {
    type Output = NetResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let op = self.op;
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(NetError::internal(format!("{op} task ended without a result"))))
        })
    }
}

impl<T> Drop for PendingOp<T> {
    fn drop(&mut self) {
        let Some(orphan) = self.orphan.take() else {
            return;
        };
        // After close, either the task's send fails and the task runs the
        // hook, or the value is already here and we run it.
        self.rx.close();
        if let Ok(Ok(value)) = self.rx.try_recv() {
            tracing::debug!(op = self.op, "Op result delivered but never claimed, releasing it");
            orphan(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[tokio::test]
    async fn delivers_the_result() {
        let op = PendingOp::spawn("test", None, async { Ok(7) }, |_| {});
        assert_eq!(op.await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_winning_is_timeout() {
        let op = PendingOp::spawn(
            "test.slow",
            Some(Duration::from_millis(50)),
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            |_| {},
        );
        assert_eq!(op.await.unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn dropping_cancels_the_work() {
        struct Flag(Arc<AtomicBool>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = Flag(Arc::clone(&dropped));
        let op = PendingOp::spawn(
            "test.forever",
            None,
            async move {
                let _flag = flag;
                std::future::pending::<NetResult<()>>().await
            },
            |_| {},
        );
        tokio::task::yield_now().await;
        drop(op);

        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("work was not dropped after cancellation");
    }

    #[tokio::test]
    async fn ready_ops_resolve_immediately() {
        let op = PendingOp::ready("test.ready", Err::<(), _>(NetError::invalid_argument("bad")));
        assert_eq!(op.op(), "test.ready");
        assert_eq!(op.await.unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn delivered_but_unclaimed_results_reach_the_orphan_hook() {
        let released = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&released);
        let op = PendingOp::spawn("test.created", None, async { Ok(42usize) }, move |value| {
            hook.store(value, Ordering::SeqCst);
        });

        // Let the task finish and deliver into the channel.
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(op);
        assert_eq!(released.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn claimed_results_skip_the_orphan_hook() {
        let released = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&released);
        let op = PendingOp::spawn("test.created", None, async { Ok(7usize) }, move |_| {
            hook.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(op.await.unwrap(), 7);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }
}
