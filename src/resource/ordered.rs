//! Issue-order sequencing for operations against one resource half.
//!
//! A ticket is taken synchronously when an op is submitted, so ops complete
//! in the order they were issued even though each runs on whichever worker
//! polls it first. Dropping a ticket before its turn (cancellation) skips it
//! without stalling the tickets behind it.

use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct Queue {
    /// Ticket currently allowed to run.
    serving: u64,
    /// Tickets dropped before their turn came up.
    abandoned: BTreeSet<u64>,
}

impl Queue {
    fn advance(&mut self) {
        self.serving += 1;
        while self.abandoned.remove(&self.serving) {
            self.serving += 1;
        }
    }
}

struct Inner<T> {
    next_ticket: AtomicU64,
    queue: watch::Sender<Queue>,
    value: Arc<Mutex<T>>,
}

/// A value whose accesses are granted strictly in ticket order.
pub struct Ordered<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Ordered<T> {
    pub fn new(value: T) -> Self {
        let (queue, _) = watch::channel(Queue::default());
        Self {
            inner: Arc::new(Inner {
                next_ticket: AtomicU64::new(0),
                queue,
                value: Arc::new(Mutex::new(value)),
            }),
        }
    }

    /// Reserve the next place in line. Never blocks.
    pub fn ticket(&self) -> Ticket<T> {
        let number = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        Ticket {
            inner: Arc::clone(&self.inner),
            number,
            armed: true,
        }
    }
}

/// A reserved place in line. Dropping it gives the place up.
pub struct Ticket<T> {
    inner: Arc<Inner<T>>,
    number: u64,
    armed: bool,
}

impl<T> Ticket<T> {
    /// Wait for this ticket's turn and lock the value.
    ///
    /// Cancel-safe: dropping the future releases the place in line.
    pub async fn acquire(mut self) -> OrderedGuard<T> {
        let mut rx = self.inner.queue.subscribe();
        let number = self.number;
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let _ = rx.wait_for(|q| q.serving == number).await;

        let value = Arc::clone(&self.inner.value).lock_owned().await;
        self.armed = false;
        OrderedGuard {
            value,
            _turn: Turn {
                inner: Arc::clone(&self.inner),
            },
        }
    }
}

impl<T> Drop for Ticket<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let number = self.number;
        self.inner.queue.send_modify(|q| {
            if q.serving == number {
                q.advance();
            } else if number > q.serving {
                q.abandoned.insert(number);
            }
        });
    }
}

struct Turn<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Drop for Turn<T> {
    fn drop(&mut self) {
        self.inner.queue.send_modify(Queue::advance);
    }
}

/// Exclusive access to the value for the duration of one op.
pub struct OrderedGuard<T> {
    // Field order matters: the lock is released before the next turn opens.
    value: OwnedMutexGuard<T>,
    _turn: Turn<T>,
}

impl<T> Deref for OrderedGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for OrderedGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
