//! Handle-indexed resource table.
//!
//! # Responsibilities
//! - Assign monotonically increasing handles, never reused
//! - Atomic allocate / get / remove from any worker thread
//! - Hand exactly one caller the right to run the close sequence

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{NetError, NetResult};
use crate::observability::metrics;
use crate::resource::{Handle, Resource, ResourceBody};

/// Process-wide registry of live resources.
pub struct ResourceTable {
    entries: DashMap<Handle, Arc<Resource>>,
    /// Next handle to hand out. Zero is never issued.
    next: AtomicU32,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next: AtomicU32::new(1),
        }
    }

    /// Store a resource and return its new handle.
    pub fn allocate(&self, body: ResourceBody) -> NetResult<Handle> {
        let id = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .map_err(|_| NetError::internal("resource handle space exhausted"))?;
        let handle = Handle(id);
        let resource = Arc::new(Resource::new(handle, body));
        let kind = resource.kind();

        if self.entries.insert(handle, resource).is_some() {
            // Monotonic assignment makes this impossible unless the table is corrupt.
            return Err(NetError::internal(format!("{handle} assigned twice")));
        }
        metrics::record_open_resources(self.entries.len());
        tracing::debug!(handle = %handle, kind = %kind, "Resource allocated");
        Ok(handle)
    }

    /// Look up a live resource. The returned `Arc` keeps it usable for the op.
    pub fn get(&self, handle: Handle) -> NetResult<Arc<Resource>> {
        self.entries
            .get(&handle)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| NetError::invalid_handle(handle))
    }

    /// Remove a resource and signal its in-flight ops.
    ///
    /// Only one caller ever receives `Ok` for a given handle.
    pub fn remove(&self, handle: Handle) -> NetResult<Arc<Resource>> {
        let (_, resource) = self
            .entries
            .remove(&handle)
            .ok_or_else(|| NetError::invalid_handle(handle))?;
        resource.mark_closed();
        metrics::record_open_resources(self.entries.len());
        tracing::debug!(handle = %handle, kind = %resource.kind(), "Resource removed");
        Ok(resource)
    }

    /// Whether `handle` was ever issued by this table.
    pub fn was_issued(&self, handle: Handle) -> bool {
        handle.0 != 0 && handle.0 < self.next.load(Ordering::Acquire)
    }

    /// Close every live resource. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let handles: Vec<Handle> = self.entries.iter().map(|entry| *entry.key()).collect();
        handles
            .into_iter()
            .filter(|handle| self.remove(*handle).is_ok())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.entries.iter().map(|entry| *entry.key()).collect();
        handles.sort();
        handles
    }
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::net::DatagramSocket;
    use proptest::prelude::*;
    use std::collections::HashSet;

    async fn datagram() -> ResourceBody {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        ResourceBody::Datagram(DatagramSocket::new(socket).unwrap())
    }

    #[tokio::test]
    async fn remove_hands_out_ownership_once() {
        let table = ResourceTable::new();
        let handle = table.allocate(datagram().await).unwrap();

        let resource = table.get(handle).unwrap();
        assert!(!resource.is_closed());

        let removed = table.remove(handle).unwrap();
        assert!(removed.is_closed());
        assert!(resource.is_closed());

        let again = table.remove(handle).unwrap_err();
        assert_eq!(again.kind(), ErrorKind::InvalidHandle);
        assert_eq!(table.get(handle).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert!(table.was_issued(handle));
        assert!(!table.was_issued(Handle(handle.0 + 100)));
    }

    #[tokio::test]
    async fn handles_are_not_reused_after_removal() {
        let table = ResourceTable::new();
        let first = table.allocate(datagram().await).unwrap();
        table.remove(first).unwrap();
        let second = table.allocate(datagram().await).unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn close_all_empties_the_table() {
        let table = ResourceTable::new();
        for _ in 0..3 {
            table.allocate(datagram().await).unwrap();
        }
        assert_eq!(table.close_all(), 3);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn guard_reports_close_to_in_flight_ops() {
        let table = ResourceTable::new();
        let handle = table.allocate(datagram().await).unwrap();
        let resource = table.get(handle).unwrap();

        let pending = tokio::spawn(async move {
            resource
                .guard(std::future::pending::<NetResult<()>>())
                .await
        });
        tokio::task::yield_now().await;
        table.remove(handle).unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }

    proptest! {
        #[test]
        fn allocate_never_returns_a_live_handle(ops in proptest::collection::vec(any::<bool>(), 1..64)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let table = ResourceTable::new();
                let mut live: Vec<Handle> = Vec::new();
                let mut seen = HashSet::new();
                for allocate in ops {
                    if allocate || live.is_empty() {
                        let handle = table.allocate(datagram().await).unwrap();
                        prop_assert!(!live.contains(&handle));
                        prop_assert!(seen.insert(handle));
                        live.push(handle);
                    } else {
                        let handle = live.remove(0);
                        prop_assert!(table.remove(handle).is_ok());
                    }
                }
                prop_assert_eq!(table.len(), live.len());
                Ok(())
            })?;
        }
    }
}
