//! Per-device session locking.
//!
//! Session state is mutated by decrypts, key exchanges, and prekey
//! processing, possibly arriving on different paths at once. One lock per
//! `(recipient, device)` keeps those operations serialized without
//! serializing unrelated devices against each other.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use courier_core::protocol::RemoteDevice;

#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<DashMap<RemoteDevice, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one remote device. The guard is owned so it can
    /// be held across awaits.
    pub async fn acquire(&self, remote: RemoteDevice) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(remote).or_default().clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_device_operations_serialize() {
        let locks = SessionLocks::new();
        let remote = RemoteDevice::new(1, 1);
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire(remote).await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_devices_do_not_block_each_other() {
        let locks = SessionLocks::new();
        let guard_a = locks.acquire(RemoteDevice::new(1, 1)).await;
        // device 2 of the same recipient must not wait on device 1
        let guard_b = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire(RemoteDevice::new(1, 2)),
        )
        .await;
        assert!(guard_b.is_ok());
        drop(guard_a);
    }
}
