//! Connection Slots
//!
//! Bounds the number of handlers that may run at once. A slot is taken when
//! a connection is accepted and handed back when its handler ends, by
//! dropping the [`SlotGuard`].
//!
//! The semaphore enforces the ceiling; the atomic counter only mirrors it so
//! the active count can be read without touching the semaphore, and so that
//! shutdown can wait for it to reach zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Shared pool of connection slots.
#[derive(Debug)]
pub struct ConnectionSlots {
    capacity: usize,
    permits: Arc<Semaphore>,
    active: AtomicUsize,
    idle: Notify,
}

impl ConnectionSlots {
    /// Creates a pool with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            active: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Waits until a slot is free and takes it.
    ///
    /// Returns `None` once the pool has been closed.
    pub async fn acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        Some(self.reserve().await?.activate())
    }

    /// Waits until a slot is free and holds it without counting it as
    /// active. Call [`SlotPermit::activate`] once a handler takes it over.
    ///
    /// Returns `None` once the pool has been closed.
    pub async fn reserve(self: &Arc<Self>) -> Option<SlotPermit> {
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok()?;
        Some(SlotPermit {
            slots: Arc::clone(self),
            permit,
        })
    }

    /// Takes a slot only if one is free right now.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;
        Some(self.guard(permit))
    }

    fn guard(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> SlotGuard {
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(active, capacity = self.capacity, "Slot acquired");
        SlotGuard {
            slots: Arc::clone(self),
            _permit: permit,
        }
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops handing out slots. Pending and future `acquire` calls return `None`.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Resolves once no slot is held.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        let previous = self.active.fetch_sub(1, Ordering::AcqRel);
        trace!(active = previous - 1, capacity = self.capacity, "Slot released");
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// A reserved slot that no handler owns yet.
///
/// Dropping it hands the slot back without touching the active count.
#[derive(Debug)]
pub struct SlotPermit {
    slots: Arc<ConnectionSlots>,
    permit: OwnedSemaphorePermit,
}

impl SlotPermit {
    /// Counts the slot as active and hands it to its handler.
    pub fn activate(self) -> SlotGuard {
        self.slots.guard(self.permit)
    }
}

/// A held connection slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<ConnectionSlots>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // Counter first, permit second: a waiter can never observe more
        // active slots than the capacity.
        self.slots.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_minimum_capacity() {
        let slots = ConnectionSlots::new(0);
        assert_eq!(slots.capacity(), 1);
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let slots = Arc::new(ConnectionSlots::new(2));
        assert_eq!(slots.active(), 0);

        let a = slots.acquire().await.unwrap();
        let b = slots.acquire().await.unwrap();
        assert_eq!(slots.active(), 2);
        assert_eq!(slots.available(), 0);
        assert!(slots.try_acquire().is_none());

        drop(a);
        assert_eq!(slots.active(), 1);
        assert!(slots.try_acquire().is_some());

        drop(b);
        assert_eq!(slots.active(), 0);
        assert_eq!(slots.available(), 2);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let slots = Arc::new(ConnectionSlots::new(1));
        let held = slots.acquire().await.unwrap();

        let waiter = {
            let slots = Arc::clone(&slots);
            tokio::spawn(async move { slots.acquire().await.is_some() })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap());
    }

    #[test]
    fn test_release_wakes_pending_acquire() {
        let slots = Arc::new(ConnectionSlots::new(1));
        let held = slots.try_acquire().unwrap();

        let mut waiter = tokio_test::task::spawn(slots.acquire());
        tokio_test::assert_pending!(waiter.poll());
        assert_eq!(slots.active(), 1);

        drop(held);
        assert!(waiter.is_woken());
        let guard = tokio_test::assert_ready!(waiter.poll());
        assert!(guard.is_some());
        assert_eq!(slots.active(), 1);
    }

    #[tokio::test]
    async fn test_reserved_slot_not_counted_active() {
        let slots = Arc::new(ConnectionSlots::new(2));

        let reserved = slots.reserve().await.unwrap();
        assert_eq!(slots.active(), 0);
        assert_eq!(slots.available(), 1);

        // Unused reservation goes back without ever being active
        drop(reserved);
        assert_eq!(slots.active(), 0);
        assert_eq!(slots.available(), 2);

        let guard = slots.reserve().await.unwrap().activate();
        assert_eq!(slots.active(), 1);
        drop(guard);
        assert_eq!(slots.active(), 0);

        tokio::time::timeout(Duration::from_secs(1), slots.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_wakes_pending_acquire() {
        let slots = Arc::new(ConnectionSlots::new(1));
        let _held = slots.acquire().await.unwrap();

        let waiter = {
            let slots = Arc::clone(&slots);
            tokio::spawn(async move { slots.acquire().await.is_none() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        slots.close();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let slots = Arc::new(ConnectionSlots::new(3));
        let guards: Vec<_> = (0..3).filter_map(|_| slots.try_acquire()).collect();
        assert_eq!(guards.len(), 3);

        let idle = {
            let slots = Arc::clone(&slots);
            tokio::spawn(async move { slots.wait_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!idle.is_finished());

        drop(guards);
        tokio::time::timeout(Duration::from_secs(1), idle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ceiling_never_exceeded() {
        let slots = Arc::new(ConnectionSlots::new(3));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let slots = Arc::clone(&slots);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _guard = slots.acquire().await.unwrap();
                peak.fetch_max(slots.active(), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(slots.active(), 0);
    }
}
