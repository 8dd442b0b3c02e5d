//! Worker-thread plumbing shared by the sender and receiver pipelines.
//!
//! Both pipelines are chains of long-lived threads over bounded, lossy
//! hand-off points. Every blocking operation carries a timeout so the
//! shared stop signal is observed promptly; back-pressure always drops
//! frames instead of stalling an upstream stage.

pub mod receiver;
pub mod sender;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::codec::BgrFrame;

/// Shared cooperative stop signal.
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Bounded ring of the most recent captured frames. Pushing onto a full
/// ring drops the oldest frame; readers take the newest without removing
/// it, so a slow encoder always sees the freshest capture.
pub struct FrameRing {
    frames: Mutex<VecDeque<BgrFrame>>,
    cap: usize,
}

impl FrameRing {
    pub fn new(cap: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(cap)),
            cap: cap.max(1),
        }
    }

    pub fn push(&self, frame: BgrFrame) {
        let mut frames = lock_recovering(&self.frames);
        if frames.len() == self.cap {
            frames.pop_front();
        }
        frames.push_back(frame);
    }

    pub fn latest(&self) -> Option<BgrFrame> {
        lock_recovering(&self.frames).back().cloned()
    }

    pub fn len(&self) -> usize {
        lock_recovering(&self.frames).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single-slot newest-wins register between two threads.
///
/// `put` overwrites whatever the consumer has not yet taken, so the
/// downstream stage is never more than one item behind the producer.
pub struct SingleSlot<T> {
    slot: Mutex<Option<T>>,
    available: Condvar,
}

impl<T> SingleSlot<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            available: Condvar::new(),
        }
    }

    /// Publish a value, replacing any unconsumed predecessor.
    pub fn put(&self, value: T) {
        let mut slot = lock_recovering(&self.slot);
        *slot = Some(value);
        self.available.notify_one();
    }

    /// Take the current value, waiting up to `timeout` for one to appear.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock_recovering(&self.slot);
        loop {
            if let Some(value) = slot.take() {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = match self.available.wait_timeout(slot, deadline - now) {
                Ok(r) => r,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot = guard;
        }
    }
}

impl<T> Default for SingleSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_stop_signal() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_stopped());
        signal.stop();
        assert!(clone.is_stopped());
    }

    #[test]
    fn test_ring_drops_oldest() {
        let ring = FrameRing::new(3);
        for i in 0..5u32 {
            ring.push(BgrFrame::black(i + 1, 1));
        }
        assert_eq!(ring.len(), 3);
        // Newest is the last pushed.
        assert_eq!(ring.latest().unwrap().width, 5);
    }

    #[test]
    fn test_ring_latest_does_not_consume() {
        let ring = FrameRing::new(3);
        ring.push(BgrFrame::black(2, 2));
        assert!(ring.latest().is_some());
        assert!(ring.latest().is_some());
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_slot_newest_wins() {
        let slot = SingleSlot::new();
        slot.put(1u32);
        slot.put(2u32);
        assert_eq!(slot.take_timeout(Duration::from_millis(10)), Some(2));
        assert_eq!(slot.take_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_slot_wakes_waiter() {
        let slot = Arc::new(SingleSlot::new());
        let consumer = {
            let slot = slot.clone();
            thread::spawn(move || slot.take_timeout(Duration::from_secs(2)))
        };
        thread::sleep(Duration::from_millis(20));
        slot.put(7u32);
        assert_eq!(consumer.join().unwrap(), Some(7));
    }
}
