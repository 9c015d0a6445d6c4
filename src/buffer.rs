use crate::error::{PopError, PushError};
use crate::shutdown::Interruptible;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Ring storage guarded by the channel lock
struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    count: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            count: 0,
            closed: false,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    fn enqueue(&mut self, item: T) {
        debug_assert!(!self.is_full());
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity();
        self.count += 1;
    }

    fn dequeue(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.count -= 1;
        item
    }
}

/// A fixed-capacity FIFO hand-off between two pipeline stages.
///
/// Producers block while the ring is full and consumers block while it is
/// empty, each with an explicit deadline. Both waits release the lock while
/// parked and re-check their predicate on every wake, so spurious wakeups
/// and several waiters racing for one slot are harmless.
///
/// Closing the channel wakes every waiter. After that every push is rejected
/// with [`PushError::Closed`], while pops keep yielding queued items until
/// the ring is drained and then report [`PopError::Closed`].
pub struct BoundedChannel<T> {
    ring: Mutex<Ring<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    push_waits: AtomicU64,
    pop_waits: AtomicU64,
}

impl<T> BoundedChannel<T> {
    /// Create a channel holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be non-zero");
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            push_waits: AtomicU64::new(0),
            pop_waits: AtomicU64::new(0),
        }
    }

    /// Push an item, waiting up to `timeout` for a free slot
    pub fn push(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut ring = self.ring.lock();

        if ring.is_full() && !ring.closed {
            self.push_waits.fetch_add(1, Ordering::Relaxed);
        }
        while ring.is_full() && !ring.closed {
            if park(&self.not_full, &mut ring, deadline) && ring.is_full() && !ring.closed {
                return Err(PushError::Timeout(item));
            }
        }

        if ring.closed {
            return Err(PushError::Closed(item));
        }

        ring.enqueue(item);
        drop(ring);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop the oldest item, waiting up to `timeout` for one to arrive
    pub fn pop(&self, timeout: Duration) -> Result<T, PopError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut ring = self.ring.lock();

        if ring.count == 0 && !ring.closed {
            self.pop_waits.fetch_add(1, Ordering::Relaxed);
        }
        while ring.count == 0 && !ring.closed {
            if park(&self.not_empty, &mut ring, deadline) && ring.count == 0 && !ring.closed {
                return Err(PopError::Timeout);
            }
        }

        match ring.dequeue() {
            Some(item) => {
                drop(ring);
                self.not_full.notify_one();
                Ok(item)
            }
            None => Err(PopError::Closed),
        }
    }

    /// Push without waiting
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        self.push(item, Duration::ZERO)
    }

    /// Pop without waiting
    pub fn try_pop(&self) -> Result<T, PopError> {
        self.pop(Duration::ZERO)
    }

    /// Close the channel and wake every blocked producer and consumer.
    ///
    /// Returns `false` if the channel was already closed.
    pub fn close(&self) -> bool {
        let mut ring = self.ring.lock();
        if ring.closed {
            return false;
        }
        ring.closed = true;
        drop(ring);
        self.not_full.notify_all();
        self.not_empty.notify_all();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    /// Occupancy as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        let ring = self.ring.lock();
        ((ring.count * 100) / ring.capacity()) as u32
    }

    /// Number of pushes that found the channel full and had to wait
    pub fn push_waits(&self) -> u64 {
        self.push_waits.load(Ordering::Relaxed)
    }

    /// Number of pops that found the channel empty and had to wait
    pub fn pop_waits(&self) -> u64 {
        self.pop_waits.load(Ordering::Relaxed)
    }

    /// Remove everything still queued, closed or not
    pub fn drain(&self) -> Vec<T> {
        let mut ring = self.ring.lock();
        let mut items = Vec::with_capacity(ring.count);
        while let Some(item) = ring.dequeue() {
            items.push(item);
        }
        drop(ring);
        self.not_full.notify_all();
        items
    }
}

/// Park on `condvar` until woken or `deadline` passes; returns whether the
/// deadline passed. No deadline (the timeout overflowed `Instant`) waits
/// until woken.
fn park<T>(
    condvar: &Condvar,
    ring: &mut MutexGuard<'_, Ring<T>>,
    deadline: Option<Instant>,
) -> bool {
    match deadline {
        Some(deadline) => condvar.wait_until(ring, deadline).timed_out(),
        None => {
            condvar.wait(ring);
            false
        }
    }
}

impl<T: Send> Interruptible for BoundedChannel<T> {
    fn interrupt(&self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("BoundedChannel")
            .field("capacity", &ring.capacity())
            .field("len", &ring.count)
            .field("closed", &ring.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_channel_push_pop() {
        let channel = BoundedChannel::new(10);
        assert!(channel.push(42, WAIT).is_ok());
        assert_eq!(channel.pop(WAIT), Ok(42));
        assert!(channel.is_empty());
    }

    #[test]
    fn test_channel_wraps_around() {
        let channel = BoundedChannel::new(3);
        for round in 0..5 {
            for i in 0..3 {
                channel.push(round * 10 + i, WAIT).unwrap();
            }
            for i in 0..3 {
                assert_eq!(channel.pop(WAIT), Ok(round * 10 + i));
            }
        }
        assert!(channel.is_empty());
    }

    #[test]
    fn test_channel_utilization() {
        let channel = BoundedChannel::new(10);
        for i in 0..5 {
            channel.try_push(i).unwrap();
        }
        assert_eq!(channel.utilization(), 50);
        assert_eq!(channel.len(), 5);
    }

    #[test]
    fn test_push_times_out_when_full() {
        let channel = BoundedChannel::new(2);
        channel.try_push(1).unwrap();
        channel.try_push(2).unwrap();

        let start = Instant::now();
        let err = channel.push(3, Duration::from_millis(30)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.into_inner(), 3);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(channel.push_waits(), 1);
        assert_eq!(channel.len(), 2);
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let channel: BoundedChannel<u32> = BoundedChannel::new(2);
        assert_eq!(channel.pop(Duration::from_millis(20)), Err(PopError::Timeout));
        assert_eq!(channel.try_pop(), Err(PopError::Timeout));
        assert_eq!(channel.pop_waits(), 2);
    }

    #[test]
    fn test_closed_channel_drains_then_reports_closed() {
        let channel = BoundedChannel::new(4);
        channel.try_push(1).unwrap();
        channel.try_push(2).unwrap();
        assert!(channel.close());
        assert!(!channel.close());

        assert_eq!(channel.pop(WAIT), Ok(1));
        assert_eq!(channel.pop(WAIT), Ok(2));
        assert_eq!(channel.pop(WAIT), Err(PopError::Closed));
    }

    #[test]
    fn test_closed_channel_rejects_push() {
        let channel = BoundedChannel::new(1);
        channel.try_push(1).unwrap();
        channel.close();
        let err = channel.push(2, WAIT).unwrap_err();
        assert!(err.is_closed());
        assert_eq!(err.into_inner(), 2);

        // Room frees up but the channel stays closed to producers
        assert_eq!(channel.try_pop(), Ok(1));
        assert!(channel.try_push(3).unwrap_err().is_closed());
        assert!(channel.is_empty());
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let channel = Arc::new(BoundedChannel::new(1));
        channel.try_push(1).unwrap();

        let producer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                let start = Instant::now();
                (channel.push(2, Duration::from_secs(30)), start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        channel.close();
        let (result, elapsed) = producer.join().unwrap();
        let err = result.unwrap_err();
        assert!(err.is_closed());
        assert_eq!(err.into_inner(), 2);
        assert!(elapsed < WAIT);
        assert_eq!(channel.push_waits(), 1);
        assert_eq!(channel.pop(WAIT), Ok(1));
    }

    #[test]
    fn test_unbounded_timeout_does_not_overflow() {
        let channel = BoundedChannel::new(1);
        channel.try_push(1u32).unwrap();
        assert_eq!(channel.pop(Duration::MAX), Ok(1));
        assert!(channel.push(2, Duration::MAX).is_ok());

        // Full, so this parks with no deadline until the channel closes
        let channel = Arc::new(channel);
        let producer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.push(3, Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        channel.close();
        assert!(producer.join().unwrap().unwrap_err().is_closed());

        assert_eq!(channel.pop(Duration::MAX), Ok(2));
        assert_eq!(channel.pop(Duration::MAX), Err(PopError::Closed));
    }

    #[test]
    fn test_blocked_push_resumes_after_pop() {
        let channel = Arc::new(BoundedChannel::new(1));
        channel.try_push(1).unwrap();

        let producer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.push(2, WAIT))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(channel.pop(WAIT), Ok(1));
        assert!(producer.join().unwrap().is_ok());
        assert_eq!(channel.pop(WAIT), Ok(2));
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let channel: Arc<BoundedChannel<u32>> = Arc::new(BoundedChannel::new(1));
        let consumer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                let start = Instant::now();
                (channel.pop(Duration::from_secs(30)), start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        channel.close();
        let (result, elapsed) = consumer.join().unwrap();
        assert_eq!(result, Err(PopError::Closed));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_drain_empties_channel() {
        let channel = BoundedChannel::new(4);
        for i in 0..3 {
            channel.try_push(i).unwrap();
        }
        assert_eq!(channel.drain(), vec![0, 1, 2]);
        assert!(channel.is_empty());
    }

    #[test]
    #[should_panic(expected = "capacity must be non-zero")]
    fn test_zero_capacity_panics() {
        let _ = BoundedChannel::<u8>::new(0);
    }
}
