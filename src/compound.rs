use crate::invariants::debug_assert_bounded_count;
use crate::lane::FastOffer;
use crate::{Config, Lane};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Construction-time argument errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Requested capacity was zero.
    #[error("capacity must be at least 1")]
    ZeroCapacity,
    /// Requested parallelism was zero.
    #[error("parallelism must be at least 1")]
    ZeroParallelism,
    /// The rounded capacity cannot give every lane its minimum two slots.
    #[error("capacity {capacity} cannot give {lanes} lanes two slots each")]
    CapacityTooSmall {
        /// The requested capacity after rounding up to a power of two.
        capacity: usize,
        /// The lane count chosen from the parallelism hint.
        lanes: usize,
    },
}

/// Process-wide producer id assignment: a monotone counter, handed to each
/// thread on first touch. Routing only needs stability and rough uniformity
/// modulo the lane count, so this replaces any coupling to OS thread ids.
static NEXT_PRODUCER_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static PRODUCER_ID: usize = NEXT_PRODUCER_ID.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn producer_id() -> usize {
    PRODUCER_ID.with(|id| *id)
}

/// Batch size used by [`CompoundQueue::fill_with`] between exit checks.
const REFILL_BATCH: usize = 4096;

/// Bounded lock-free MPSC queue built as a compound of parallel MPSC lanes.
///
/// Producers are striped across lanes by a per-thread id, which spreads the
/// CAS traffic that a single producer cursor would concentrate; a single
/// consumer scans the lanes round-robin. The compound presents the same
/// message-passing contract as one lane, with one deliberate trade: elements
/// from a single producer can be reordered when its offers fall back to
/// another lane. Per-producer FIFO needs a single lane
/// (`with_parallelism(capacity, 1)`) or external serialization.
///
/// At most one thread may consume (`poll`/`peek`/`drain` and their relaxed
/// forms). Producers may be arbitrarily many.
///
/// # Example
///
/// ```
/// use lanempsc::CompoundQueue;
///
/// let queue = CompoundQueue::new(1024).unwrap();
/// assert!(queue.offer(42u64).is_ok());
/// assert_eq!(queue.poll(), Some(42));
/// assert_eq!(queue.poll(), None);
/// ```
pub struct CompoundQueue<T> {
    lanes: Box<[Lane<T>]>,
    mask: usize,
    /// Scan resume point; written only by the consumer, so a plain cell
    /// suffices. Always masked before use.
    consumer_hint: UnsafeCell<usize>,
}

// Safety: lanes synchronize producers and the consumer internally; the
// consumer hint is only ever touched by the single consumer thread, which is
// the same contract that makes poll itself safe to call.
unsafe impl<T: Send> Send for CompoundQueue<T> {}
unsafe impl<T: Send> Sync for CompoundQueue<T> {}

impl<T> CompoundQueue<T> {
    /// Creates a queue with the given total capacity (rounded up to a power
    /// of two) and the platform CPU count as the parallelism hint.
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        Self::with_parallelism(capacity, num_cpus::get())
    }

    /// Creates a queue with an explicit parallelism hint.
    ///
    /// The lane count is the hint itself when it is a power of two, and
    /// otherwise the hint rounded down to a power of two. Total capacity is
    /// rounded up to a power of two and split evenly across lanes.
    pub fn with_parallelism(capacity: usize, parallelism: usize) -> Result<Self, QueueError> {
        Self::with_config(Config {
            capacity,
            parallelism,
            ..Config::default()
        })
    }

    /// Creates a queue from a full [`Config`].
    pub fn with_config(config: Config) -> Result<Self, QueueError> {
        if config.capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        if config.parallelism == 0 {
            return Err(QueueError::ZeroParallelism);
        }

        let lane_count = if config.parallelism.is_power_of_two() {
            config.parallelism
        } else {
            config.parallelism.next_power_of_two() / 2
        };
        let total = config.capacity.next_power_of_two();
        if total < lane_count * 2 {
            return Err(QueueError::CapacityTooSmall {
                capacity: total,
                lanes: lane_count,
            });
        }
        let lane_capacity = total / lane_count;

        let lanes = (0..lane_count)
            .map(|_| {
                if config.enable_metrics {
                    Lane::with_metrics(lane_capacity)
                } else {
                    Lane::new(lane_capacity)
                }
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            lanes,
            mask: lane_count - 1,
            consumer_hint: UnsafeCell::new(0),
        })
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    /// Total capacity: lane count times lane capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.lanes.len() * self.lanes[0].capacity()
    }

    /// Number of lanes (the effective producer parallelism).
    #[inline]
    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Best-effort element count: the sum of lane snapshots. Under
    /// concurrent offers the sum can transiently exceed [`capacity`]
    /// (the lanes are not read at one instant); treat it as a hint.
    ///
    /// [`capacity`]: CompoundQueue::capacity
    pub fn size(&self) -> usize {
        self.lanes.iter().map(Lane::size).sum()
    }

    /// Returns `true` if every lane is observed empty.
    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(Lane::is_empty)
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Strict offer.
    ///
    /// Tries the producer's home lane first. On a full home lane it scans
    /// the others with fail-fast attempts, retrying as long as any lane
    /// reports a lost claim race, and returns `Err` only after observing a
    /// full pass in which every lane was capacity-full. Contention is
    /// retried; genuine fullness is not.
    pub fn offer(&self, e: T) -> Result<(), T> {
        let start = producer_id() & self.mask;
        match self.lanes[start].offer(e) {
            Ok(()) => Ok(()),
            Err(e) => self.slow_offer(start + 1, e),
        }
    }

    /// Scanning fallback for [`offer`](CompoundQueue::offer).
    fn slow_offer(&self, start: usize, mut e: T) -> Result<(), T> {
        let lane_count = self.lanes.len();
        loop {
            let mut full_lanes = 0;
            for i in start..start + lane_count {
                e = match self.lanes[i & self.mask].fail_fast_offer(e) {
                    FastOffer::Enqueued => return Ok(()),
                    FastOffer::Full(e) => {
                        full_lanes += 1;
                        e
                    }
                    FastOffer::Lost(e) => e,
                };
            }
            // Full is a capacity verdict; a lost race is transient and the
            // pass repeats until the element lands or everything is full.
            if full_lanes == lane_count {
                return Err(e);
            }
        }
    }

    /// Relaxed offer: one fail-fast pass over all lanes, starting at the
    /// producer's home lane. May refuse under contention.
    pub fn relaxed_offer(&self, mut e: T) -> Result<(), T> {
        let start = producer_id() & self.mask;
        for i in start..start + self.lanes.len() {
            e = match self.lanes[i & self.mask].fail_fast_offer(e) {
                FastOffer::Enqueued => return Ok(()),
                FastOffer::Full(e) | FastOffer::Lost(e) => e,
            };
        }
        Err(e)
    }

    /// Enqueues up to `limit` elements from `supplier`, preferring the
    /// producer's home lane and spilling the remainder across the others in
    /// a single pass. Returns the number enqueued (relaxed semantics:
    /// a partial fill is allowed).
    pub fn fill<F>(&self, mut supplier: F, limit: usize) -> usize
    where
        F: FnMut() -> T,
    {
        if limit == 0 {
            return 0;
        }
        let start = producer_id() & self.mask;
        let mut filled = self.lanes[start].fill(&mut supplier, limit);
        if filled == limit {
            return filled;
        }
        for i in start + 1..start + self.lanes.len() {
            filled += self.lanes[i & self.mask].fill(&mut supplier, limit - filled);
            if filled == limit {
                return filled;
            }
        }
        debug_assert_bounded_count!(filled, limit);
        filled
    }

    /// [`fill`](CompoundQueue::fill) bounded by the total capacity.
    pub fn fill_all<F>(&self, supplier: F) -> usize
    where
        F: FnMut() -> T,
    {
        let capacity = self.capacity();
        self.fill(supplier, capacity)
    }

    /// Keeps the queue topped up from `supplier` until `exit` returns
    /// `false`, refilling in bounded batches. When no element could be
    /// enqueued, calls `wait` with a monotone idle counter and continues
    /// with the counter it returns; the counter resets on progress.
    ///
    /// No lock is held across `wait`; the policy is entirely the caller's.
    pub fn fill_with<F, W, E>(&self, mut supplier: F, mut wait: W, mut exit: E)
    where
        F: FnMut() -> T,
        W: FnMut(u32) -> u32,
        E: FnMut() -> bool,
    {
        let mut idle = 0u32;
        while exit() {
            if self.fill(&mut supplier, REFILL_BATCH) == 0 {
                idle = wait(idle);
            } else {
                idle = 0;
            }
        }
    }

    // ---------------------------------------------------------------------
    // CONSUMER API (single consumer thread only)
    // ---------------------------------------------------------------------

    /// Scans the lanes starting at the remembered resume point, applying
    /// `visit` until it yields. The terminating index is stored back
    /// unadjusted: after a hit the next scan re-inspects the lane that just
    /// yielded (a locality bias inherited from the dispatch design), and
    /// after a miss it resumes at the same lane it started from.
    #[inline]
    fn scan<R>(&self, mut visit: impl FnMut(&Lane<T>) -> Option<R>) -> Option<R> {
        // SAFETY: the hint is only read and written here, and only the
        // single consumer thread may call the scanning operations.
        let hint = unsafe { *self.consumer_hint.get() };
        let start = hint & self.mask;
        let limit = start + self.lanes.len();

        let mut found = None;
        let mut i = start;
        while i < limit {
            found = visit(&self.lanes[i & self.mask]);
            if found.is_some() {
                break;
            }
            i += 1;
        }

        // SAFETY: as above.
        unsafe {
            *self.consumer_hint.get() = i;
        }
        found
    }

    /// Strict poll: the first non-empty lane's head element, or `None` when
    /// every lane is empty.
    pub fn poll(&self) -> Option<T> {
        self.scan(Lane::poll)
    }

    /// Relaxed poll: bounded steps; may return `None` while a publication
    /// is in flight.
    pub fn relaxed_poll(&self) -> Option<T> {
        self.scan(Lane::relaxed_poll)
    }

    /// Strict peek: clone of the next element without removing it.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.scan(Lane::peek)
    }

    /// Relaxed peek.
    pub fn relaxed_peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.scan(Lane::relaxed_peek)
    }

    /// Dequeues up to `limit` elements into `consumer`, stopping early at
    /// the first empty observation. Returns the number drained.
    pub fn drain<F>(&self, mut consumer: F, limit: usize) -> usize
    where
        F: FnMut(T),
    {
        for drained in 0..limit {
            match self.relaxed_poll() {
                Some(e) => consumer(e),
                None => return drained,
            }
        }
        limit
    }

    /// [`drain`](CompoundQueue::drain) bounded by the total capacity.
    pub fn drain_all<F>(&self, consumer: F) -> usize
    where
        F: FnMut(T),
    {
        let capacity = self.capacity();
        self.drain(consumer, capacity)
    }

    /// Feeds `consumer` until `exit` returns `false`. On every empty
    /// observation, calls `wait` with a monotone idle counter and continues
    /// with the counter it returns; the counter resets on progress.
    ///
    /// # Example
    ///
    /// ```
    /// use lanempsc::{Backoff, CompoundQueue};
    /// use std::cell::Cell;
    ///
    /// let queue = CompoundQueue::with_parallelism(64, 2).unwrap();
    /// for i in 0..10u32 {
    ///     assert!(queue.offer(i).is_ok());
    /// }
    ///
    /// let seen = Cell::new(0);
    /// let backoff = Backoff::new();
    /// queue.drain_with(
    ///     |_item| seen.set(seen.get() + 1),
    ///     |idle| backoff.idle(idle),
    ///     || seen.get() < 10,
    /// );
    /// assert_eq!(seen.get(), 10);
    /// ```
    pub fn drain_with<F, W, E>(&self, mut consumer: F, mut wait: W, mut exit: E)
    where
        F: FnMut(T),
        W: FnMut(u32) -> u32,
        E: FnMut() -> bool,
    {
        let mut idle = 0u32;
        while exit() {
            match self.relaxed_poll() {
                Some(e) => {
                    consumer(e);
                    idle = 0;
                }
                None => idle = wait(idle),
            }
        }
    }

    // ---------------------------------------------------------------------
    // OBSERVABILITY
    // ---------------------------------------------------------------------

    /// Aggregated statistics across all lanes; all zeros unless the queue
    /// was built with [`Config::enable_metrics`].
    pub fn metrics(&self) -> crate::MetricsSnapshot {
        let mut m = crate::MetricsSnapshot::default();
        for lane in self.lanes.iter() {
            let lm = lane.metrics();
            m.offered += lm.offered;
            m.polled += lm.polled;
            m.rejected_full += lm.rejected_full;
            m.lost_races += lm.lost_races;
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizing_exact_inputs() {
        // capacity 64, parallelism 4: four lanes of sixteen.
        let q = CompoundQueue::<u64>::with_parallelism(64, 4).unwrap();
        assert_eq!(q.lanes(), 4);
        assert_eq!(q.capacity(), 64);
    }

    #[test]
    fn test_sizing_rounds() {
        // parallelism 6 rounds down to 4 lanes; capacity 30 rounds up to 32.
        let q = CompoundQueue::<u64>::with_parallelism(30, 6).unwrap();
        assert_eq!(q.lanes(), 4);
        assert_eq!(q.capacity(), 32);
    }

    #[test]
    fn test_single_lane_fifo() {
        let q = CompoundQueue::with_parallelism(8, 1).unwrap();
        for i in 1..=8u64 {
            assert!(q.offer(i).is_ok());
        }
        assert_eq!(q.offer(9), Err(9));

        for i in 1..=8u64 {
            assert_eq!(q.poll(), Some(i));
        }
        assert_eq!(q.poll(), None);
    }

    #[test]
    fn test_full_detection_two_lanes() {
        // Two lanes of two slots each.
        let q = CompoundQueue::with_parallelism(4, 2).unwrap();
        for i in 0..4u64 {
            assert!(q.offer(i).is_ok());
        }
        assert_eq!(q.offer(4), Err(4));

        assert!(q.poll().is_some());
        assert!(q.offer(4).is_ok());
    }

    #[test]
    fn test_relaxed_offer_full() {
        let q = CompoundQueue::with_parallelism(4, 2).unwrap();
        assert_eq!(q.fill_all(|| 1u64), 4);
        assert_eq!(q.relaxed_offer(9), Err(9));
    }

    #[test]
    fn test_poll_drains_all_lanes() {
        let q = CompoundQueue::with_parallelism(64, 4).unwrap();
        for i in 0..40u64 {
            assert!(q.offer(i).is_ok());
        }
        let mut got = Vec::new();
        while let Some(v) = q.poll() {
            got.push(v);
        }
        got.sort_unstable();
        assert_eq!(got, (0..40).collect::<Vec<_>>());
        assert!(q.is_empty());
    }

    #[test]
    fn test_peek_matches_poll() {
        let q = CompoundQueue::with_parallelism(16, 2).unwrap();
        assert_eq!(q.peek(), None);
        q.offer(5u64).unwrap();
        let peeked = q.peek();
        assert_eq!(peeked, q.poll());
        assert_eq!(q.relaxed_peek(), None);
    }

    #[test]
    fn test_fill_and_drain_round_trip() {
        let q = CompoundQueue::with_parallelism(32, 4).unwrap();

        let mut next = 0u64;
        let filled = q.fill(
            || {
                let v = next;
                next += 1;
                v
            },
            20,
        );
        assert_eq!(filled, 20);
        assert_eq!(q.size(), 20);

        let mut got = Vec::new();
        let drained = q.drain(|v| got.push(v), 64);
        assert_eq!(drained, 20);
        got.sort_unstable();
        assert_eq!(got, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_fill_spills_past_home_lane() {
        // Two lanes of two: a fill of four must use both lanes.
        let q = CompoundQueue::with_parallelism(4, 2).unwrap();
        assert_eq!(q.fill_all(|| 1u64), 4);
        assert_eq!(q.fill(|| 1u64, 1), 0);
    }

    #[test]
    fn test_drain_zero_and_empty() {
        let q = CompoundQueue::<u64>::with_parallelism(16, 2).unwrap();
        assert_eq!(q.drain(|_| {}, 0), 0);
        assert_eq!(q.drain_all(|_| {}), 0);
        assert_eq!(q.fill(|| 1, 0), 0);
    }

    #[test]
    fn test_construction_errors() {
        assert!(matches!(
            CompoundQueue::<u64>::with_parallelism(0, 4),
            Err(QueueError::ZeroCapacity)
        ));
        assert!(matches!(
            CompoundQueue::<u64>::with_parallelism(1024, 0),
            Err(QueueError::ZeroParallelism)
        ));
        assert!(matches!(
            CompoundQueue::<u64>::with_parallelism(4, 4),
            Err(QueueError::CapacityTooSmall { capacity: 4, lanes: 4 })
        ));
    }

    #[test]
    fn test_default_parallelism_is_power_of_two() {
        let q = CompoundQueue::<u64>::new(1 << 16).unwrap();
        assert!(q.lanes().is_power_of_two());
        assert_eq!(q.capacity(), 1 << 16);
    }

    #[test]
    fn test_metrics_aggregation() {
        let q = CompoundQueue::with_config(Config::new(16, 2).with_metrics()).unwrap();
        for i in 0..10u64 {
            q.offer(i).unwrap();
        }
        while q.poll().is_some() {}

        let m = q.metrics();
        assert_eq!(m.offered, 10);
        assert_eq!(m.polled, 10);
    }
}
