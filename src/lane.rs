use crate::invariants::{
    debug_assert_bounded_count, debug_assert_claim_in_bound, debug_assert_cursor_monotonic,
    debug_assert_slot_vacant,
};
use crate::Metrics;
use std::cell::UnsafeCell;
use std::hint;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// This MPSC array queue uses a claim/publish protocol:
//
// ## Sequence Numbers
//
// `producer_index` and `consumer_index` are unbounded u64 sequence numbers;
// the slot index is `sequence & mask`, computed only on access. Each slot
// additionally carries its own publish marker: after writing position `p`, the
// claiming producer stores `p + 1` into the slot's `seq`. The marker values a
// slot takes over its lifetime are strictly increasing and unique per
// position, so a consumer at position `h` recognizes its element by
// `seq == h + 1` and can never confuse it with an element from an earlier lap.
//
// ## Producer (claim path)
//
// 1. Load `producer_index` with Relaxed.
// 2. Check it against `producer_limit`, a cached copy of
//    `consumer_index + capacity`. On a miss, reload `consumer_index` with
//    Acquire, recompute the limit, and republish the cache with Release.
//    The Release/Acquire pair on the cache matters: it forwards the
//    synchronizes-with edge from the consumer's cursor store to producers
//    that only ever see the cached bound, so slot reuse stays race-free.
// 3. CAS `producer_index` forward by one (Relaxed; the claim itself carries
//    no data). A lost CAS means another producer took the position.
// 4. Write the element, then store the slot marker with Release.
//
// ## Consumer (read path)
//
// 1. Load `consumer_index` with Relaxed (single writer: the consumer).
// 2. Load the head slot's marker with Acquire. A match synchronizes with the
//    producer's Release store, making the element write visible.
// 3. Move the element out, then store `consumer_index` with Release,
//    publishing the vacated slot to producers.
//
// A claimed-but-unpublished head slot is the one transient state: strict
// poll/peek spin it out (the wait is bounded by one producer's store),
// relaxed variants report empty instead.
//
// =============================================================================

/// Outcome of a single bounded offer attempt.
///
/// The `Full`/`Lost` split is load-bearing: full is a capacity verdict, lost
/// is transient contention. Callers that retry only on `Lost` cannot livelock
/// on a genuinely full queue. Failed attempts hand the element back.
#[derive(Debug, PartialEq, Eq)]
pub enum FastOffer<T> {
    /// The element was enqueued.
    Enqueued,
    /// Every slot was occupied at the capacity check.
    Full(T),
    /// Another producer claimed the position first.
    Lost(T),
}

impl<T> FastOffer<T> {
    /// Returns `true` for [`FastOffer::Enqueued`].
    #[inline]
    pub fn is_enqueued(&self) -> bool {
        matches!(self, FastOffer::Enqueued)
    }
}

/// One slot: a publish marker plus the element storage it guards.
struct Slot<T> {
    seq: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Bounded MPSC array queue - a single lane of the compound queue.
///
/// Any number of producers claim positions by CAS on a shared cursor; exactly
/// one consumer reads. All operations are lock-free, and everything except
/// the strict [`offer`](Lane::offer) is wait-free.
///
/// Layout: the producer cursor, the cached producer bound, and the consumer
/// cursor each sit on their own cache line so producer traffic never falsely
/// shares with the consumer.
#[repr(C)]
pub struct Lane<T> {
    // === PRODUCER HOT === (128-byte aligned)
    /// Claim cursor, CAS-advanced by any producer.
    producer_index: CacheAligned<AtomicU64>,
    /// Cached upper bound on claims (`consumer_index + capacity`).
    producer_limit: CacheAligned<AtomicU64>,

    // === CONSUMER HOT === (128-byte aligned)
    /// Read cursor, written only by the consumer.
    consumer_index: CacheAligned<AtomicU64>,

    // === COLD ===
    mask: usize,
    enable_metrics: bool,
    metrics: Metrics,

    // === DATA BUFFER ===
    /// Fixed-size slot array. `Box<[Slot<T>]>` because the size never
    /// changes after construction.
    buffer: Box<[Slot<T>]>,
}

// Safety: slots are handed between threads by the claim/publish protocol
// above; the element type only needs to be Send.
unsafe impl<T: Send> Send for Lane<T> {}
unsafe impl<T: Send> Sync for Lane<T> {}

impl<T> Lane<T> {
    /// Creates a lane with the given capacity, rounded up to a power of two
    /// with a floor of two slots.
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, false)
    }

    /// Same as [`Lane::new`], with the statistics counters enabled.
    pub fn with_metrics(capacity: usize) -> Self {
        Self::build(capacity, true)
    }

    fn build(capacity: usize, enable_metrics: bool) -> Self {
        let capacity = capacity.max(2).next_power_of_two();

        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, Slot::new);
        let buffer = buffer.into_boxed_slice();

        Self {
            producer_index: CacheAligned::new(AtomicU64::new(0)),
            producer_limit: CacheAligned::new(AtomicU64::new(capacity as u64)),
            consumer_index: CacheAligned::new(AtomicU64::new(0)),
            mask: capacity - 1,
            enable_metrics,
            metrics: Metrics::new(),
            buffer,
        }
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    /// Returns the lane capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Best-effort element count, clamped to `[0, capacity]`.
    ///
    /// Not linearizable: concurrent offers and polls can make the snapshot
    /// stale in either direction, but never outside the clamp.
    pub fn size(&self) -> usize {
        let p = self.producer_index.load(Ordering::Relaxed);
        let h = self.consumer_index.load(Ordering::Relaxed);
        (p.saturating_sub(h) as usize).min(self.buffer.len())
    }

    /// Returns `true` if the lane is observed empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.producer_index.load(Ordering::Relaxed) == self.consumer_index.load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Strict offer: retries while the claim CAS is contended, fails only
    /// when the lane is full. A failed offer hands the element back.
    pub fn offer(&self, e: T) -> Result<(), T> {
        let capacity = self.buffer.len() as u64;
        let mut limit = self.producer_limit.load(Ordering::Acquire);

        let claimed = loop {
            let p = self.producer_index.load(Ordering::Relaxed);
            if p >= limit {
                let h = self.consumer_index.load(Ordering::Acquire);
                limit = h.wrapping_add(capacity);
                if p >= limit {
                    if self.enable_metrics {
                        self.metrics.add_rejected_full(1);
                    }
                    return Err(e);
                }
                self.producer_limit.store(limit, Ordering::Release);
            }
            debug_assert_claim_in_bound!(p, limit);
            match self.producer_index.compare_exchange_weak(
                p,
                p.wrapping_add(1),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break p,
                Err(_) => {
                    // Another producer took the position; retry.
                }
            }
        };

        self.publish(claimed, e);
        if self.enable_metrics {
            self.metrics.add_offered(1);
        }
        Ok(())
    }

    /// One bounded offer attempt, distinguishing a full lane from a lost
    /// claim race. See [`FastOffer`].
    pub fn fail_fast_offer(&self, e: T) -> FastOffer<T> {
        let capacity = self.buffer.len() as u64;
        let mut limit = self.producer_limit.load(Ordering::Acquire);

        let p = self.producer_index.load(Ordering::Relaxed);
        if p >= limit {
            let h = self.consumer_index.load(Ordering::Acquire);
            limit = h.wrapping_add(capacity);
            if p >= limit {
                if self.enable_metrics {
                    self.metrics.add_rejected_full(1);
                }
                return FastOffer::Full(e);
            }
            self.producer_limit.store(limit, Ordering::Release);
        }
        debug_assert_claim_in_bound!(p, limit);

        if self
            .producer_index
            .compare_exchange(p, p.wrapping_add(1), Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            if self.enable_metrics {
                self.metrics.add_lost_races(1);
            }
            return FastOffer::Lost(e);
        }

        self.publish(p, e);
        if self.enable_metrics {
            self.metrics.add_offered(1);
        }
        FastOffer::Enqueued
    }

    /// Relaxed offer: bounded steps, may refuse under contention even when
    /// the lane has room.
    #[inline]
    pub fn relaxed_offer(&self, e: T) -> Result<(), T> {
        match self.fail_fast_offer(e) {
            FastOffer::Enqueued => Ok(()),
            FastOffer::Full(e) | FastOffer::Lost(e) => Err(e),
        }
    }

    /// Claims up to `limit` positions in one CAS and publishes an element
    /// from `supplier` into each. Returns the number enqueued; `0` when the
    /// lane is full or `limit` is zero.
    pub fn fill<F>(&self, mut supplier: F, limit: usize) -> usize
    where
        F: FnMut() -> T,
    {
        if limit == 0 {
            return 0;
        }
        let capacity = self.buffer.len() as u64;

        let (start, claimed) = loop {
            let p = self.producer_index.load(Ordering::Relaxed);
            let mut bound = self.producer_limit.load(Ordering::Acquire);
            if p >= bound {
                let h = self.consumer_index.load(Ordering::Acquire);
                bound = h.wrapping_add(capacity);
                if p >= bound {
                    return 0;
                }
                self.producer_limit.store(bound, Ordering::Release);
            }
            let n = (bound.wrapping_sub(p) as usize).min(limit);
            debug_assert_bounded_count!(n, self.buffer.len());
            if self
                .producer_index
                .compare_exchange_weak(
                    p,
                    p.wrapping_add(n as u64),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break (p, n);
            }
        };

        for i in 0..claimed {
            self.publish(start.wrapping_add(i as u64), supplier());
        }
        if self.enable_metrics {
            self.metrics.add_offered(claimed as u64);
        }
        claimed
    }

    /// Writes the element into its claimed slot and publishes it.
    #[inline]
    fn publish(&self, pos: u64, e: T) {
        let slot = &self.buffer[(pos as usize) & self.mask];
        let marker = pos.wrapping_add(1);
        debug_assert_slot_vacant!(slot.seq.load(Ordering::Relaxed), marker);
        // SAFETY: the CAS granted this position exclusively to us, and the
        // capacity check proved the consumer has vacated the slot (the
        // Acquire edge on the consumer cursor, forwarded through the cached
        // bound, orders its last read before this write).
        unsafe {
            (*slot.value.get()).write(e);
        }
        slot.seq.store(marker, Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Strict poll: returns the head element, spinning out an in-flight
    /// publication if the head slot is claimed but not yet written.
    pub fn poll(&self) -> Option<T> {
        let h = self.consumer_index.load(Ordering::Relaxed);
        let slot = &self.buffer[(h as usize) & self.mask];
        let marker = h.wrapping_add(1);

        if slot.seq.load(Ordering::Acquire) != marker {
            if h == self.producer_index.load(Ordering::Acquire) {
                return None;
            }
            // A producer owns the head position but has not published yet;
            // the wait is bounded by that producer's single store.
            while slot.seq.load(Ordering::Acquire) != marker {
                hint::spin_loop();
            }
        }

        // SAFETY: the marker match synchronizes with the producer's publish,
        // and only the consumer moves elements out.
        let e = unsafe { (*slot.value.get()).assume_init_read() };
        debug_assert_cursor_monotonic!("consumer", h, marker);
        self.consumer_index.store(marker, Ordering::Release);
        if self.enable_metrics {
            self.metrics.add_polled(1);
        }
        Some(e)
    }

    /// Relaxed poll: returns `None` when the head slot is not yet published,
    /// even if the producer cursor has already moved past it.
    pub fn relaxed_poll(&self) -> Option<T> {
        let h = self.consumer_index.load(Ordering::Relaxed);
        let slot = &self.buffer[(h as usize) & self.mask];
        let marker = h.wrapping_add(1);

        if slot.seq.load(Ordering::Acquire) != marker {
            return None;
        }

        // SAFETY: as in `poll`.
        let e = unsafe { (*slot.value.get()).assume_init_read() };
        self.consumer_index.store(marker, Ordering::Release);
        if self.enable_metrics {
            self.metrics.add_polled(1);
        }
        Some(e)
    }

    /// Strict peek: clone of the head element without removing it.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let h = self.consumer_index.load(Ordering::Relaxed);
        let slot = &self.buffer[(h as usize) & self.mask];
        let marker = h.wrapping_add(1);

        if slot.seq.load(Ordering::Acquire) != marker {
            if h == self.producer_index.load(Ordering::Acquire) {
                return None;
            }
            while slot.seq.load(Ordering::Acquire) != marker {
                hint::spin_loop();
            }
        }

        // SAFETY: published slot; producers cannot reuse it until the
        // consumer cursor advances, which peek never does.
        Some(unsafe { (*slot.value.get()).assume_init_ref().clone() })
    }

    /// Relaxed peek: no spin on an in-flight publication.
    pub fn relaxed_peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let h = self.consumer_index.load(Ordering::Relaxed);
        let slot = &self.buffer[(h as usize) & self.mask];

        if slot.seq.load(Ordering::Acquire) != h.wrapping_add(1) {
            return None;
        }

        // SAFETY: as in `peek`.
        Some(unsafe { (*slot.value.get()).assume_init_ref().clone() })
    }

    // ---------------------------------------------------------------------
    // OBSERVABILITY
    // ---------------------------------------------------------------------

    /// Statistics snapshot; all zeros unless the lane was built with
    /// [`Lane::with_metrics`].
    pub fn metrics(&self) -> crate::MetricsSnapshot {
        if self.enable_metrics {
            self.metrics.snapshot()
        } else {
            crate::MetricsSnapshot::default()
        }
    }
}

impl<T> Drop for Lane<T> {
    fn drop(&mut self) {
        // Exclusive access: every producer call has returned, so every
        // claimed slot is published. Drop whatever was never polled.
        let h = self.consumer_index.load(Ordering::Relaxed);
        let p = self.producer_index.load(Ordering::Relaxed);
        let count = p.wrapping_sub(h) as usize;

        for i in 0..count {
            let idx = ((h as usize).wrapping_add(i)) & self.mask;
            unsafe {
                ptr::drop_in_place((*self.buffer[idx].value.get()).as_mut_ptr());
            }
        }
    }
}

// ---------------------------------------------------------------------
// HELPER: 128-byte cache-aligned wrapper
// ---------------------------------------------------------------------

/// Wrapper type that ensures 128-byte alignment to keep adjacent-line
/// prefetchers from dragging the producer and consumer cursors onto the
/// same effective line.
#[repr(align(128))]
struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
