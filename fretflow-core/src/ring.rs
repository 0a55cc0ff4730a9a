//! # Sample Ring Buffer
//!
//! Single-producer / single-consumer ring of `f32` samples connecting the
//! audio callback to the analysis loop without locks.
//!
//! The producer never blocks and never fails: when the consumer falls more
//! than `capacity` samples behind, the oldest unread samples are overwritten
//! and counted in [`RingConsumer::dropped_samples`].
//!
//! The consumer reads overlapping windows: [`RingConsumer::read_window`]
//! returns the newest `size` samples once at least `hop` samples arrived
//! since the previous window started, then moves its cursor to
//! `window_start + hop`. A consumer that falls behind therefore skips stale
//! windows instead of accumulating latency.
//!
//! Slots are atomics so the producer may overwrite a slot the consumer is
//! copying; a seqlock-style `claimed`/`written` pair detects that case and
//! the copy is retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering, fence};

/// Copy attempts before a window read gives up and reports `Empty`.
const MAX_READ_RETRIES: usize = 4;

struct Shared {
    slots: Box<[AtomicU32]>,
    /// Samples the producer is about to write, published before the slot stores.
    claimed: AtomicU64,
    /// Samples fully written, published after the slot stores.
    written: AtomicU64,
    /// Consumer cursor; everything before it has been consumed or skipped.
    read: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    fn slot(&self, position: u64) -> &AtomicU32 {
        &self.slots[(position % self.capacity()) as usize]
    }
}

/// Creates a ring holding up to `capacity` samples.
///
/// # Panics
/// If `capacity` is zero.
pub fn ring_buffer(capacity: usize) -> (RingProducer, RingConsumer) {
    assert!(capacity > 0, "ring buffer capacity must be non-zero");
    let shared = Arc::new(Shared {
        slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
        claimed: AtomicU64::new(0),
        written: AtomicU64::new(0),
        read: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
        closed: AtomicBool::new(false),
    });
    (
        RingProducer {
            shared: Arc::clone(&shared),
            written: 0,
        },
        RingConsumer {
            shared,
            cursor: 0,
            window: Vec::new(),
        },
    )
}

/// Writing half, owned by the audio source.
pub struct RingProducer {
    shared: Arc<Shared>,
    written: u64,
}

impl RingProducer {
    /// Appends `samples`. Never blocks and never allocates.
    pub fn write(&mut self, samples: &[f32]) {
        self.write_iter(samples.iter().copied());
    }

    /// Appends every sample yielded by `samples` with a single publish.
    pub fn write_iter<I>(&mut self, samples: I)
    where
        I: ExactSizeIterator<Item = f32>,
    {
        let len = samples.len() as u64;
        if len == 0 {
            return;
        }
        let shared = &*self.shared;
        let capacity = shared.capacity();
        let start = self.written;
        let end = start + len;

        shared.claimed.store(end, Ordering::Relaxed);
        fence(Ordering::Release);

        // Only the last `capacity` samples of an oversized write survive.
        let skip = len.saturating_sub(capacity);
        for (offset, sample) in samples.enumerate().skip(skip as usize) {
            shared
                .slot(start + offset as u64)
                .store(sample.to_bits(), Ordering::Relaxed);
        }
        shared.written.store(end, Ordering::Release);
        self.written = end;

        let read = shared.read.load(Ordering::Acquire);
        let oldest_unread = read.max(start.saturating_sub(capacity));
        let lost = end.saturating_sub(capacity).saturating_sub(oldest_unread);
        if lost > 0 {
            shared.dropped.fetch_add(lost, Ordering::Relaxed);
        }
    }

    /// Total samples written so far.
    pub fn position(&self) -> u64 {
        self.written
    }

    /// `true` once either side closed the ring.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Handle that can close the ring from another context.
    pub fn closer(&self) -> RingCloser {
        RingCloser {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for RingProducer {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Closes a ring without owning either half.
#[derive(Clone)]
pub struct RingCloser {
    shared: Arc<Shared>,
}

impl RingCloser {
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Result of [`RingConsumer::read_window`].
#[derive(Debug, PartialEq)]
pub enum WindowRead<'a> {
    /// A full window is available.
    Ready(Window<'a>),
    /// Not enough new samples yet.
    Empty,
    /// The ring was closed and no further full window will arrive.
    Closed,
}

/// A window of samples borrowed from the consumer.
#[derive(Debug, PartialEq)]
pub struct Window<'a> {
    /// Samples in capture order.
    pub samples: &'a [f32],
    /// Absolute sample position one past the last sample of the window.
    pub end: u64,
}

/// Reading half, owned by the analysis loop.
pub struct RingConsumer {
    shared: Arc<Shared>,
    cursor: u64,
    window: Vec<f32>,
}

impl RingConsumer {
    /// Returns the newest `size` samples once `size` samples past the
    /// cursor are available, and advances the cursor to `start + hop`.
    ///
    /// `size` larger than the capacity can never be satisfied and reads as
    /// `Empty`. `hop` is clamped to `1..=size`.
    pub fn read_window(&mut self, size: usize, hop: usize) -> WindowRead<'_> {
        let shared = &*self.shared;
        let capacity = shared.capacity();
        let size_u = size as u64;
        if size == 0 || size_u > capacity {
            return self.empty_or_closed();
        }
        let hop = hop.clamp(1, size) as u64;

        for _ in 0..MAX_READ_RETRIES {
            let written = shared.written.load(Ordering::Acquire);
            if written < self.cursor + size_u {
                return self.empty_or_closed();
            }
            let start = written - size_u;

            self.window.clear();
            self.window.extend(
                (start..written).map(|pos| f32::from_bits(shared.slot(pos).load(Ordering::Relaxed))),
            );
            fence(Ordering::Acquire);

            let claimed = shared.claimed.load(Ordering::Relaxed);
            if claimed.saturating_sub(start) <= capacity {
                self.cursor = start + hop;
                shared.read.store(self.cursor, Ordering::Release);
                return WindowRead::Ready(Window {
                    samples: &self.window,
                    end: written,
                });
            }
        }
        // The producer lapped every attempt; try again on the next poll.
        WindowRead::Empty
    }

    fn empty_or_closed(&self) -> WindowRead<'static> {
        if self.shared.closed.load(Ordering::Acquire) {
            WindowRead::Closed
        } else {
            WindowRead::Empty
        }
    }

    /// Discards everything written so far.
    pub fn clear(&mut self) {
        self.cursor = self.shared.written.load(Ordering::Acquire);
        self.shared.read.store(self.cursor, Ordering::Release);
    }

    /// Samples overwritten before the consumer reached them.
    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Samples written but not yet passed by the cursor.
    pub fn available(&self) -> u64 {
        self.shared
            .written
            .load(Ordering::Acquire)
            .saturating_sub(self.cursor)
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn closer(&self) -> RingCloser {
        RingCloser {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ramp(range: std::ops::Range<u32>) -> Vec<f32> {
        range.map(|i| i as f32).collect()
    }

    fn ready(read: WindowRead<'_>) -> (Vec<f32>, u64) {
        match read {
            WindowRead::Ready(window) => (window.samples.to_vec(), window.end),
            other => panic!("expected a window, got {other:?}"),
        }
    }

    #[test]
    fn round_trip_without_overwrite() {
        let (mut producer, mut consumer) = ring_buffer(64);
        let input = ramp(0..40);
        producer.write(&input);

        let (window, end) = ready(consumer.read_window(40, 40));
        assert_eq!(window, input);
        assert_eq!(end, 40);
        assert_eq!(consumer.dropped_samples(), 0);
    }

    #[test]
    fn smaller_window_returns_newest_samples_in_order() {
        let (mut producer, mut consumer) = ring_buffer(64);
        producer.write(&ramp(0..40));
        let (window, _) = ready(consumer.read_window(16, 8));
        assert_eq!(window, ramp(24..40));
    }

    #[test]
    fn empty_until_window_fills() {
        let (mut producer, mut consumer) = ring_buffer(64);
        producer.write(&ramp(0..10));
        assert_eq!(consumer.read_window(16, 4), WindowRead::Empty);
        producer.write(&ramp(10..16));
        let (window, _) = ready(consumer.read_window(16, 4));
        assert_eq!(window, ramp(0..16));
    }

    #[test]
    fn hop_controls_overlap() {
        let (mut producer, mut consumer) = ring_buffer(64);
        producer.write(&ramp(0..16));
        ready(consumer.read_window(16, 4));

        producer.write(&ramp(16..19));
        assert_eq!(consumer.read_window(16, 4), WindowRead::Empty);

        producer.write(&ramp(19..20));
        let (window, end) = ready(consumer.read_window(16, 4));
        assert_eq!(window, ramp(4..20));
        assert_eq!(end, 20);
    }

    #[test]
    fn wraps_around_capacity() {
        let (mut producer, mut consumer) = ring_buffer(16);
        for chunk in 0..5 {
            producer.write(&ramp(chunk * 10..chunk * 10 + 10));
            let (window, _) = ready(consumer.read_window(10, 10));
            assert_eq!(window, ramp(chunk * 10..chunk * 10 + 10));
        }
        assert_eq!(consumer.dropped_samples(), 0);
    }

    #[test]
    fn overrun_overwrites_oldest_and_counts() {
        let (mut producer, mut consumer) = ring_buffer(16);
        producer.write(&ramp(0..10));
        producer.write(&ramp(10..20));
        assert_eq!(consumer.dropped_samples(), 4);

        let (window, _) = ready(consumer.read_window(16, 16));
        assert_eq!(window, ramp(4..20));

        // Oversized writes keep only the tail.
        producer.write(&ramp(20..60));
        let (window, _) = ready(consumer.read_window(16, 16));
        assert_eq!(window, ramp(44..60));
        assert_eq!(consumer.dropped_samples(), 4 + 24);
    }

    #[test]
    fn consumed_samples_are_not_counted_as_dropped() {
        let (mut producer, mut consumer) = ring_buffer(16);
        producer.write(&ramp(0..16));
        ready(consumer.read_window(16, 16));
        producer.write(&ramp(16..32));
        assert_eq!(consumer.dropped_samples(), 0);
    }

    #[test]
    fn clear_discards_pending_samples() {
        let (mut producer, mut consumer) = ring_buffer(32);
        producer.write(&ramp(0..20));
        consumer.clear();
        assert_eq!(consumer.available(), 0);
        assert_eq!(consumer.read_window(8, 8), WindowRead::Empty);
    }

    #[test]
    fn closed_after_remaining_windows() {
        let (mut producer, mut consumer) = ring_buffer(32);
        producer.write(&ramp(0..8));
        drop(producer);
        ready(consumer.read_window(8, 8));
        assert_eq!(consumer.read_window(8, 8), WindowRead::Closed);
    }

    #[test]
    fn closer_is_visible_to_both_halves() {
        let (producer, consumer) = ring_buffer(8);
        let closer = consumer.closer();
        assert!(!producer.is_closed());
        closer.close();
        assert!(producer.is_closed());
        assert!(consumer.is_closed());
    }

    #[test]
    fn oversized_window_is_never_ready() {
        let (mut producer, mut consumer) = ring_buffer(8);
        producer.write(&ramp(0..8));
        assert_eq!(consumer.read_window(9, 1), WindowRead::Empty);
    }

    #[test]
    fn concurrent_windows_are_contiguous() {
        let (mut producer, mut consumer) = ring_buffer(4096);
        let writer = thread::spawn(move || {
            for chunk in 0..400u32 {
                producer.write(&ramp(chunk * 64..chunk * 64 + 64));
                if chunk % 16 == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut windows = 0;
        loop {
            match consumer.read_window(256, 64) {
                WindowRead::Ready(window) => {
                    for pair in window.samples.windows(2) {
                        assert_eq!(pair[1] - pair[0], 1.0);
                    }
                    assert_eq!(*window.samples.last().unwrap() as u64 + 1, window.end);
                    windows += 1;
                }
                WindowRead::Empty => thread::yield_now(),
                WindowRead::Closed => break,
            }
        }
        writer.join().unwrap();
        assert!(windows > 0);
    }
}
