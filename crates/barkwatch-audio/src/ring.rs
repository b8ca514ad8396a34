use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Bound on any single lock acquisition. A timed-out attempt degrades to
/// "no samples this call" instead of blocking the capture callback.
const LOCK_TIMEOUT: Duration = Duration::from_millis(5);

struct RingState {
    buf: Box<[i16]>,
    write: usize,
    read: usize,
    available: usize,
}

impl RingState {
    /// Copy up to `out.len()` samples starting at the read cursor. The
    /// caller decides whether to advance the cursor afterwards.
    fn copy_out(&self, out: &mut [i16]) -> usize {
        let n = out.len().min(self.available);
        let capacity = self.buf.len();
        let mut pos = self.read;
        for slot in out[..n].iter_mut() {
            *slot = self.buf[pos];
            pos = (pos + 1) % capacity;
        }
        n
    }
}

/// Shared circular buffer of raw samples decoupling the capture cadence
/// from the analysis cadence. Producer never blocks: on a full buffer the
/// newest samples are dropped and counted, favoring capture continuity.
pub struct SampleRing {
    state: Arc<Mutex<RingState>>,
    capacity: usize,
    overruns: Arc<AtomicU64>,
    overrun_samples: Arc<AtomicU64>,
    lock_timeouts: Arc<AtomicU64>,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(RingState {
                buf: vec![0i16; capacity].into_boxed_slice(),
                write: 0,
                read: 0,
                available: 0,
            })),
            capacity,
            overruns: Arc::new(AtomicU64::new(0)),
            overrun_samples: Arc::new(AtomicU64::new(0)),
            lock_timeouts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Split into the producer and consumer halves for separate threads.
    pub fn split(self) -> (RingProducer, RingConsumer) {
        let shared = Arc::new(self);
        (
            RingProducer {
                ring: Arc::clone(&shared),
            },
            RingConsumer { ring: shared },
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn overrun_samples(&self) -> u64 {
        self.overrun_samples.load(Ordering::Relaxed)
    }

    pub fn lock_timeouts(&self) -> u64 {
        self.lock_timeouts.load(Ordering::Relaxed)
    }

    fn write(&self, samples: &[i16]) -> usize {
        let Some(mut state) = self.state.try_lock_for(LOCK_TIMEOUT) else {
            self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
            return 0;
        };

        let space = self.capacity - state.available;
        let n = samples.len().min(space);
        let mut pos = state.write;
        for &sample in &samples[..n] {
            state.buf[pos] = sample;
            pos = (pos + 1) % self.capacity;
        }
        state.write = pos;
        state.available += n;
        drop(state);

        if n < samples.len() {
            let dropped = (samples.len() - n) as u64;
            self.overruns.fetch_add(1, Ordering::Relaxed);
            self.overrun_samples.fetch_add(dropped, Ordering::Relaxed);
            warn!("Sample ring full: dropped {} newest samples", dropped);
        }
        n
    }

    fn read(&self, out: &mut [i16]) -> usize {
        let Some(mut state) = self.state.try_lock_for(LOCK_TIMEOUT) else {
            self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
            return 0;
        };
        let n = state.copy_out(out);
        state.read = (state.read + n) % self.capacity;
        state.available -= n;
        n
    }

    fn peek(&self, out: &mut [i16]) -> usize {
        let Some(state) = self.state.try_lock_for(LOCK_TIMEOUT) else {
            self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
            return 0;
        };
        state.copy_out(out)
    }

    fn discard(&self, count: usize) -> usize {
        let Some(mut state) = self.state.try_lock_for(LOCK_TIMEOUT) else {
            self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
            return 0;
        };
        let n = count.min(state.available);
        state.read = (state.read + n) % self.capacity;
        state.available -= n;
        n
    }

    fn available(&self) -> usize {
        match self.state.try_lock_for(LOCK_TIMEOUT) {
            Some(state) => state.available,
            None => {
                self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.write = 0;
        state.read = 0;
        state.available = 0;
    }
}

/// Producer half, owned by the capture thread.
pub struct RingProducer {
    ring: Arc<SampleRing>,
}

impl RingProducer {
    /// Write as many samples as fit without overtaking the read cursor.
    /// Returns the count actually written; the remainder is dropped.
    pub fn write(&self, samples: &[i16]) -> usize {
        self.ring.write(samples)
    }

    pub fn overruns(&self) -> u64 {
        self.ring.overruns()
    }

    pub fn overrun_samples(&self) -> u64 {
        self.ring.overrun_samples()
    }
}

/// Consumer half, owned by the analysis task.
pub struct RingConsumer {
    ring: Arc<SampleRing>,
}

impl RingConsumer {
    /// Destructive read: drains up to `out.len()` samples.
    pub fn read(&self, out: &mut [i16]) -> usize {
        self.ring.read(out)
    }

    /// Non-destructive copy from the current read cursor.
    pub fn peek(&self, out: &mut [i16]) -> usize {
        self.ring.peek(out)
    }

    /// Advance the read cursor without copying. Returns samples skipped.
    pub fn discard(&self, count: usize) -> usize {
        self.ring.discard(count)
    }

    pub fn available(&self) -> usize {
        self.ring.available()
    }

    /// Reset to empty; used between a stop() and a subsequent start().
    pub fn clear(&self) {
        self.ring.clear()
    }

    pub fn lock_timeouts(&self) -> u64 {
        self.ring.lock_timeouts()
    }

    /// Read-only handle for a downstream streaming subsystem. Taps peek,
    /// never read, so they cannot starve the detection consumer.
    pub fn tap(&self) -> RingTap {
        RingTap {
            ring: Arc::clone(&self.ring),
        }
    }
}

/// Peek-only view of the ring for raw-audio consumers.
#[derive(Clone)]
pub struct RingTap {
    ring: Arc<SampleRing>,
}

impl RingTap {
    pub fn peek(&self, out: &mut [i16]) -> usize {
        self.ring.peek(out)
    }

    pub fn available(&self) -> usize {
        self.ring.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_round_trip() {
        let (producer, consumer) = SampleRing::new(64).split();
        let samples: Vec<i16> = (0..40).collect();
        assert_eq!(producer.write(&samples), 40);

        let mut out = vec![0i16; 40];
        assert_eq!(consumer.read(&mut out), 40);
        assert_eq!(out, samples);
        assert_eq!(consumer.available(), 0);
    }

    #[test]
    fn wrapping_preserves_order() {
        let (producer, consumer) = SampleRing::new(16).split();
        let mut next = 0i16;
        let mut expected = Vec::new();
        // Repeated partial fills and drains force cursor wraparound.
        for _ in 0..10 {
            let chunk: Vec<i16> = (next..next + 6).collect();
            next += 6;
            assert_eq!(producer.write(&chunk), 6);
            expected.extend_from_slice(&chunk);

            let mut out = vec![0i16; 6];
            assert_eq!(consumer.read(&mut out), 6);
            assert_eq!(out, expected.drain(..6).collect::<Vec<_>>());
        }
    }

    #[test]
    fn full_ring_drops_newest_without_blocking() {
        let (producer, consumer) = SampleRing::new(8).split();
        assert_eq!(producer.write(&[1i16; 8]), 8);
        assert_eq!(producer.write(&[2i16; 4]), 0);
        assert_eq!(producer.overruns(), 1);
        assert_eq!(producer.overrun_samples(), 4);
        assert_eq!(consumer.available(), 8);

        // The survivors are the oldest samples.
        let mut out = vec![0i16; 8];
        assert_eq!(consumer.read(&mut out), 8);
        assert!(out.iter().all(|&s| s == 1));
    }

    #[test]
    fn partial_write_keeps_oldest() {
        let (producer, consumer) = SampleRing::new(8).split();
        assert_eq!(producer.write(&[1i16; 6]), 6);
        // Only 2 of 4 fit; the newest 2 are dropped.
        assert_eq!(producer.write(&[2, 3, 4, 5]), 2);
        assert_eq!(producer.overrun_samples(), 2);

        let mut out = vec![0i16; 8];
        assert_eq!(consumer.read(&mut out), 8);
        assert_eq!(&out[6..], &[2, 3]);
    }

    #[test]
    fn peek_does_not_advance() {
        let (producer, consumer) = SampleRing::new(32).split();
        producer.write(&[7i16; 10]);

        let mut peeked = vec![0i16; 10];
        assert_eq!(consumer.peek(&mut peeked), 10);
        assert_eq!(consumer.available(), 10);

        let mut read = vec![0i16; 10];
        assert_eq!(consumer.read(&mut read), 10);
        assert_eq!(peeked, read);
        assert_eq!(consumer.available(), 0);
    }

    #[test]
    fn tap_sees_what_consumer_sees() {
        let (producer, consumer) = SampleRing::new(32).split();
        let tap = consumer.tap();
        producer.write(&[3i16; 12]);

        let mut via_tap = vec![0i16; 12];
        assert_eq!(tap.peek(&mut via_tap), 12);
        assert_eq!(consumer.available(), 12);
        assert!(via_tap.iter().all(|&s| s == 3));
    }

    #[test]
    fn discard_advances_read_cursor() {
        let (producer, consumer) = SampleRing::new(32).split();
        producer.write(&(0..20).collect::<Vec<i16>>());
        assert_eq!(consumer.discard(8), 8);

        let mut out = vec![0i16; 4];
        assert_eq!(consumer.read(&mut out), 4);
        assert_eq!(out, vec![8, 9, 10, 11]);
        // Discard past the end is clamped.
        assert_eq!(consumer.discard(100), 8);
    }

    #[test]
    fn sustained_overrun_never_exceeds_capacity() {
        let (producer, consumer) = SampleRing::new(128).split();
        let mut last_dropped = 0;
        for i in 0..50 {
            producer.write(&[i as i16; 48]);
            assert!(consumer.available() <= 128);
            let dropped = producer.overrun_samples();
            assert!(dropped >= last_dropped);
            last_dropped = dropped;
            if i % 4 == 0 {
                let mut out = vec![0i16; 32];
                consumer.read(&mut out);
            }
        }
        assert!(producer.overruns() > 0);
    }

    #[test]
    fn random_chunk_sizes_preserve_fifo_order() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let (producer, consumer) = SampleRing::new(256).split();
        let mut next = 0i16;
        let mut expected: Vec<i16> = Vec::new();
        let mut received: Vec<i16> = Vec::new();

        for _ in 0..500 {
            let write_len = rng.gen_range(1..=64);
            let chunk: Vec<i16> = (0..write_len)
                .map(|_| {
                    let v = next;
                    next = next.wrapping_add(1);
                    v
                })
                .collect();
            let written = producer.write(&chunk);
            expected.extend_from_slice(&chunk[..written]);

            let read_len = rng.gen_range(1..=64);
            let mut out = vec![0i16; read_len];
            let got = consumer.read(&mut out);
            received.extend_from_slice(&out[..got]);
        }
        let mut out = vec![0i16; 256];
        let got = consumer.read(&mut out);
        received.extend_from_slice(&out[..got]);

        assert_eq!(received, expected);
    }

    #[test]
    fn clear_resets_to_empty() {
        let (producer, consumer) = SampleRing::new(16).split();
        producer.write(&[5i16; 12]);
        consumer.clear();
        assert_eq!(consumer.available(), 0);
        // Ring is immediately usable again.
        assert_eq!(producer.write(&[6i16; 16]), 16);
    }
}
