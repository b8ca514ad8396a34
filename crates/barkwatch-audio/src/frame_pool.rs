use tracing::trace;

/// One pooled capture frame: fixed-length PCM samples plus metadata
/// computed at capture time.
#[derive(Debug)]
pub struct FrameSlot {
    samples: Vec<i16>,
    sample_count: usize,
    timestamp_ms: u64,
    rms: f32,
    peak: f32,
    in_use: bool,
}

impl FrameSlot {
    pub fn samples(&self) -> &[i16] {
        &self.samples[..self.sample_count]
    }

    pub fn buffer_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn rms(&self) -> f32 {
        self.rms
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    /// Record how much of the buffer a device read filled, stamp it, and
    /// precompute levels.
    pub fn commit(&mut self, sample_count: usize, timestamp_ms: u64) {
        debug_assert!(sample_count <= self.samples.len());
        self.sample_count = sample_count;
        self.timestamp_ms = timestamp_ms;
        let (rms, peak) = measure_levels(&self.samples[..sample_count]);
        self.rms = rms;
        self.peak = peak;
    }
}

/// Stable handle to a pool slot. Not cloneable: exactly one consumer may
/// borrow a frame at a time, and the handle must come back via `release`.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameHandle(usize);

/// Small fixed arena of preallocated frame buffers, reused in round-robin
/// order. Pool size bounds worst-case frame memory; no per-frame
/// allocation happens after construction.
pub struct FramePool {
    slots: Vec<FrameSlot>,
    next: usize,
    exhausted: u64,
}

impl FramePool {
    pub fn new(pool_size: usize, frame_size_samples: usize) -> Self {
        let slots = (0..pool_size)
            .map(|_| FrameSlot {
                samples: vec![0i16; frame_size_samples],
                sample_count: 0,
                timestamp_ms: 0,
                rms: 0.0,
                peak: 0.0,
                in_use: false,
            })
            .collect();
        Self {
            slots,
            next: 0,
            exhausted: 0,
        }
    }

    /// Next slot in round-robin order, or `None` when the slot is still in
    /// flight (the consumer has fallen a full pool behind).
    pub fn acquire(&mut self) -> Option<FrameHandle> {
        let idx = self.next;
        if self.slots[idx].in_use {
            self.exhausted += 1;
            trace!("Frame pool exhausted at slot {}", idx);
            return None;
        }
        self.slots[idx].in_use = true;
        self.next = (idx + 1) % self.slots.len();
        Some(FrameHandle(idx))
    }

    pub fn frame(&self, handle: &FrameHandle) -> &FrameSlot {
        &self.slots[handle.0]
    }

    pub fn frame_mut(&mut self, handle: &FrameHandle) -> &mut FrameSlot {
        &mut self.slots[handle.0]
    }

    /// Return a slot to the pool. Consuming the handle makes double
    /// release a compile error rather than a runtime hazard.
    pub fn release(&mut self, handle: FrameHandle) {
        self.slots[handle.0].in_use = false;
    }

    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }

    pub fn exhausted_count(&self) -> u64 {
        self.exhausted
    }
}

/// RMS and peak of a frame, both normalized to 0.0-1.0.
pub fn measure_levels(samples: &[i16]) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum_squares = 0.0f64;
    let mut max_val = 0i32;
    for &sample in samples {
        let s = sample as i32;
        sum_squares += (s as f64) * (s as f64);
        max_val = max_val.max(s.abs());
    }
    let rms = ((sum_squares / samples.len() as f64).sqrt() / 32768.0) as f32;
    let peak = max_val as f32 / 32768.0;
    (rms, peak)
}
