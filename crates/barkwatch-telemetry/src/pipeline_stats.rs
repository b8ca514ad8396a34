use parking_lot::RwLock;
use std::sync::atomic::{AtomicI16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared per-stage counters for cross-thread pipeline monitoring.
///
/// Every field is lock-free; the capture callback and the analysis task
/// update it without contending with readers.
#[derive(Clone)]
pub struct PipelineStats {
    // Capture stage
    pub frames_captured: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
    pub samples_captured: Arc<AtomicU64>,
    pub ring_overruns: Arc<AtomicU64>,
    pub overrun_samples: Arc<AtomicU64>,
    pub pool_exhausted: Arc<AtomicU64>,
    pub capture_errors: Arc<AtomicU64>,
    pub silent_frames: Arc<AtomicU64>,
    pub active_frames: Arc<AtomicU64>,
    pub last_frame_time: Arc<RwLock<Option<Instant>>>,

    // Audio level monitoring
    pub current_peak: Arc<AtomicI16>,
    pub current_rms: Arc<AtomicU64>,   // RMS * 1000 for precision
    pub audio_level_db: Arc<AtomicI16>, // dB * 10

    // Analysis stage
    pub cycles_completed: Arc<AtomicU64>,
    pub cycles_skipped: Arc<AtomicU64>,
    pub classifier_errors: Arc<AtomicU64>,
    pub lock_timeouts: Arc<AtomicU64>,
    pub events_emitted: Arc<AtomicU64>,
    pub events_dropped: Arc<AtomicU64>,
    pub gate_activations: Arc<AtomicU64>,

    // Frame rates, fps * 10 fixed-point
    pub capture_fps: Arc<AtomicU64>,
    pub analysis_fps: Arc<AtomicU64>,

    // Per-stage latency EMAs, microseconds
    pub preprocess_us: Arc<AtomicU64>,
    pub extract_us: Arc<AtomicU64>,
    pub classify_us: Arc<AtomicU64>,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self {
            frames_captured: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            samples_captured: Arc::new(AtomicU64::new(0)),
            ring_overruns: Arc::new(AtomicU64::new(0)),
            overrun_samples: Arc::new(AtomicU64::new(0)),
            pool_exhausted: Arc::new(AtomicU64::new(0)),
            capture_errors: Arc::new(AtomicU64::new(0)),
            silent_frames: Arc::new(AtomicU64::new(0)),
            active_frames: Arc::new(AtomicU64::new(0)),
            last_frame_time: Arc::new(RwLock::new(None)),

            current_peak: Arc::new(AtomicI16::new(0)),
            current_rms: Arc::new(AtomicU64::new(0)),
            audio_level_db: Arc::new(AtomicI16::new(-900)),

            cycles_completed: Arc::new(AtomicU64::new(0)),
            cycles_skipped: Arc::new(AtomicU64::new(0)),
            classifier_errors: Arc::new(AtomicU64::new(0)),
            lock_timeouts: Arc::new(AtomicU64::new(0)),
            events_emitted: Arc::new(AtomicU64::new(0)),
            events_dropped: Arc::new(AtomicU64::new(0)),
            gate_activations: Arc::new(AtomicU64::new(0)),

            capture_fps: Arc::new(AtomicU64::new(0)),
            analysis_fps: Arc::new(AtomicU64::new(0)),

            preprocess_us: Arc::new(AtomicU64::new(0)),
            extract_us: Arc::new(AtomicU64::new(0)),
            classify_us: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl PipelineStats {
    pub fn update_audio_level(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }

        let peak = samples.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0) as i16;
        self.current_peak.store(peak, Ordering::Relaxed);

        let sum: i64 = samples.iter().map(|&s| s as i64 * s as i64).sum();
        let rms = ((sum as f64 / samples.len() as f64).sqrt() * 1000.0) as u64;
        self.current_rms.store(rms, Ordering::Relaxed);

        let db = if peak > 0 {
            (20.0 * (peak as f64 / 32768.0).log10() * 10.0) as i16
        } else {
            -900
        };
        self.audio_level_db.store(db, Ordering::Relaxed);
    }

    pub fn update_capture_fps(&self, fps: f64) {
        self.capture_fps
            .store((fps * 10.0) as u64, Ordering::Relaxed);
    }

    pub fn update_analysis_fps(&self, fps: f64) {
        self.analysis_fps
            .store((fps * 10.0) as u64, Ordering::Relaxed);
    }

    /// Record a stage latency sample into a 1/8-weight running mean.
    pub fn record_stage_us(slot: &AtomicU64, sample_us: u64) {
        let prev = slot.load(Ordering::Relaxed);
        let next = if prev == 0 {
            sample_us
        } else {
            prev - prev / 8 + sample_us / 8
        };
        slot.store(next, Ordering::Relaxed);
    }

    pub fn mark_frame_time(&self) {
        *self.last_frame_time.write() = Some(Instant::now());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            ring_overruns: self.ring_overruns.load(Ordering::Relaxed),
            overrun_samples: self.overrun_samples.load(Ordering::Relaxed),
            pool_exhausted: self.pool_exhausted.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            classifier_errors: self.classifier_errors.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            gate_activations: self.gate_activations.load(Ordering::Relaxed),
            capture_fps: self.capture_fps.load(Ordering::Relaxed) as f64 / 10.0,
            analysis_fps: self.analysis_fps.load(Ordering::Relaxed) as f64 / 10.0,
            audio_level_db: self.audio_level_db.load(Ordering::Relaxed) as f64 / 10.0,
            preprocess_us: self.preprocess_us.load(Ordering::Relaxed),
            extract_us: self.extract_us.load(Ordering::Relaxed),
            classify_us: self.classify_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters, cheap to log or serialize.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub ring_overruns: u64,
    pub overrun_samples: u64,
    pub pool_exhausted: u64,
    pub capture_errors: u64,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub classifier_errors: u64,
    pub lock_timeouts: u64,
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub gate_activations: u64,
    pub capture_fps: f64,
    pub analysis_fps: f64,
    pub audio_level_db: f64,
    pub preprocess_us: u64,
    pub extract_us: u64,
    pub classify_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_level_tracks_peak_and_rms() {
        let stats = PipelineStats::default();
        stats.update_audio_level(&[0, 16384, -16384, 0]);
        assert_eq!(stats.current_peak.load(Ordering::Relaxed), 16384);
        assert!(stats.current_rms.load(Ordering::Relaxed) > 0);
        // Half-scale peak is about -6 dB.
        let db = stats.audio_level_db.load(Ordering::Relaxed) as f64 / 10.0;
        assert!((-7.0..=-5.0).contains(&db), "db={db}");
    }

    #[test]
    fn silent_input_pins_level_floor() {
        let stats = PipelineStats::default();
        stats.update_audio_level(&[0i16; 320]);
        assert_eq!(stats.audio_level_db.load(Ordering::Relaxed), -900);
    }

    #[test]
    fn stage_latency_ema_converges() {
        let slot = AtomicU64::new(0);
        PipelineStats::record_stage_us(&slot, 800);
        assert_eq!(slot.load(Ordering::Relaxed), 800);
        for _ in 0..64 {
            PipelineStats::record_stage_us(&slot, 100);
        }
        let v = slot.load(Ordering::Relaxed);
        assert!(v < 200, "ema did not converge: {v}");
    }

    #[test]
    fn snapshot_reflects_counters() {
        let stats = PipelineStats::default();
        stats.frames_captured.store(7, Ordering::Relaxed);
        stats.ring_overruns.store(2, Ordering::Relaxed);
        let snap = stats.snapshot();
        assert_eq!(snap.frames_captured, 7);
        assert_eq!(snap.ring_overruns, 2);
    }
}
