use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use barkwatch_audio::RingConsumer;
use barkwatch_detect::{BarkEvent, Classifier, TemporalDecision};
use barkwatch_dsp::{FeatureExtractor, FeatureMatrix, Preprocessor};
use barkwatch_foundation::{ClassifierError, PipelineConfig};
use barkwatch_telemetry::{FpsTracker, PipelineStats};

/// The analysis half of the pipeline: drains the sample ring one window at a
/// time, runs preprocessing, feature extraction, classification, and the
/// temporal decision, and emits confirmed events.
///
/// Consecutive windows overlap by `fft_size - hop_length` samples. Only the
/// newly advanced samples are preprocessed each cycle, so every raw sample
/// passes through the filters exactly once and filter state stays
/// continuous across cycles.
pub struct AnalysisWorker {
    consumer: RingConsumer,
    preprocessor: Preprocessor,
    extractor: FeatureExtractor,
    classifier: Box<dyn Classifier>,
    decision: TemporalDecision,
    config: PipelineConfig,
    stats: Arc<PipelineStats>,
    event_tx: mpsc::Sender<BarkEvent>,
    samples_consumed: u64,
}

impl AnalysisWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consumer: RingConsumer,
        preprocessor: Preprocessor,
        extractor: FeatureExtractor,
        classifier: Box<dyn Classifier>,
        decision: TemporalDecision,
        config: PipelineConfig,
        stats: Arc<PipelineStats>,
        event_tx: mpsc::Sender<BarkEvent>,
    ) -> Self {
        Self {
            consumer,
            preprocessor,
            extractor,
            classifier,
            decision,
            config,
            stats,
            event_tx,
            samples_consumed: 0,
        }
    }

    pub async fn run(mut self, running: Arc<AtomicBool>) {
        let window = self.config.analysis_window_samples();
        let advance = self.config.analysis_advance_samples();
        let overlap = window - advance;
        let budget = Duration::from_millis(self.config.decision.classifier_budget_ms);
        let idle_poll = Duration::from_millis(self.config.decision.analysis_poll_ms);

        let mut raw = vec![0i16; window];
        let mut processed = vec![0.0f32; window];
        let mut features = FeatureMatrix::new(
            self.config.feature.time_frames,
            self.config.feature_bands(),
        );
        let mut fps = FpsTracker::new();
        let mut first_cycle = true;

        info!(
            window_samples = window,
            advance_samples = advance,
            "Analysis worker started"
        );

        while running.load(Ordering::SeqCst) {
            if self.consumer.available() < window {
                tokio::time::sleep(idle_poll).await;
                continue;
            }

            let got = self.consumer.peek(&mut raw);
            if got < window {
                // Lock timeout or a racing clear; try again shortly.
                self.stats.cycles_skipped.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(idle_poll).await;
                continue;
            }

            let timestamp_ms =
                self.samples_consumed * 1000 / self.config.capture.sample_rate_hz as u64;

            let t0 = Instant::now();
            let preprocess_ok = if first_cycle {
                first_cycle = false;
                self.preprocessor.process(&raw, &mut processed).is_ok()
            } else {
                // The window's first `overlap` samples were conditioned last
                // cycle; shift them down and condition only the new tail.
                processed.copy_within(advance.., 0);
                self.preprocessor
                    .process(&raw[overlap..], &mut processed[overlap..])
                    .is_ok()
            };
            PipelineStats::record_stage_us(
                &self.stats.preprocess_us,
                t0.elapsed().as_micros() as u64,
            );

            self.stats
                .gate_activations
                .store(self.preprocessor.stats().gate_activations, Ordering::Relaxed);

            if preprocess_ok {
                self.run_cycle(timestamp_ms, &processed, &mut features, budget);
            } else {
                self.stats.cycles_skipped.fetch_add(1, Ordering::Relaxed);
            }

            // The cursor advances even on a skipped cycle so the pipeline
            // cannot wedge on one bad window.
            self.consumer.discard(advance);
            self.samples_consumed += advance as u64;
            self.stats
                .lock_timeouts
                .store(self.consumer.lock_timeouts(), Ordering::Relaxed);

            if let Some(rate) = fps.tick() {
                self.stats.update_analysis_fps(rate);
            }
        }

        // Settle the state machine; confirmed episodes were already
        // reported at confirmation time.
        self.decision.flush();
        info!("Analysis worker shut down");
    }

    fn run_cycle(
        &mut self,
        timestamp_ms: u64,
        processed: &[f32],
        features: &mut FeatureMatrix,
        budget: Duration,
    ) {
        let t0 = Instant::now();
        if let Err(e) = self.extractor.extract(processed, features) {
            warn!("Feature extraction failed: {}", e);
            self.stats.cycles_skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        PipelineStats::record_stage_us(&self.stats.extract_us, t0.elapsed().as_micros() as u64);

        let t0 = Instant::now();
        let result = self.classifier.classify(features);
        let elapsed = t0.elapsed();
        PipelineStats::record_stage_us(&self.stats.classify_us, elapsed.as_micros() as u64);

        let confidences = match result {
            Ok(c) if elapsed <= budget => c,
            Ok(_) => {
                let err = ClassifierError::DeadlineExceeded { elapsed, budget };
                warn!("Skipping cycle: {}", err);
                self.stats.classifier_errors.fetch_add(1, Ordering::Relaxed);
                self.stats.cycles_skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                warn!("Skipping cycle: {}", e);
                self.stats.classifier_errors.fetch_add(1, Ordering::Relaxed);
                self.stats.cycles_skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        debug!(
            timestamp_ms,
            target = confidences.get(self.config.decision.target_class),
            "cycle classified"
        );

        if let Some(event) = self.decision.update(timestamp_ms, &confidences) {
            self.emit(event);
        }
        self.stats.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    fn emit(&self, event: BarkEvent) {
        info!(
            class = event.class.label(),
            confidence = event.confidence,
            timestamp_ms = event.timestamp_ms,
            duration_ms = event.duration_ms,
            "Bark event confirmed"
        );
        match self.event_tx.try_send(event) {
            Ok(()) => {
                self.stats.events_emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                // A full (or closed) channel never blocks the pipeline.
                warn!("Event channel full, dropping event");
                self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
