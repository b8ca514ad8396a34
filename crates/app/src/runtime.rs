use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use barkwatch_audio::{
    CaptureDevice, CaptureThread, CpalCaptureDevice, RingTap, SampleRing,
};
use barkwatch_detect::{BarkEvent, Classifier, TemporalDecision};
use barkwatch_dsp::{FeatureExtractor, Preprocessor};
use barkwatch_foundation::{
    ConfigError, HardwareError, PipelineConfig, PipelineError, PipelineState, StateManager,
};
use barkwatch_telemetry::PipelineStats;

use crate::analysis::AnalysisWorker;

/// Capacity of the outbound event channel. Events are tiny and consumers
/// are expected to drain promptly; overflow drops rather than blocks.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Owner of the running pipeline: the capture thread, the analysis task,
/// and the shared state/telemetry around them.
///
/// Constructed via [`PipelineHandle::start`]; torn down via
/// [`PipelineHandle::shutdown`], which stops capture before analysis so the
/// ring drains cleanly.
pub struct PipelineHandle {
    capture: Option<CaptureThread>,
    analysis: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    state: StateManager,
    tap: RingTap,
}

impl PipelineHandle {
    /// Start the pipeline against the system's cpal input device.
    pub fn start(
        config: PipelineConfig,
        classifier: Box<dyn Classifier>,
        device_name: Option<String>,
    ) -> Result<(Self, mpsc::Receiver<BarkEvent>), PipelineError> {
        let capture_config = config.capture.clone();
        Self::start_with_device(config, classifier, move || {
            CpalCaptureDevice::open(&capture_config, device_name.as_deref())
        })
    }

    /// Start the pipeline with a caller-supplied device factory. The factory
    /// runs on the capture thread itself, which is what lets non-Send device
    /// handles (cpal streams) work.
    pub fn start_with_device<D, F>(
        config: PipelineConfig,
        classifier: Box<dyn Classifier>,
        factory: F,
    ) -> Result<(Self, mpsc::Receiver<BarkEvent>), PipelineError>
    where
        D: CaptureDevice + 'static,
        F: FnOnce() -> Result<D, HardwareError> + Send + 'static,
    {
        config.validate()?;
        check_classifier(&config, classifier.as_ref())?;

        let state = StateManager::new();
        let stats = Arc::new(PipelineStats::default());
        let running = Arc::new(AtomicBool::new(true));

        let (producer, consumer) = SampleRing::new(config.capture.ring_capacity).split();
        let tap = consumer.tap();

        let preprocessor = Preprocessor::new(config.preprocess.clone(), config.capture.sample_rate_hz);
        let extractor = FeatureExtractor::new(&config.feature, config.capture.sample_rate_hz)?;
        let decision = TemporalDecision::new(&config.decision);

        // The capture thread reports device recovery through the state
        // manager, so enter Running before it starts reading.
        state.transition(PipelineState::Running)?;
        let capture = CaptureThread::spawn(
            factory,
            config.capture.clone(),
            producer,
            Arc::clone(&stats),
            state.clone(),
        )?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let worker = AnalysisWorker::new(
            consumer,
            preprocessor,
            extractor,
            classifier,
            decision,
            config,
            Arc::clone(&stats),
            event_tx,
        );
        let analysis = tokio::spawn(worker.run(Arc::clone(&running)));

        info!("Pipeline started");

        Ok((
            Self {
                capture: Some(capture),
                analysis: Some(analysis),
                running,
                stats,
                state,
                tap,
            },
            event_rx,
        ))
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> PipelineState {
        self.state.current()
    }

    /// Ordered stream of accepted lifecycle transitions, including the
    /// capture thread's recovery edges.
    pub fn state_changes(&self) -> crossbeam_channel::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Peek-only view of the raw sample ring for side consumers such as a
    /// streaming or recording subsystem.
    pub fn tap(&self) -> RingTap {
        self.tap.clone()
    }

    /// True while both halves of the pipeline are alive.
    pub fn is_healthy(&self) -> bool {
        let capture_ok = self
            .capture
            .as_ref()
            .map(|c| !c.watchdog().is_stalled())
            .unwrap_or(false);
        let analysis_ok = self
            .analysis
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false);
        capture_ok && analysis_ok
    }

    /// Ordered teardown: capture stops first so no new samples arrive, then
    /// the analysis task is flagged and awaited.
    pub async fn shutdown(mut self) -> Result<(), PipelineError> {
        self.state.transition(PipelineState::Stopping)?;

        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(analysis) = self.analysis.take() {
            let _ = analysis.await;
        }

        self.state.transition(PipelineState::Stopped)?;
        info!("Pipeline shut down");
        Ok(())
    }
}

/// Startup-time compatibility checks between the configured feature shape
/// and whatever the classifier backend declares.
fn check_classifier(
    config: &PipelineConfig,
    classifier: &dyn Classifier,
) -> Result<(), ConfigError> {
    let pipeline_shape = (config.feature.time_frames, config.feature_bands());
    if classifier.input_shape() != pipeline_shape {
        return Err(ConfigError::ShapeMismatch {
            pipeline: pipeline_shape,
            classifier: classifier.input_shape(),
        });
    }
    if classifier.num_classes() != config.decision.num_classes {
        return Err(ConfigError::ClassCountMismatch {
            config: config.decision.num_classes,
            classifier: classifier.num_classes(),
        });
    }
    Ok(())
}
