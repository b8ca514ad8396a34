use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

/// Device cannot be opened or configured. Always fatal: the pipeline
/// does not start and the caller decides whether to retry from scratch.
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("Input device not found: {name:?}")]
    DeviceNotFound { name: Option<String> },

    #[error("Sample format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("Sample rate {requested} Hz not supported by device")]
    SampleRateNotSupported { requested: u32 },

    #[error("Build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Supported stream configs error: {0}")]
    SupportedStreamConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("Default stream config error: {0}")]
    DefaultStreamConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("Fatal device error: {0}")]
    Fatal(String),
}

/// Transient per-read capture failure. Logged and retried on the next
/// cycle; never terminates the pipeline.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No samples within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Short read: {got}/{want} samples")]
    ShortRead { got: usize, want: usize },

    #[error("Device disconnected")]
    Disconnected,
}

/// Invalid shape/parameter combination. Raised at initialization only,
/// never at steady state.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("FFT size {0} is not a power of two")]
    FftSizeNotPowerOfTwo(usize),

    #[error("Feature shape mismatch: pipeline {pipeline:?}, classifier {classifier:?}")]
    ShapeMismatch {
        pipeline: (usize, usize),
        classifier: (usize, usize),
    },

    #[error("Class count mismatch: config {config}, classifier {classifier}")]
    ClassCountMismatch { config: usize, classifier: usize },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// External classifier failed or exceeded its time budget. The cycle's
/// confidences are treated as absent; decision state does not advance.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Inference backend failed: {0}")]
    Backend(String),

    #[error("Classifier exceeded time budget: {elapsed:?} > {budget:?}")]
    DeadlineExceeded { elapsed: Duration, budget: Duration },
}

#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    Retry { max_attempts: u32, delay: Duration },
    SkipCycle,
    Restart,
    Fatal,
}

impl PipelineError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            PipelineError::Capture(_) => RecoveryStrategy::Retry {
                max_attempts: 5,
                delay: Duration::from_millis(200),
            },
            PipelineError::Classifier(_) => RecoveryStrategy::SkipCycle,
            PipelineError::Hardware(_) | PipelineError::Config(_) => RecoveryStrategy::Fatal,
            PipelineError::ShutdownRequested | PipelineError::Fatal(_) => RecoveryStrategy::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_errors_are_retried() {
        let err = PipelineError::Capture(CaptureError::Timeout {
            timeout: Duration::from_millis(100),
        });
        assert!(matches!(
            err.recovery_strategy(),
            RecoveryStrategy::Retry { .. }
        ));
    }

    #[test]
    fn config_errors_are_fatal() {
        let err = PipelineError::Config(ConfigError::FftSizeNotPowerOfTwo(500));
        assert!(matches!(err.recovery_strategy(), RecoveryStrategy::Fatal));
    }

    #[test]
    fn classifier_errors_skip_the_cycle() {
        let err = PipelineError::Classifier(ClassifierError::Backend("oom".into()));
        assert!(matches!(
            err.recovery_strategy(),
            RecoveryStrategy::SkipCycle
        ));
    }
}
