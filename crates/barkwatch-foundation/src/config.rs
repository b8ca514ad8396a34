use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Window function applied per analysis hop at feature-extraction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowKind {
    Hamming,
    Hanning,
    Blackman,
    Rectangular,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub sample_rate_hz: u32,
    /// Samples per capture frame (20ms at 16kHz by default).
    pub frame_size_samples: usize,
    /// Capacity of the shared sample ring, in samples.
    pub ring_capacity: usize,
    /// Number of preallocated frame buffers.
    pub pool_size: usize,
    /// Bound on a single blocking device read.
    pub read_timeout_ms: u64,
    /// RMS threshold (raw i16 scale) below which a frame counts as silent.
    pub silence_threshold: i16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            frame_size_samples: 320,
            ring_capacity: 16_384,
            pool_size: 32,
            read_timeout_ms: 100,
            silence_threshold: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub enable_dc_block: bool,
    pub dc_block_alpha: f32,
    pub enable_pre_emphasis: bool,
    pub pre_emphasis_beta: f32,
    pub enable_agc: bool,
    /// AGC target envelope level, linear 0.0-1.0.
    pub agc_target_level: f32,
    pub agc_max_gain: f32,
    pub agc_attack_secs: f32,
    pub agc_release_secs: f32,
    /// First-order low-pass coefficient applied to the gain value itself.
    pub agc_gain_smoothing: f32,
    pub enable_noise_gate: bool,
    /// Gate threshold, linear amplitude 0.0-1.0.
    pub noise_gate_threshold: f32,
    pub noise_gate_ratio: f32,
    pub noise_gate_knee: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            enable_dc_block: true,
            dc_block_alpha: 0.995,
            enable_pre_emphasis: false,
            pre_emphasis_beta: 0.97,
            enable_agc: true,
            agc_target_level: 0.5,
            agc_max_gain: 4.0,
            agc_attack_secs: 0.005,
            agc_release_secs: 0.100,
            agc_gain_smoothing: 0.01,
            enable_noise_gate: true,
            noise_gate_threshold: 0.01,
            noise_gate_ratio: 4.0,
            noise_gate_knee: 0.005,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// FFT size in samples. Must be a power of two.
    pub fft_size: usize,
    /// Samples advanced between successive analysis windows.
    pub hop_length: usize,
    /// Number of analysis windows per feature matrix.
    pub time_frames: usize,
    pub mel_bands: usize,
    pub mel_low_hz: f32,
    pub mel_high_hz: f32,
    pub window: WindowKind,
    pub enable_mfcc: bool,
    pub mfcc_coeffs: usize,
    pub enable_liftering: bool,
    pub lifter_param: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            fft_size: 512,
            hop_length: 256,
            time_frames: 32,
            mel_bands: 40,
            mel_low_hz: 0.0,
            mel_high_hz: 8_000.0,
            window: WindowKind::Hamming,
            enable_mfcc: false,
            mfcc_coeffs: 13,
            enable_liftering: true,
            lifter_param: 22.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    pub num_classes: usize,
    /// Index of the class whose confirmations produce events.
    pub target_class: usize,
    pub ema_alpha: f32,
    pub median_window: usize,
    pub confidence_threshold: f32,
    pub min_duration_ms: u64,
    pub debounce_ms: u64,
    /// Wall-time budget for one classifier call.
    pub classifier_budget_ms: u64,
    /// Sleep between ring polls while waiting for a full analysis window.
    pub analysis_poll_ms: u64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            num_classes: 4,
            target_class: 0,
            ema_alpha: 0.3,
            median_window: 5,
            confidence_threshold: 0.8,
            min_duration_ms: 300,
            debounce_ms: 500,
            classifier_budget_ms: 100,
            analysis_poll_ms: 10,
        }
    }
}

/// The single configuration record for the whole pipeline. Validated
/// atomically at startup; shape-affecting fields never change in flight,
/// so replacing it requires a pipeline restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub preprocess: PreprocessConfig,
    pub feature: FeatureConfig,
    pub decision: DecisionConfig,
}

impl PipelineConfig {
    /// Samples one feature-extraction pass consumes from the ring.
    pub fn analysis_window_samples(&self) -> usize {
        (self.feature.time_frames - 1) * self.feature.hop_length + self.feature.fft_size
    }

    /// Samples the read cursor advances per classification cycle.
    pub fn analysis_advance_samples(&self) -> usize {
        self.feature.time_frames * self.feature.hop_length
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.feature.fft_size.is_power_of_two() {
            return Err(ConfigError::FftSizeNotPowerOfTwo(self.feature.fft_size));
        }
        if self.capture.sample_rate_hz == 0 {
            return Err(invalid("capture.sample_rate_hz", "must be nonzero"));
        }
        if self.capture.frame_size_samples == 0 {
            return Err(invalid("capture.frame_size_samples", "must be nonzero"));
        }
        if self.capture.pool_size == 0 {
            return Err(invalid("capture.pool_size", "must be nonzero"));
        }
        if self.capture.ring_capacity < self.analysis_window_samples() {
            return Err(invalid(
                "capture.ring_capacity",
                format!(
                    "must hold one analysis window ({} samples)",
                    self.analysis_window_samples()
                ),
            ));
        }
        if self.feature.hop_length == 0 || self.feature.hop_length > self.feature.fft_size {
            return Err(invalid(
                "feature.hop_length",
                "must be in 1..=fft_size",
            ));
        }
        if self.feature.time_frames == 0 {
            return Err(invalid("feature.time_frames", "must be nonzero"));
        }
        if self.feature.mel_bands == 0 {
            return Err(invalid("feature.mel_bands", "must be nonzero"));
        }
        let nyquist = self.capture.sample_rate_hz as f32 / 2.0;
        if self.feature.mel_high_hz <= self.feature.mel_low_hz
            || self.feature.mel_high_hz > nyquist
        {
            return Err(invalid(
                "feature.mel_high_hz",
                format!("must be in (mel_low_hz, {nyquist}]"),
            ));
        }
        if self.feature.enable_mfcc && self.feature.mfcc_coeffs > self.feature.mel_bands {
            return Err(invalid(
                "feature.mfcc_coeffs",
                "cannot exceed mel_bands",
            ));
        }
        if !(0.0..=1.0).contains(&self.decision.ema_alpha) {
            return Err(invalid("decision.ema_alpha", "must be in 0.0..=1.0"));
        }
        if self.decision.median_window == 0 {
            return Err(invalid("decision.median_window", "must be nonzero"));
        }
        if !(0.0..=1.0).contains(&self.decision.confidence_threshold) {
            return Err(invalid(
                "decision.confidence_threshold",
                "must be in 0.0..=1.0",
            ));
        }
        if self.decision.analysis_poll_ms == 0 {
            return Err(invalid("decision.analysis_poll_ms", "must be nonzero"));
        }
        if self.decision.target_class >= self.decision.num_classes {
            return Err(invalid(
                "decision.target_class",
                "must be below num_classes",
            ));
        }
        if !(0.0..1.0).contains(&self.preprocess.dc_block_alpha) {
            return Err(invalid("preprocess.dc_block_alpha", "must be in 0.0..1.0"));
        }
        if self.preprocess.agc_target_level <= 0.0 || self.preprocess.agc_max_gain <= 0.0 {
            return Err(invalid(
                "preprocess.agc_target_level",
                "target level and max gain must be positive",
            ));
        }
        if self.preprocess.noise_gate_ratio < 1.0 {
            return Err(invalid("preprocess.noise_gate_ratio", "must be >= 1.0"));
        }
        Ok(())
    }

    /// Number of bands each feature matrix row carries.
    pub fn feature_bands(&self) -> usize {
        if self.feature.enable_mfcc {
            self.feature.mfcc_coeffs
        } else {
            self.feature.mel_bands
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_fft() {
        let mut cfg = PipelineConfig::default();
        cfg.feature.fft_size = 500;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::FftSizeNotPowerOfTwo(500))
        ));
    }

    #[test]
    fn rejects_ring_smaller_than_analysis_window() {
        let mut cfg = PipelineConfig::default();
        cfg.capture.ring_capacity = 1024;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_target_class_out_of_range() {
        let mut cfg = PipelineConfig::default();
        cfg.decision.target_class = 4;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn analysis_window_matches_hop_arithmetic() {
        let cfg = PipelineConfig::default();
        // 31 hops of 256 plus one 512-sample window.
        assert_eq!(cfg.analysis_window_samples(), 31 * 256 + 512);
        assert_eq!(cfg.analysis_advance_samples(), 32 * 256);
    }

    #[test]
    fn rejects_mel_range_above_nyquist() {
        let mut cfg = PipelineConfig::default();
        cfg.feature.mel_high_hz = 9_000.0;
        assert!(cfg.validate().is_err());
    }
}
