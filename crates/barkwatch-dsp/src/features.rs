use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use barkwatch_foundation::{ConfigError, FeatureConfig};

use crate::error::ExtractError;
use crate::mel::MelFilterbank;
use crate::window::generate_window;

/// Row-major feature matrix: `time_frames` rows of `bands` values each.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: Vec<f32>,
    time_frames: usize,
    bands: usize,
}

impl FeatureMatrix {
    pub fn new(time_frames: usize, bands: usize) -> Self {
        Self {
            data: vec![0.0; time_frames * bands],
            time_frames,
            bands,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.time_frames, self.bands)
    }

    pub fn row(&self, t: usize) -> &[f32] {
        &self.data[t * self.bands..(t + 1) * self.bands]
    }

    pub fn row_mut(&mut self, t: usize) -> &mut [f32] {
        &mut self.data[t * self.bands..(t + 1) * self.bands]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// STFT + mel filterbank feature extraction, with optional MFCC.
///
/// All scratch buffers are allocated once at construction; `extract` does no
/// heap allocation.
pub struct FeatureExtractor {
    config: FeatureConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    filterbank: MelFilterbank,
    fft_scratch: Vec<Complex<f32>>,
    power: Vec<f32>,
    mel_row: Vec<f32>,
    dct_basis: Vec<Vec<f32>>,
    lifter: Vec<f32>,
    extractions: u64,
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig, sample_rate_hz: u32) -> Result<Self, ConfigError> {
        if !config.fft_size.is_power_of_two() {
            return Err(ConfigError::FftSizeNotPowerOfTwo(config.fft_size));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.fft_size);
        let window = generate_window(config.window, config.fft_size);
        let filterbank = MelFilterbank::new(
            config.mel_bands,
            config.fft_size,
            sample_rate_hz,
            config.mel_low_hz,
            config.mel_high_hz,
        );

        let (dct_basis, lifter) = if config.enable_mfcc {
            (
                build_dct_basis(config.mfcc_coeffs, config.mel_bands),
                build_lifter(config),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(Self {
            fft,
            window,
            filterbank,
            fft_scratch: vec![Complex::new(0.0, 0.0); config.fft_size],
            power: vec![0.0; config.fft_size / 2 + 1],
            mel_row: vec![0.0; config.mel_bands],
            dct_basis,
            lifter,
            extractions: 0,
            config: config.clone(),
        })
    }

    /// Samples needed for one full extraction.
    pub fn required_samples(&self) -> usize {
        (self.config.time_frames - 1) * self.config.hop_length + self.config.fft_size
    }

    /// Bands per output row: mel bands, or MFCC coefficient count when MFCC
    /// is enabled.
    pub fn output_bands(&self) -> usize {
        if self.config.enable_mfcc {
            self.config.mfcc_coeffs
        } else {
            self.config.mel_bands
        }
    }

    pub fn extractions(&self) -> u64 {
        self.extractions
    }

    /// Compute the feature matrix for one analysis window.
    ///
    /// `out` is untouched when the input is too short for a full matrix.
    pub fn extract(&mut self, samples: &[f32], out: &mut FeatureMatrix) -> Result<(), ExtractError> {
        let required = self.required_samples();
        if samples.len() < required {
            return Err(ExtractError::InsufficientSamples {
                available: samples.len(),
                required,
            });
        }
        let expected = (self.config.time_frames, self.output_bands());
        if out.shape() != expected {
            return Err(ExtractError::ShapeMismatch {
                got: out.shape(),
                expected,
            });
        }

        for t in 0..self.config.time_frames {
            let start = t * self.config.hop_length;
            let hop = &samples[start..start + self.config.fft_size];

            for ((dst, &s), &w) in self.fft_scratch.iter_mut().zip(hop).zip(&self.window) {
                *dst = Complex::new(s * w, 0.0);
            }
            self.fft.process(&mut self.fft_scratch);

            for (bin, p) in self.power.iter_mut().enumerate() {
                *p = self.fft_scratch[bin].norm_sqr();
            }

            self.filterbank.apply(&self.power, &mut self.mel_row);

            let row = out.row_mut(t);
            if self.config.enable_mfcc {
                for (k, basis) in self.dct_basis.iter().enumerate() {
                    let mut acc = 0.0f32;
                    for (b, &m) in basis.iter().zip(&self.mel_row) {
                        acc += b * m;
                    }
                    if self.config.enable_liftering {
                        acc *= self.lifter[k];
                    }
                    row[k] = acc;
                }
            } else {
                row.copy_from_slice(&self.mel_row);
            }
        }

        self.extractions += 1;
        Ok(())
    }
}

/// Orthonormal DCT-II basis: `n_coeffs` rows over `n_mels` inputs.
fn build_dct_basis(n_coeffs: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let scale0 = (1.0 / n_mels as f32).sqrt();
    let scale = (2.0 / n_mels as f32).sqrt();
    (0..n_coeffs)
        .map(|k| {
            let s = if k == 0 { scale0 } else { scale };
            (0..n_mels)
                .map(|n| {
                    s * (std::f32::consts::PI * k as f32 * (2 * n + 1) as f32
                        / (2.0 * n_mels as f32))
                        .cos()
                })
                .collect()
        })
        .collect()
}

/// Sinusoidal cepstral lifter: 1 + (L/2)·sin(πk/L).
fn build_lifter(config: &FeatureConfig) -> Vec<f32> {
    let l = config.lifter_param;
    (0..config.mfcc_coeffs)
        .map(|k| 1.0 + (l / 2.0) * (std::f32::consts::PI * k as f32 / l).sin())
        .collect()
}
