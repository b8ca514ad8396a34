use barkwatch_dsp::{FeatureMatrix, MelFilterbank};
use barkwatch_foundation::{ClassifierError, FeatureConfig};

use crate::classifier::Classifier;
use crate::types::ConfidenceVector;

/// Spectral band of typical bark energy.
const BARK_LOW_HZ: f32 = 300.0;
const BARK_HIGH_HZ: f32 = 2_500.0;

/// Mean log-mel level below which the window is treated as silence.
const SILENCE_FLOOR_DB: f32 = -70.0;

/// Heuristic classifier built from band-energy statistics.
///
/// It scores windows on three signals: overall level, the fraction of energy
/// concentrated in the bark band, and frame-to-frame onset flux (barks are
/// impulsive, speech and ambient noise are smoother). It exists as the
/// default backend so the pipeline runs end to end without a trained model.
pub struct EnergyClassifier {
    shape: (usize, usize),
    bark_band_lo: usize,
    bark_band_hi: usize,
}

impl EnergyClassifier {
    pub fn new(config: &FeatureConfig, sample_rate_hz: u32) -> Self {
        // Recover band center frequencies to find the bark-band index range.
        let fb = MelFilterbank::new(
            config.mel_bands,
            config.fft_size,
            sample_rate_hz,
            config.mel_low_hz,
            config.mel_high_hz,
        );
        let centers = fb.center_frequencies();
        let lo = centers.iter().position(|&c| c >= BARK_LOW_HZ).unwrap_or(0);
        let hi = centers
            .iter()
            .rposition(|&c| c <= BARK_HIGH_HZ)
            .map(|i| i + 1)
            .unwrap_or(centers.len());

        Self {
            shape: (config.time_frames, config.mel_bands),
            bark_band_lo: lo,
            bark_band_hi: hi.max(lo + 1),
        }
    }

    fn band_stats(&self, features: &FeatureMatrix) -> (f32, f32, f32) {
        let (frames, bands) = features.shape();

        let mut total_lin = 0.0f64;
        let mut bark_lin = 0.0f64;
        let mut mean_db = 0.0f64;
        let mut flux = 0.0f32;
        let mut prev_bark_db = 0.0f32;

        for t in 0..frames {
            let row = features.row(t);
            let mut bark_db_sum = 0.0f32;
            for (b, &db) in row.iter().enumerate() {
                mean_db += db as f64;
                let lin = 10.0f64.powf(db as f64 / 10.0);
                total_lin += lin;
                if b >= self.bark_band_lo && b < self.bark_band_hi {
                    bark_lin += lin;
                    bark_db_sum += db;
                }
            }
            let bark_db = bark_db_sum / (self.bark_band_hi - self.bark_band_lo) as f32;
            if t > 0 {
                flux += (bark_db - prev_bark_db).max(0.0);
            }
            prev_bark_db = bark_db;
        }

        let mean_db = (mean_db / (frames * bands) as f64) as f32;
        let bark_frac = if total_lin > 0.0 {
            (bark_lin / total_lin) as f32
        } else {
            0.0
        };
        let flux = flux / (frames - 1).max(1) as f32;
        (mean_db, bark_frac, flux)
    }
}

impl Classifier for EnergyClassifier {
    fn classify(&mut self, features: &FeatureMatrix) -> Result<ConfidenceVector, ClassifierError> {
        if features.shape() != self.shape {
            return Err(ClassifierError::Backend(format!(
                "feature shape {:?} does not match expected {:?}",
                features.shape(),
                self.shape
            )));
        }

        let (mean_db, bark_frac, flux) = self.band_stats(features);

        if mean_db < SILENCE_FLOOR_DB {
            return Ok(ConfidenceVector::new(vec![0.02, 0.03, 0.05, 0.90]));
        }

        // Impulsive energy concentrated in the bark band scores as bark;
        // steady bark-band energy scores as speech; the rest is ambient.
        let flux_score = (flux / 6.0).min(1.0);
        let bark = (bark_frac * flux_score).clamp(0.0, 1.0);
        let speech = (bark_frac * (1.0 - flux_score) * 0.8).clamp(0.0, 1.0);
        let remaining = (1.0 - bark - speech).max(0.0);
        let ambient = remaining * 0.9;
        let silence = remaining * 0.1;

        let sum = bark + speech + ambient + silence;
        Ok(ConfidenceVector::new(vec![
            bark / sum,
            speech / sum,
            ambient / sum,
            silence / sum,
        ]))
    }

    fn num_classes(&self) -> usize {
        4
    }

    fn input_shape(&self) -> (usize, usize) {
        self.shape
    }
}
