/// Triangular mel filterbank over one-sided power spectra.
///
/// Filters are precomputed as dense per-band weight rows; `apply` is then a
/// dot product per band, a floor at 1e-10, and conversion to log power (dB).
pub struct MelFilterbank {
    weights: Vec<Vec<f32>>,
    center_hz: Vec<f32>,
    n_bins: usize,
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

impl MelFilterbank {
    /// Build `n_mels` triangular filters spanning `low_hz..high_hz` for an
    /// FFT of `fft_size` points at `sample_rate_hz`.
    pub fn new(n_mels: usize, fft_size: usize, sample_rate_hz: u32, low_hz: f32, high_hz: f32) -> Self {
        let n_bins = fft_size / 2 + 1;
        let high_hz = high_hz.min(sample_rate_hz as f32 / 2.0);

        let mel_low = hz_to_mel(low_hz);
        let mel_high = hz_to_mel(high_hz);

        // n_mels + 2 evenly spaced points in mel space; each filter spans
        // three consecutive points.
        let step = (mel_high - mel_low) / (n_mels + 1) as f32;
        let points_hz: Vec<f32> = (0..n_mels + 2)
            .map(|i| mel_to_hz(mel_low + step * i as f32))
            .collect();

        let hz_per_bin = sample_rate_hz as f32 / fft_size as f32;
        let mut weights = Vec::with_capacity(n_mels);
        let mut center_hz = Vec::with_capacity(n_mels);

        for m in 0..n_mels {
            let left = points_hz[m];
            let center = points_hz[m + 1];
            let right = points_hz[m + 2];
            center_hz.push(center);

            let mut row = vec![0.0f32; n_bins];
            for (bin, w) in row.iter_mut().enumerate() {
                let f = bin as f32 * hz_per_bin;
                if f > left && f < center {
                    *w = (f - left) / (center - left);
                } else if f >= center && f < right {
                    *w = (right - f) / (right - center);
                }
            }
            weights.push(row);
        }

        Self {
            weights,
            center_hz,
            n_bins,
        }
    }

    pub fn n_mels(&self) -> usize {
        self.weights.len()
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Center frequency of each band, useful for inspecting filter placement.
    pub fn center_frequencies(&self) -> &[f32] {
        &self.center_hz
    }

    /// Apply the filterbank to a one-sided power spectrum, writing log mel
    /// energies (dB) into `out`. `power` must hold `n_bins` values and `out`
    /// must hold `n_mels` values.
    pub fn apply(&self, power: &[f32], out: &mut [f32]) {
        debug_assert_eq!(power.len(), self.n_bins);
        debug_assert_eq!(out.len(), self.weights.len());
        for (band, row) in self.weights.iter().enumerate() {
            let mut acc = 0.0f32;
            for (w, p) in row.iter().zip(power.iter()) {
                acc += w * p;
            }
            out[band] = 10.0 * acc.max(1e-10).log10();
        }
    }
}
