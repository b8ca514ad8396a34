/// Two-stage confidence smoothing for one class: an exponential moving
/// average followed by a sliding median.
///
/// The EMA damps jitter between cycles; the median rejects single-cycle
/// spikes that survive the EMA. Window depth is fixed at construction.
pub struct ConfidenceSmoother {
    alpha: f32,
    ema: Option<f32>,
    history: Vec<f32>,
    window: usize,
    next: usize,
    filled: usize,
    scratch: Vec<f32>,
}

impl ConfidenceSmoother {
    pub fn new(alpha: f32, median_window: usize) -> Self {
        let window = median_window.max(1);
        Self {
            alpha,
            ema: None,
            history: vec![0.0; window],
            window,
            next: 0,
            filled: 0,
            scratch: Vec::with_capacity(window),
        }
    }

    /// Feed one raw confidence, returning the smoothed value.
    pub fn update(&mut self, raw: f32) -> f32 {
        let ema = match self.ema {
            Some(prev) => self.alpha * raw + (1.0 - self.alpha) * prev,
            // First sample seeds the EMA rather than decaying from zero.
            None => raw,
        };
        self.ema = Some(ema);

        self.history[self.next] = ema;
        self.next = (self.next + 1) % self.window;
        self.filled = (self.filled + 1).min(self.window);

        self.scratch.clear();
        self.scratch.extend_from_slice(&self.history[..self.filled]);
        self.scratch.sort_by(f32::total_cmp);
        self.scratch[self.filled / 2]
    }

    pub fn reset(&mut self) {
        self.ema = None;
        self.next = 0;
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_ema() {
        let mut s = ConfidenceSmoother::new(0.3, 1);
        assert!((s.update(0.8) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn ema_tracks_toward_input() {
        let mut s = ConfidenceSmoother::new(0.3, 1);
        s.update(0.0);
        // 0.3 * 1.0 + 0.7 * 0.0
        assert!((s.update(1.0) - 0.3).abs() < 1e-6);
        // 0.3 * 1.0 + 0.7 * 0.3
        assert!((s.update(1.0) - 0.51).abs() < 1e-6);
    }

    #[test]
    fn median_rejects_single_spike() {
        // Alpha 1.0 disables the EMA so the median is tested in isolation.
        let mut s = ConfidenceSmoother::new(1.0, 5);
        let inputs = [0.1, 0.9, 0.2, 0.8, 0.3];
        let mut last = 0.0;
        for &v in &inputs {
            last = s.update(v);
        }
        assert!((last - 0.3).abs() < 1e-6);
    }

    #[test]
    fn partial_window_uses_available_samples() {
        let mut s = ConfidenceSmoother::new(1.0, 5);
        s.update(0.2);
        // Two samples: median picks index 1 of the sorted pair.
        assert!((s.update(0.6) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn reset_clears_history() {
        let mut s = ConfidenceSmoother::new(0.3, 5);
        for _ in 0..5 {
            s.update(0.9);
        }
        s.reset();
        assert!((s.update(0.1) - 0.1).abs() < 1e-6);
    }
}
