use barkwatch_foundation::PreprocessConfig;

use crate::error::DspError;
use crate::INT16_TO_FLOAT;

/// Counters accumulated across frames. Read by the analysis loop when
/// publishing telemetry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreprocessStats {
    pub frames_processed: u64,
    pub samples_processed: u64,
    pub gate_activations: u64,
    pub samples_clamped: u64,
    /// Mean absolute input level, EMA across frames.
    pub input_level: f32,
    /// Mean absolute output level, EMA across frames.
    pub output_level: f32,
    /// AGC gain after the most recent frame.
    pub current_gain: f32,
}

/// Weight for the per-frame level EMAs.
const LEVEL_EMA_ALPHA: f32 = 0.125;

/// Filter state carried between frames. Kept separate from the processor so
/// a failed frame can leave it untouched.
#[derive(Debug, Clone, Copy)]
struct FilterState {
    dc_prev_input: f32,
    dc_prev_output: f32,
    emph_prev_input: f32,
    agc_envelope: f32,
    agc_gain: f32,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            dc_prev_input: 0.0,
            dc_prev_output: 0.0,
            emph_prev_input: 0.0,
            agc_envelope: 0.0,
            agc_gain: 1.0,
        }
    }
}

/// Streaming per-frame conditioning: i16 to normalized f32, DC removal,
/// optional pre-emphasis, AGC, and a soft-knee noise gate.
///
/// Stages run in that fixed order. Each stage carries its state across
/// frames, so frames must be fed in capture order.
pub struct Preprocessor {
    config: PreprocessConfig,
    state: FilterState,
    attack_coeff: f32,
    release_coeff: f32,
    stats: PreprocessStats,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig, sample_rate_hz: u32) -> Self {
        let sr = sample_rate_hz as f32;
        // One-pole envelope follower coefficients from time constants.
        let attack_coeff = (-1.0 / (config.agc_attack_secs * sr)).exp();
        let release_coeff = (-1.0 / (config.agc_release_secs * sr)).exp();
        Self {
            config,
            state: FilterState::default(),
            attack_coeff,
            release_coeff,
            stats: PreprocessStats::default(),
        }
    }

    /// Process one frame of PCM into `out`. Returns the number of samples
    /// written (always `input.len()` on success). On error no state advances.
    pub fn process(&mut self, input: &[i16], out: &mut [f32]) -> Result<usize, DspError> {
        if input.is_empty() {
            return Err(DspError::InvalidInput("empty frame"));
        }
        if out.len() < input.len() {
            return Err(DspError::OutputTooSmall {
                got: out.len(),
                need: input.len(),
            });
        }

        // Work on a local copy of the state; commit only after the whole
        // frame succeeds.
        let mut st = self.state;
        let mut gated = false;
        let mut clamped: u64 = 0;
        let mut in_abs_sum = 0.0f32;
        let mut out_abs_sum = 0.0f32;

        for (i, &raw) in input.iter().enumerate() {
            let mut x = raw as f32 * INT16_TO_FLOAT;
            in_abs_sum += x.abs();

            if self.config.enable_dc_block {
                let y = x - st.dc_prev_input + self.config.dc_block_alpha * st.dc_prev_output;
                st.dc_prev_input = x;
                st.dc_prev_output = y;
                x = y;
            }

            if self.config.enable_pre_emphasis {
                let y = x - self.config.pre_emphasis_beta * st.emph_prev_input;
                st.emph_prev_input = x;
                x = y;
            }

            if self.config.enable_agc {
                let mag = x.abs();
                let coeff = if mag > st.agc_envelope {
                    self.attack_coeff
                } else {
                    self.release_coeff
                };
                st.agc_envelope = coeff * st.agc_envelope + (1.0 - coeff) * mag;

                let desired = if st.agc_envelope > 1e-6 {
                    (self.config.agc_target_level / st.agc_envelope)
                        .min(self.config.agc_max_gain)
                } else {
                    self.config.agc_max_gain
                };
                st.agc_gain += self.config.agc_gain_smoothing * (desired - st.agc_gain);

                x *= st.agc_gain;
                if x > 1.0 {
                    x = 1.0;
                    clamped += 1;
                } else if x < -1.0 {
                    x = -1.0;
                    clamped += 1;
                }
            }

            if self.config.enable_noise_gate {
                let (y, was_gated) = self.apply_gate(x);
                x = y;
                gated |= was_gated;
            }

            out_abs_sum += x.abs();
            out[i] = x;
        }

        self.state = st;
        self.stats.frames_processed += 1;
        self.stats.samples_processed += input.len() as u64;
        self.stats.samples_clamped += clamped;
        if gated {
            self.stats.gate_activations += 1;
        }

        let n = input.len() as f32;
        self.stats.input_level += LEVEL_EMA_ALPHA * (in_abs_sum / n - self.stats.input_level);
        self.stats.output_level += LEVEL_EMA_ALPHA * (out_abs_sum / n - self.stats.output_level);
        self.stats.current_gain = st.agc_gain;
        Ok(input.len())
    }

    /// Soft-knee gate: full attenuation by `ratio` below the knee, a squared
    /// ramp through the knee region, unity above. `noise_gate_knee` is the
    /// full width of the knee, centered on the threshold.
    fn apply_gate(&self, x: f32) -> (f32, bool) {
        let threshold = self.config.noise_gate_threshold;
        let half_knee = self.config.noise_gate_knee / 2.0;
        let mag = x.abs();

        let lower = threshold - half_knee;
        let upper = threshold + half_knee;

        if mag >= upper {
            return (x, false);
        }
        if mag <= lower {
            return (x / self.config.noise_gate_ratio, true);
        }
        // Inside the knee: blend between the gated and open gains.
        let t = (mag - lower) / (upper - lower);
        let blend = t * t;
        let gated_gain = 1.0 / self.config.noise_gate_ratio;
        let gain = gated_gain + (1.0 - gated_gain) * blend;
        (x * gain, true)
    }

    pub fn stats(&self) -> PreprocessStats {
        self.stats
    }

    /// Clear all filter state, e.g. after a capture restart.
    pub fn reset(&mut self) {
        self.state = FilterState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> PreprocessConfig {
        PreprocessConfig {
            enable_dc_block: false,
            enable_pre_emphasis: false,
            enable_agc: false,
            enable_noise_gate: false,
            ..PreprocessConfig::default()
        }
    }

    #[test]
    fn passthrough_scales_to_unit_range() {
        let mut p = Preprocessor::new(quiet_config(), 16_000);
        let input = [i16::MAX, 0, i16::MIN, 16384];
        let mut out = [0.0f32; 4];
        let n = p.process(&input, &mut out).unwrap();
        assert_eq!(n, 4);
        assert!((out[0] - 32767.0 / 32768.0).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
        assert!((out[2] + 1.0).abs() < 1e-6);
        assert!((out[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_input_is_rejected() {
        let mut p = Preprocessor::new(quiet_config(), 16_000);
        let mut out = [0.0f32; 4];
        assert_eq!(
            p.process(&[], &mut out),
            Err(DspError::InvalidInput("empty frame"))
        );
        assert_eq!(p.stats().frames_processed, 0);
    }

    #[test]
    fn stats_track_levels_and_gain() {
        let mut cfg = quiet_config();
        cfg.enable_agc = true;
        let mut p = Preprocessor::new(cfg, 16_000);
        let input = [8192i16; 320];
        let mut out = [0.0f32; 320];
        for _ in 0..50 {
            p.process(&input, &mut out).unwrap();
        }
        let stats = p.stats();
        assert!((stats.input_level - 0.25).abs() < 0.01);
        assert!(stats.output_level > stats.input_level);
        assert!(stats.current_gain > 1.0);
        assert_eq!(stats.frames_processed, 50);
    }

    #[test]
    fn output_too_small_leaves_state_untouched() {
        let mut cfg = quiet_config();
        cfg.enable_dc_block = true;
        let mut p = Preprocessor::new(cfg, 16_000);
        let input = [1000i16; 8];
        let mut small = [0.0f32; 4];
        assert!(matches!(
            p.process(&input, &mut small),
            Err(DspError::OutputTooSmall { got: 4, need: 8 })
        ));
        assert_eq!(p.stats().frames_processed, 0);

        // A subsequent valid frame starts from pristine filter state: the DC
        // blocker's first output equals the first input.
        let mut out = [0.0f32; 8];
        p.process(&input, &mut out).unwrap();
        let expected = 1000.0 * INT16_TO_FLOAT;
        assert!((out[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn dc_block_removes_constant_offset() {
        let mut cfg = quiet_config();
        cfg.enable_dc_block = true;
        let mut p = Preprocessor::new(cfg, 16_000);

        let input = [8000i16; 320];
        let mut out = [0.0f32; 320];
        // Run several frames so the filter settles.
        for _ in 0..20 {
            p.process(&input, &mut out).unwrap();
        }
        let tail_mean: f32 = out[256..].iter().sum::<f32>() / 64.0;
        assert!(tail_mean.abs() < 0.01, "residual DC {}", tail_mean);
    }

    #[test]
    fn agc_converges_to_target_level() {
        let mut cfg = quiet_config();
        cfg.enable_agc = true;
        let mut p = Preprocessor::new(cfg.clone(), 16_000);

        // Constant-amplitude square wave at 0.125 full scale. Envelope of a
        // square wave equals its amplitude, so the settled output amplitude
        // should land on the AGC target.
        let amp = 4096i16;
        let input: Vec<i16> = (0..320)
            .map(|i| if (i / 8) % 2 == 0 { amp } else { -amp })
            .collect();
        let mut out = vec![0.0f32; 320];
        for _ in 0..200 {
            p.process(&input, &mut out).unwrap();
        }
        let peak = out.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        let target = cfg.agc_target_level;
        assert!(
            (peak - target).abs() / target < 0.05,
            "peak {} vs target {}",
            peak,
            target
        );
    }

    #[test]
    fn agc_gain_never_exceeds_max() {
        let mut cfg = quiet_config();
        cfg.enable_agc = true;
        let mut p = Preprocessor::new(cfg.clone(), 16_000);

        // Very quiet input: desired gain is clamped at agc_max_gain.
        let input = [64i16; 320];
        let mut out = [0.0f32; 320];
        for _ in 0..200 {
            p.process(&input, &mut out).unwrap();
        }
        let in_level = 64.0 * INT16_TO_FLOAT;
        let max_out = in_level * cfg.agc_max_gain;
        assert!(out.iter().all(|&v| v.abs() <= max_out + 1e-4));
    }

    #[test]
    fn noise_gate_attenuates_below_threshold() {
        let mut cfg = quiet_config();
        cfg.enable_noise_gate = true;
        let mut p = Preprocessor::new(cfg.clone(), 16_000);

        // Well below threshold - knee: attenuated by the full ratio.
        let low = (cfg.noise_gate_threshold * 0.2 * 32768.0) as i16;
        let input = [low; 16];
        let mut out = [0.0f32; 16];
        p.process(&input, &mut out).unwrap();
        let expected = low as f32 * INT16_TO_FLOAT / cfg.noise_gate_ratio;
        assert!((out[0] - expected).abs() < 1e-5);
        assert_eq!(p.stats().gate_activations, 1);

        // Well above threshold + knee: untouched.
        let high = ((cfg.noise_gate_threshold + 2.0 * cfg.noise_gate_knee) * 32768.0) as i16;
        let input = [high; 16];
        p.process(&input, &mut out).unwrap();
        assert!((out[0] - high as f32 * INT16_TO_FLOAT).abs() < 1e-5);
        assert_eq!(p.stats().gate_activations, 1);
    }

    #[test]
    fn gate_knee_is_continuous() {
        let mut cfg = quiet_config();
        cfg.enable_noise_gate = true;
        let p = Preprocessor::new(cfg.clone(), 16_000);

        // Gain at the knee boundaries matches the flat regions.
        let lower = cfg.noise_gate_threshold - cfg.noise_gate_knee / 2.0;
        let upper = cfg.noise_gate_threshold + cfg.noise_gate_knee / 2.0;
        let (at_lower, _) = p.apply_gate(lower);
        let (at_upper, _) = p.apply_gate(upper);
        assert!((at_lower - lower / cfg.noise_gate_ratio).abs() < 1e-6);
        assert!((at_upper - upper).abs() < 1e-6);
    }

    #[test]
    fn full_chain_on_noise_stays_bounded() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(42);
        let mut p = Preprocessor::new(PreprocessConfig::default(), 16_000);
        let mut out = [0.0f32; 320];
        for _ in 0..100 {
            let input: Vec<i16> = (0..320).map(|_| rng.gen()).collect();
            p.process(&input, &mut out).unwrap();
            for &v in &out {
                assert!(v.is_finite());
                assert!((-1.0..=1.0).contains(&v), "sample {} out of range", v);
            }
        }
        assert_eq!(p.stats().frames_processed, 100);
    }

    #[test]
    fn reset_clears_filter_memory() {
        let mut cfg = quiet_config();
        cfg.enable_dc_block = true;
        let mut p = Preprocessor::new(cfg, 16_000);
        let input = [12000i16; 320];
        let mut out = [0.0f32; 320];
        p.process(&input, &mut out).unwrap();
        p.reset();
        p.process(&input, &mut out).unwrap();
        // First output after reset equals first input, as if freshly built.
        assert!((out[0] - 12000.0 * INT16_TO_FLOAT).abs() < 1e-6);
    }
}
