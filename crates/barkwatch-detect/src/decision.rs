use barkwatch_foundation::DecisionConfig;
use tracing::debug;

use crate::smoothing::ConfidenceSmoother;
use crate::types::{AudioClass, BarkEvent, ConfidenceVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionState {
    Idle,
    /// Above threshold but not yet held for the minimum duration.
    CandidateActive,
    /// Event emitted; waiting out the re-arm cooldown.
    Confirmed,
}

/// Temporal gating over per-cycle confidences.
///
/// A candidate opens when the smoothed target-class confidence crosses the
/// threshold and is confirmed after `min_duration_ms` of sustained activity.
/// Confirmation emits the episode's single event immediately; `debounce_ms`
/// is purely a cooldown — the machine re-arms once confidence has stayed
/// below threshold for that long, and no further event fires until it does.
/// Timestamps are supplied by the caller so the machine is deterministic
/// under test.
pub struct TemporalDecision {
    state: DecisionState,
    smoothers: Vec<ConfidenceSmoother>,
    target_class: AudioClass,
    target_index: usize,
    confidence_threshold: f32,
    min_duration_ms: u64,
    debounce_ms: u64,

    episode_start_ms: u64,
    last_above_ms: u64,
    peak_confidence: f32,
    episodes_confirmed: u64,
    candidates_rejected: u64,
}

impl TemporalDecision {
    pub fn new(config: &DecisionConfig) -> Self {
        let target_class =
            AudioClass::from_index(config.target_class).unwrap_or(AudioClass::DogBark);
        let smoothers = (0..config.num_classes)
            .map(|_| ConfidenceSmoother::new(config.ema_alpha, config.median_window))
            .collect();
        Self {
            state: DecisionState::Idle,
            smoothers,
            target_class,
            target_index: config.target_class,
            confidence_threshold: config.confidence_threshold,
            min_duration_ms: config.min_duration_ms,
            debounce_ms: config.debounce_ms,
            episode_start_ms: 0,
            last_above_ms: 0,
            peak_confidence: 0.0,
            episodes_confirmed: 0,
            candidates_rejected: 0,
        }
    }

    /// Feed one classification cycle. Skipped cycles simply don't call this;
    /// the machine then holds its state, which is the intended behavior.
    pub fn update(&mut self, timestamp_ms: u64, confidences: &ConfidenceVector) -> Option<BarkEvent> {
        // Every class is smoothed so its trajectory stays usable, even
        // though only the target class drives transitions.
        let mut smoothed = 0.0;
        for (index, smoother) in self.smoothers.iter_mut().enumerate() {
            let value = smoother.update(confidences.get(index));
            if index == self.target_index {
                smoothed = value;
            }
        }
        let above = smoothed >= self.confidence_threshold;

        match self.state {
            DecisionState::Idle => {
                if above {
                    self.state = DecisionState::CandidateActive;
                    self.episode_start_ms = timestamp_ms;
                    self.last_above_ms = timestamp_ms;
                    self.peak_confidence = smoothed;
                    debug!(timestamp_ms, smoothed, "candidate opened");

                    if self.min_duration_ms == 0 {
                        return Some(self.confirm_episode(timestamp_ms));
                    }
                }
                None
            }

            DecisionState::CandidateActive => {
                if above {
                    self.last_above_ms = timestamp_ms;
                    self.peak_confidence = self.peak_confidence.max(smoothed);
                    if timestamp_ms - self.episode_start_ms >= self.min_duration_ms {
                        return Some(self.confirm_episode(timestamp_ms));
                    }
                } else if timestamp_ms - self.last_above_ms >= self.debounce_ms {
                    // Never held long enough: reject without an event.
                    self.state = DecisionState::Idle;
                    self.candidates_rejected += 1;
                    debug!(timestamp_ms, "candidate rejected");
                }
                None
            }

            DecisionState::Confirmed => {
                if above {
                    self.last_above_ms = timestamp_ms;
                } else if timestamp_ms - self.last_above_ms >= self.debounce_ms {
                    // Cooldown elapsed; the machine may open a new episode.
                    self.state = DecisionState::Idle;
                    debug!(timestamp_ms, "episode ended, re-armed");
                }
                None
            }
        }
    }

    /// End an in-flight episode, e.g. at shutdown. A confirmed episode has
    /// already been reported; an unconfirmed candidate is rejected.
    pub fn flush(&mut self) {
        if self.state == DecisionState::CandidateActive {
            self.candidates_rejected += 1;
        }
        self.state = DecisionState::Idle;
    }

    fn confirm_episode(&mut self, timestamp_ms: u64) -> BarkEvent {
        self.state = DecisionState::Confirmed;
        self.episodes_confirmed += 1;
        debug!(
            timestamp_ms,
            start_ms = self.episode_start_ms,
            "candidate confirmed"
        );
        let event = BarkEvent {
            class: self.target_class,
            confidence: self.peak_confidence,
            timestamp_ms: self.episode_start_ms,
            duration_ms: (timestamp_ms - self.episode_start_ms).max(1),
        };
        self.peak_confidence = 0.0;
        event
    }

    pub fn state(&self) -> DecisionState {
        self.state
    }

    pub fn episodes_confirmed(&self) -> u64 {
        self.episodes_confirmed
    }

    pub fn candidates_rejected(&self) -> u64 {
        self.candidates_rejected
    }

    pub fn reset(&mut self) {
        self.state = DecisionState::Idle;
        for smoother in &mut self.smoothers {
            smoother.reset();
        }
        self.peak_confidence = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CYCLE_MS: u64 = 100;

    fn test_config() -> DecisionConfig {
        DecisionConfig {
            num_classes: 4,
            target_class: 0,
            // Alpha 1.0 and window 1 disable smoothing so these tests drive
            // the state machine with exact values.
            ema_alpha: 1.0,
            median_window: 1,
            confidence_threshold: 0.8,
            min_duration_ms: 300,
            debounce_ms: 500,
            classifier_budget_ms: 100,
            analysis_poll_ms: 10,
        }
    }

    fn bark(confidence: f32) -> ConfidenceVector {
        ConfidenceVector::new(vec![confidence, 0.1, 0.1, 0.1])
    }

    fn drive(
        decision: &mut TemporalDecision,
        start_cycle: u64,
        values: &[f32],
    ) -> Vec<(u64, BarkEvent)> {
        let mut events = Vec::new();
        for (i, &v) in values.iter().enumerate() {
            let ts = (start_cycle + i as u64) * CYCLE_MS;
            if let Some(e) = decision.update(ts, &bark(v)) {
                events.push((ts, e));
            }
        }
        events
    }

    #[test]
    fn sustained_bark_emits_one_event_on_confirmation() {
        let mut d = TemporalDecision::new(&test_config());

        // 8 cycles above threshold, then silence.
        let mut values = vec![0.9; 8];
        values.extend(vec![0.1; 8]);
        let events = drive(&mut d, 0, &values);

        assert_eq!(events.len(), 1);
        let (emitted_at, event) = &events[0];
        // The event fires the moment the hold time is reached, not when the
        // episode ends.
        assert_eq!(*emitted_at, 300);
        assert_eq!(event.class, AudioClass::DogBark);
        assert_eq!(event.timestamp_ms, 0);
        assert_eq!(event.duration_ms, 300);
        assert!((event.confidence - 0.9).abs() < 1e-6);
        assert_eq!(d.state(), DecisionState::Idle);
    }

    #[test]
    fn ongoing_bark_is_reported_without_waiting_for_quiet() {
        let mut d = TemporalDecision::new(&test_config());

        // 2000ms of uninterrupted high confidence; the episode never ends.
        let events = drive(&mut d, 0, &[0.9; 20]);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, 300);
        assert_eq!(d.state(), DecisionState::Confirmed);
        assert_eq!(d.episodes_confirmed(), 1);
    }

    #[test]
    fn brief_blip_is_rejected_without_event() {
        let mut d = TemporalDecision::new(&test_config());

        // Two cycles above (100ms span, under the 300ms minimum).
        let mut values = vec![0.9; 2];
        values.extend(vec![0.1; 10]);
        let events = drive(&mut d, 0, &values);

        assert!(events.is_empty());
        assert_eq!(d.candidates_rejected(), 1);
        assert_eq!(d.state(), DecisionState::Idle);
    }

    #[test]
    fn burst_within_cooldown_is_absorbed() {
        let mut d = TemporalDecision::new(&test_config());

        // A confirmed episode, a 200ms dip (under the 500ms cooldown), then
        // another burst: still one acoustic incident, one event.
        let mut values = vec![0.9; 5];
        values.extend(vec![0.1; 2]);
        values.extend(vec![0.9; 4]);
        values.extend(vec![0.1; 8]);
        let events = drive(&mut d, 0, &values);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, 300);
        assert_eq!(d.episodes_confirmed(), 1);
        assert_eq!(d.state(), DecisionState::Idle);
    }

    #[test]
    fn separated_episodes_emit_separate_events() {
        let mut d = TemporalDecision::new(&test_config());

        let mut values = vec![0.9; 5];
        values.extend(vec![0.1; 8]); // 800ms gap, past the cooldown
        values.extend(vec![0.9; 5]);
        values.extend(vec![0.1; 8]);
        let events = drive(&mut d, 0, &values);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1.timestamp_ms, 0);
        assert_eq!(events[1].1.timestamp_ms, 13 * CYCLE_MS);
        // Each confirmation comes 300ms into its own burst.
        assert_eq!(events[1].0, 16 * CYCLE_MS);
        assert_eq!(d.episodes_confirmed(), 2);
    }

    #[test]
    fn smoothing_delays_onset_and_rejects_spikes() {
        let config = DecisionConfig {
            ema_alpha: 0.3,
            median_window: 5,
            ..test_config()
        };
        let mut d = TemporalDecision::new(&config);

        // A single high cycle surrounded by noise never crosses threshold.
        let values = [0.1, 0.95, 0.1, 0.1, 0.1, 0.1, 0.1];
        let events = drive(&mut d, 0, &values);
        assert!(events.is_empty());
        assert_eq!(d.state(), DecisionState::Idle);
    }

    #[test]
    fn flush_returns_confirmed_machine_to_idle() {
        let mut d = TemporalDecision::new(&test_config());

        let events = drive(&mut d, 0, &[0.9; 5]);
        assert_eq!(events.len(), 1);
        assert_eq!(d.state(), DecisionState::Confirmed);

        d.flush();
        assert_eq!(d.state(), DecisionState::Idle);
        assert_eq!(d.candidates_rejected(), 0);
    }

    #[test]
    fn flush_discards_unconfirmed_candidate() {
        let mut d = TemporalDecision::new(&test_config());
        drive(&mut d, 0, &[0.9; 2]);
        assert_eq!(d.state(), DecisionState::CandidateActive);
        d.flush();
        assert_eq!(d.state(), DecisionState::Idle);
        assert_eq!(d.candidates_rejected(), 1);
    }

    #[test]
    fn zero_min_duration_confirms_immediately() {
        let config = DecisionConfig {
            min_duration_ms: 0,
            ..test_config()
        };
        let mut d = TemporalDecision::new(&config);
        let event = d.update(0, &bark(0.9)).expect("immediate event");
        assert_eq!(event.duration_ms, 1);
        assert_eq!(d.state(), DecisionState::Confirmed);
    }
}
