use serde::{Deserialize, Serialize};

/// Sound categories the pipeline distinguishes. The discriminants match the
/// classifier's output vector indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(usize)]
pub enum AudioClass {
    DogBark = 0,
    Speech = 1,
    Ambient = 2,
    Silence = 3,
}

impl AudioClass {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::DogBark),
            1 => Some(Self::Speech),
            2 => Some(Self::Ambient),
            3 => Some(Self::Silence),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::DogBark => "dog_bark",
            Self::Speech => "speech",
            Self::Ambient => "ambient",
            Self::Silence => "silence",
        }
    }
}

/// One classification cycle's per-class confidences, in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceVector {
    values: Vec<f32>,
}

impl ConfidenceVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn num_classes(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, class_index: usize) -> f32 {
        self.values.get(class_index).copied().unwrap_or(0.0)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Index and confidence of the winning class.
    pub fn argmax(&self) -> (usize, f32) {
        self.values
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |(bi, bv), (i, &v)| {
                if v > bv {
                    (i, v)
                } else {
                    (bi, bv)
                }
            })
    }
}

/// A confirmed, debounced detection. Emitted once per bark episode when the
/// episode ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarkEvent {
    pub class: AudioClass,
    /// Peak smoothed confidence observed during the episode.
    pub confidence: f32,
    /// Pipeline timestamp of the episode's first above-threshold cycle.
    pub timestamp_ms: u64,
    /// Time from first above-threshold cycle to the last one.
    pub duration_ms: u64,
}
