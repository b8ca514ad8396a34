use thiserror::Error;

/// Per-frame preprocessing failure. Filter state is untouched when one of
/// these is returned.
#[derive(Error, Debug, PartialEq)]
pub enum DspError {
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("Output buffer too small: {got} < {need}")]
    OutputTooSmall { got: usize, need: usize },
}

/// Per-cycle feature-extraction failure. Non-fatal: the caller skips the
/// classification cycle.
#[derive(Error, Debug, PartialEq)]
pub enum ExtractError {
    #[error("Insufficient samples: {available} available, {required} required")]
    InsufficientSamples { available: usize, required: usize },

    #[error("Feature matrix shape mismatch: got {got:?}, expected {expected:?}")]
    ShapeMismatch {
        got: (usize, usize),
        expected: (usize, usize),
    },
}
