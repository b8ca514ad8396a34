use barkwatch_dsp::FeatureMatrix;
use barkwatch_foundation::ClassifierError;

use crate::types::ConfidenceVector;

/// Interface for the classification stage.
///
/// Implementations are opaque to the pipeline: it only checks that the
/// declared input shape matches the feature extractor at startup and treats
/// per-cycle failures as skippable.
pub trait Classifier: Send {
    /// Classify one feature matrix into per-class confidences.
    fn classify(&mut self, features: &FeatureMatrix) -> Result<ConfidenceVector, ClassifierError>;

    /// Number of classes in the output vector.
    fn num_classes(&self) -> usize;

    /// Expected feature matrix shape, `(time_frames, bands)`.
    fn input_shape(&self) -> (usize, usize);
}
