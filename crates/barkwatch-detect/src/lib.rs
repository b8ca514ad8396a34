pub mod classifier;
pub mod decision;
pub mod energy;
pub mod smoothing;
pub mod types;

pub use classifier::Classifier;
pub use decision::{DecisionState, TemporalDecision};
pub use energy::EnergyClassifier;
pub use smoothing::ConfidenceSmoother;
pub use types::{AudioClass, BarkEvent, ConfidenceVector};
