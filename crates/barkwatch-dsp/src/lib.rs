pub mod error;
pub mod features;
pub mod mel;
pub mod preprocess;
pub mod window;

pub use error::{DspError, ExtractError};
pub use features::{FeatureExtractor, FeatureMatrix};
pub use mel::MelFilterbank;
pub use preprocess::{Preprocessor, PreprocessStats};
pub use window::generate_window;

/// Scale factor from i16 PCM to normalized f32.
pub const INT16_TO_FLOAT: f32 = 1.0 / 32768.0;
