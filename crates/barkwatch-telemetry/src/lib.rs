pub mod fps;
pub mod pipeline_stats;

pub use fps::*;
pub use pipeline_stats::*;
