pub mod analysis;
pub mod runtime;

pub use runtime::PipelineHandle;
