pub mod ai;
pub mod pipeline;

pub use pipeline::{PipelineConfig, SourceDescriptor};
