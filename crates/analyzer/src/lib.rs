pub mod host;

pub use host::PipelineHost;
