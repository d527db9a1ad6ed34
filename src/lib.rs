pub mod config;
pub mod coverage;
pub mod error;
pub mod ingestion;
pub mod measure;
pub mod pipeline;
pub mod sync;
pub mod types;

pub use config::{PipelineConfig, Units};
pub use error::ScanMetricsError;
pub use pipeline::Pipeline;
