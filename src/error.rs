use std::io;

/// All error types for the scan-metrics crate.
///
/// The geometry engines never produce these: malformed geometry degrades to
/// well-defined sentinel results instead. Errors come from construction-time
/// validation and from reading capture files.
#[derive(thiserror::Error, Debug)]
pub enum ScanMetricsError {
    #[error("Input error: {0}")]
    Input(String),
    #[error("Format error: {0}")]
    Format(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ScanMetricsError>;
