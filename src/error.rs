//! Error types for the grader

use thiserror::Error;

/// Result type alias for grading operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while grading a batch
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to launch the browser or open a page context
    #[error("Browser launch failed: {0}")]
    LaunchError(String),

    /// Missing `index.html`, failed navigation or navigation timeout
    #[error("Navigation failed: {0}")]
    NavigationError(String),

    /// Failed to capture a screenshot
    #[error("Screenshot failed: {0}")]
    CaptureError(String),

    /// Missing, unreadable or invalid PNG
    #[error("Failed to decode PNG: {0}")]
    DecodeError(String),

    /// Failed to encode a raster as PNG
    #[error("Failed to encode PNG: {0}")]
    EncodeError(String),

    /// Malformed submission metadata
    #[error("Failed to parse {0}")]
    ParseError(String),

    /// Directory listing or file read/write failed
    #[error("Filesystem error: {0}")]
    FilesystemError(String),

    /// Reference and rendered rasters differ in size
    #[error("Image sizes do not match: reference {reference:?}, rendered {rendered:?}")]
    DimensionMismatch {
        reference: (u32, u32),
        rendered: (u32, u32),
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
