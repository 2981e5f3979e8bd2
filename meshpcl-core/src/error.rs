//! Error types for meshpcl

use thiserror::Error;

/// Main error type for meshpcl operations
#[derive(Error, Debug)]
pub enum Error {
    /// A parameter is out of range or a strategy identifier is unknown
    #[error("Configuration error: {0}")]
    Config(String),

    /// The input is empty or too small for the requested operation
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    /// The solver or triangulation could not produce a surface
    #[error("Reconstruction error: {0}")]
    Reconstruction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl Error {
    /// Shorthand for [`Error::Config`]
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Shorthand for [`Error::DegenerateInput`]
    pub fn degenerate(msg: impl Into<String>) -> Self {
        Error::DegenerateInput(msg.into())
    }

    /// Shorthand for [`Error::Reconstruction`]
    pub fn reconstruction(msg: impl Into<String>) -> Self {
        Error::Reconstruction(msg.into())
    }
}

/// Result type alias for meshpcl operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().starts_with("I/O error"));
    }

    #[test]
    fn shorthand_constructors_pick_variants() {
        assert!(matches!(Error::config("leaf"), Error::Config(_)));
        assert!(matches!(Error::degenerate("empty"), Error::DegenerateInput(_)));
        assert!(matches!(Error::reconstruction("nan"), Error::Reconstruction(_)));
    }
}
