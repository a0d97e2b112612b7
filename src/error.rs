//! Error handling for the framesight pipeline daemon.
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the library.

use thiserror::Error;

/// Main error type for framesight operations
#[derive(Error, Debug)]
pub enum FramesightError {
    /// Errors raised while loading or parsing the pipeline description
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graph validation failures (unresolved targets, cycles, bad wiring)
    #[error("Graph error: {0}")]
    Graph(#[from] crate::graph::GraphError),

    /// Frame conversion failures
    #[error("Conversion error: {0}")]
    Convert(#[from] crate::convert::ConvertError),

    /// Image encoding failures
    #[error("Encoding error: {0}")]
    Encode(#[from] image::ImageError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FramesightError>,
    },
}

impl FramesightError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FramesightError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for framesight operations
pub type Result<T> = std::result::Result<T, FramesightError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<FramesightError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FramesightError::Config("pipeline list is empty".to_string());
        assert_eq!(err.to_string(), "Configuration error: pipeline list is empty");
    }

    #[test]
    fn test_error_with_context() {
        let err = FramesightError::Config("bad field".to_string());
        let with_ctx = err.with_context("Failed to load /etc/framesight.json");
        assert!(with_ctx.to_string().contains("Failed to load"));
        assert!(with_ctx.to_string().contains("bad field"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: FramesightError = io.into();
        assert!(err.to_string().contains("no such file"));
    }
}
