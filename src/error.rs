//! Error types for the Slidewin service.

use thiserror::Error;

use crate::ratelimit::LimiterError;
use crate::store::StoreError;

/// Main error type for Slidewin operations.
#[derive(Error, Debug)]
pub enum SlidewinError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limiting errors
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] LimiterError),

    /// Shared store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for SlidewinError {
    fn from(err: ::config::ConfigError) -> Self {
        SlidewinError::Config(err.to_string())
    }
}

/// Result type alias for Slidewin operations.
pub type Result<T> = std::result::Result<T, SlidewinError>;
