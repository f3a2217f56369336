//! Unified error handling for the timeline library.
//!
//! Pipeline stages never fail on bad data: they call the fallible per-record
//! parsers below and drop whatever comes back as an error. Only configuration
//! loading surfaces a [`TimelineError`] to the caller.

use thiserror::Error;

/// Unified error type for timeline operations.
#[derive(Debug, Error)]
pub enum TimelineError {
    /// A timestamp string could not be parsed as RFC 3339
    #[error("Invalid timestamp '{value}': {message}")]
    InvalidTimestamp { value: String, message: String },

    /// Latitude/longitude outside the valid range or not finite
    #[error("Invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    /// A record whose end is not after its start
    #[error("Invalid time range for '{id}': end is not after start")]
    InvalidTimeRange { id: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// JSON (config or evidence metadata) could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for timeline operations.
pub type Result<T> = std::result::Result<T, TimelineError>;

/// Extension trait for converting Option to TimelineError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a configuration error.
    fn ok_or_config(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_config(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TimelineError::Config {
            message: message.to_string(),
        })
    }
}
