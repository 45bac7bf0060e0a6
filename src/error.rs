//! Custom error types for acadmetrics.
//!
//! This module defines all error types used throughout the application.
//! All functions return `Result<T, AcadError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for acadmetrics operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum AcadError {
    /// A raw record failed normalization beyond salvageable defaults
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTML/JSON parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited by external API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code from API
        code: i32,
        /// Error message from API
        message: String,
    },

    /// Classification request or response violated the expected schema
    #[error("Classification error: {0}")]
    Classification(String),

    /// Persistence store read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using `AcadError`
pub type Result<T> = std::result::Result<T, AcadError>;
