// src/error.rs

//! Unified error handling for the locator engine and crawl sessions.

use std::fmt;

use thiserror::Error;

use crate::driver::DriverError;
use crate::models::{Field, LocatorSet};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Whether an attempt that produced an error may be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// An evidence source produced nothing
    #[error("Evidence unavailable: {0}")]
    EvidenceUnavailable(String),

    /// A required field has no valid locator after fusion
    #[error("No usable locator for required field '{field}' (confidence {confidence:.3})")]
    LocatorUnresolvable {
        field: Field,
        partial: LocatorSet,
        confidence: f64,
    },

    /// The driver could not reach a page
    #[error("Navigation to {url} failed: {reason}")]
    NavigationFailure { url: String, reason: String },

    /// The automation capability is unusable
    #[error("Browser driver crashed: {0}")]
    DriverCrash(String),

    /// Driver failure not yet classified by the caller
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Illegal session state change
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Unknown session id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Export requested for a session that did not complete
    #[error("Export unavailable: {0}")]
    ExportUnavailable(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a navigation failure for a URL.
    pub fn navigation(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::NavigationFailure {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid transition error.
    pub fn transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Classify the error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Driver(e) => e.class(),
            Self::NavigationFailure { .. } | Self::Http(_) | Self::EvidenceUnavailable(_) => {
                ErrorClass::Retryable
            }
            _ => ErrorClass::Fatal,
        }
    }
}
