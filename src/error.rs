//! Error types for the discovery core
//!
//! Most public entry points of the coordinator never surface these errors to
//! callers (they log and return `bool`/`Option`), but everything underneath
//! propagates them with `?`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Error types for discovery and interface inventory operations
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another sighting of the same device is being merged
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Invalid input errors (bad location URL, empty USN)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Network errors
    #[error("Network error: {0}")]
    Network(String),

    /// Scanner or service plugin failures
    #[error("Plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    /// Remote peer registration failures
    #[error("Registration failed: {0}")]
    Registration(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Resource exhausted (no free port in range)
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The host is shutting down
    #[error("System is shutting down")]
    ShuttingDown,

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// TOML configuration parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Structured error code for machine-readable error handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Input errors (1400-1499)
    InvalidInput,
    ParsingFailed,

    // Configuration errors (1200-1299)
    ConfigurationInvalid,

    // Contention and resources (1500-1599)
    Busy,
    ResourceExhausted,

    // Plugin and transport errors (1600-1699)
    PluginFailure,
    NetworkUnreachable,
    ServiceTimeout,
    ExternalServiceError,

    // Internal errors (1900-1999)
    ShuttingDown,
    InternalError,
}

impl ErrorCode {
    /// Get numeric error code
    pub fn as_number(&self) -> u32 {
        match self {
            ErrorCode::ConfigurationInvalid => 1202,
            ErrorCode::InvalidInput => 1402,
            ErrorCode::ParsingFailed => 1401,
            ErrorCode::Busy => 1502,
            ErrorCode::ResourceExhausted => 1501,
            ErrorCode::PluginFailure => 1604,
            ErrorCode::NetworkUnreachable => 1004,
            ErrorCode::ServiceTimeout => 1602,
            ErrorCode::ExternalServiceError => 1603,
            ErrorCode::ShuttingDown => 1903,
            ErrorCode::InternalError => 1901,
        }
    }

    /// Get error category
    pub fn category(&self) -> &'static str {
        match self.as_number() {
            1000..=1099 => "connection",
            1200..=1299 => "configuration",
            1400..=1499 => "data",
            1500..=1599 => "resource",
            1600..=1699 => "service",
            1900..=1999 => "internal",
            _ => "unknown",
        }
    }
}

impl DiscoveryError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        DiscoveryError::Config(msg.into())
    }

    /// Create a discovery error
    pub fn discovery<S: Into<String>>(msg: S) -> Self {
        DiscoveryError::Discovery(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        DiscoveryError::InvalidInput(msg.into())
    }

    /// Create a network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        DiscoveryError::Network(msg.into())
    }

    /// Create a plugin error attributed to a plugin owner ID
    pub fn plugin<P: Into<String>, S: Into<String>>(plugin: P, msg: S) -> Self {
        DiscoveryError::Plugin {
            plugin: plugin.into(),
            message: msg.into(),
        }
    }

    /// Create a registration error
    pub fn registration<S: Into<String>>(msg: S) -> Self {
        DiscoveryError::Registration(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        DiscoveryError::Timeout(msg.into())
    }

    /// Create a resource exhausted error
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        DiscoveryError::ResourceExhausted(msg.into())
    }

    /// Convert error to structured error code
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            DiscoveryError::Config(_) | DiscoveryError::Toml(_) => ErrorCode::ConfigurationInvalid,
            DiscoveryError::Discovery(_) => ErrorCode::Busy,
            DiscoveryError::InvalidInput(_) | DiscoveryError::Url(_) => ErrorCode::InvalidInput,
            DiscoveryError::Json(_) => ErrorCode::ParsingFailed,
            DiscoveryError::Network(_) => ErrorCode::NetworkUnreachable,
            DiscoveryError::Plugin { .. } => ErrorCode::PluginFailure,
            DiscoveryError::Registration(_) | DiscoveryError::Http(_) => {
                ErrorCode::ExternalServiceError
            }
            DiscoveryError::Timeout(_) => ErrorCode::ServiceTimeout,
            DiscoveryError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            DiscoveryError::ShuttingDown => ErrorCode::ShuttingDown,
            DiscoveryError::Io(_) | DiscoveryError::Generic(_) => ErrorCode::InternalError,
        }
    }

    /// Check if error is retryable
    ///
    /// Contention and transport failures are worth another attempt; malformed
    /// input and shutdown are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DiscoveryError::Discovery(_)
                | DiscoveryError::Network(_)
                | DiscoveryError::Timeout(_)
                | DiscoveryError::Http(_)
                | DiscoveryError::Registration(_)
        )
    }
}
