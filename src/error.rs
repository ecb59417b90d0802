//! Error types for the Gatekeeper crate.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// A limiter was constructed with parameters it cannot honor
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration sources could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// No async runtime available for a background task
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for GatekeeperError {
    fn from(err: ::config::ConfigError) -> Self {
        GatekeeperError::Config(err.to_string())
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;

/// Fail with [`GatekeeperError::InvalidConfiguration`] when `value` is zero.
pub(crate) fn ensure_positive(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(GatekeeperError::InvalidConfiguration(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(())
}

/// Fail with [`GatekeeperError::InvalidConfiguration`] when `value` is zero.
pub(crate) fn ensure_nonzero_duration(name: &str, value: std::time::Duration) -> Result<()> {
    if value.is_zero() {
        return Err(GatekeeperError::InvalidConfiguration(format!(
            "{name} must be a positive duration"
        )));
    }
    Ok(())
}
