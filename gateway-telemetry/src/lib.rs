//! Logging setup for the gateway.
//!
//! Diagnostics always go to stderr: stdout carries protocol responses only.

#![warn(missing_docs, clippy::pedantic)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive did not parse.
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter {
        /// Directive as supplied.
        directive: String,
        /// Parser message.
        reason: String,
    },
}

/// Parses a `tracing` env-filter directive such as `info,gateway_kernel=debug`.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] when the directive is malformed.
pub fn filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directive).map_err(|err| TelemetryError::InvalidFilter {
        directive: directive.to_owned(),
        reason: err.to_string(),
    })
}

/// Installs the global fmt subscriber writing to stderr.
///
/// Returns `false` when a subscriber was already installed, which leaves the
/// existing one in place.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] when the directive is malformed.
pub fn init(directive: &str) -> Result<bool, TelemetryError> {
    let filter = filter(directive)?;
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .is_ok();
    Ok(installed)
}
