//! Runner error normalization into a retry-relevant taxonomy.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use gateway_primitives::ToolId;
use gateway_runners::{ErrorCode, RunnerError};
use regex::Regex;
use serde::{Deserialize, Serialize};

static RATE_LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)rate.?limit|throttl").expect("valid rate limit regex"));
static AUTH_FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)unauthorized|auth.*fail|invalid.*token").expect("valid auth regex")
});
static RETRYABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)timeout|unavailable|retry later").expect("valid retryable regex")
});

/// Retry-relevant error category surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Caller is being throttled; retry after backing off.
    RateLimit,
    /// Credentials were rejected; retrying will not help.
    AuthFailure,
    /// Transient failure; safe to retry.
    Retryable,
    /// Permanent failure.
    Fatal,
}

impl ErrorCategory {
    /// Returns `true` for categories a caller may retry.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimit | Self::Retryable)
    }

    /// Wire name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::AuthFailure => "AUTH_FAILURE",
            Self::Retryable => "RETRYABLE",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runner failure reduced to a category plus diagnostics.
///
/// `retryable` is always derived from the category, never set independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedError {
    category: ErrorCategory,
    retryable: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    non_retryable_reason: Option<String>,
}

impl NormalizedError {
    fn classified(
        category: ErrorCategory,
        error: &RunnerError,
        rule: impl FnOnce() -> String,
    ) -> Self {
        let retryable = category.is_retryable();
        let original_code = error
            .code()
            .cloned()
            .or_else(|| error.status_code().map(|status| ErrorCode::Number(i64::from(status))));
        Self {
            category,
            retryable,
            message: error.message().to_owned(),
            original_code,
            non_retryable_reason: (!retryable).then(rule),
        }
    }

    /// Returns the category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    /// Returns `true` when the caller may retry.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    /// Returns the runner's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the runner's error code, or its status code when no code was set.
    #[must_use]
    pub fn original_code(&self) -> Option<&ErrorCode> {
        self.original_code.as_ref()
    }

    /// Returns why a non-retryable error was classified as such.
    #[must_use]
    pub fn non_retryable_reason(&self) -> Option<&str> {
        self.non_retryable_reason.as_deref()
    }
}

/// Tool-specific classification consulted when no status code matched.
///
/// Implementations must be pure; returning `None` defers to the message rules.
pub trait ErrorMap: Send + Sync {
    /// Categorizes the error, or returns `None` to fall through.
    fn categorize(&self, error: &RunnerError) -> Option<ErrorCategory>;
}

impl<F> ErrorMap for F
where
    F: Fn(&RunnerError) -> Option<ErrorCategory> + Send + Sync,
{
    fn categorize(&self, error: &RunnerError) -> Option<ErrorCategory> {
        (self)(error)
    }
}

/// Error maps registered per tool id.
#[derive(Clone, Default)]
pub struct ErrorMaps {
    maps: HashMap<ToolId, Arc<dyn ErrorMap>>,
}

impl fmt::Debug for ErrorMaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tools: Vec<_> = self.maps.keys().map(ToolId::as_str).collect();
        tools.sort_unstable();
        f.debug_struct("ErrorMaps").field("tools", &tools).finish()
    }
}

impl ErrorMaps {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the error map for a tool, replacing any previous one.
    pub fn register<M>(&mut self, tool: ToolId, map: M)
    where
        M: ErrorMap + 'static,
    {
        self.maps.insert(tool, Arc::new(map));
    }

    /// Builder-style variant of [`ErrorMaps::register`].
    #[must_use]
    pub fn with<M>(mut self, tool: ToolId, map: M) -> Self
    where
        M: ErrorMap + 'static,
    {
        self.register(tool, map);
        self
    }

    /// Returns the map registered for a tool.
    #[must_use]
    pub fn get(&self, tool: &ToolId) -> Option<&dyn ErrorMap> {
        self.maps.get(tool).map(|map| &**map)
    }
}

fn categorize_status(status: u16) -> Option<ErrorCategory> {
    match status {
        401 | 403 => Some(ErrorCategory::AuthFailure),
        429 => Some(ErrorCategory::RateLimit),
        408 | 500.. => Some(ErrorCategory::Retryable),
        400..=499 => Some(ErrorCategory::Fatal),
        _ => None,
    }
}

fn categorize_message(message: &str) -> Option<ErrorCategory> {
    if RATE_LIMIT_RE.is_match(message) {
        Some(ErrorCategory::RateLimit)
    } else if AUTH_FAILURE_RE.is_match(message) {
        Some(ErrorCategory::AuthFailure)
    } else if RETRYABLE_RE.is_match(message) {
        Some(ErrorCategory::Retryable)
    } else {
        None
    }
}

/// Normalizes a runner error. First match wins: status code, tool error map,
/// message patterns, then `FATAL`.
#[must_use]
pub fn normalize(error: &RunnerError, error_map: Option<&dyn ErrorMap>) -> NormalizedError {
    if let Some(status) = error.status_code()
        && let Some(category) = categorize_status(status)
    {
        return NormalizedError::classified(category, error, || format!("status code {status}"));
    }
    if let Some(category) = error_map.and_then(|map| map.categorize(error)) {
        return NormalizedError::classified(category, error, || "tool error map".to_owned());
    }
    if let Some(category) = categorize_message(error.message()) {
        return NormalizedError::classified(category, error, || "message pattern".to_owned());
    }
    NormalizedError::classified(ErrorCategory::Fatal, error, || {
        "unclassified error".to_owned()
    })
}
