use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "options.temperature")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "request_validator", "file_store")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Classification of a failed backend call.
///
/// The kind decides whether the fallback chain keeps going (`retryable`)
/// or aborts immediately and surfaces the error to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    RateLimited,
    Timeout,
    Network,
    Overloaded,
    ServerError,
    Authentication,
    InvalidRequest,
}

impl BackendErrorKind {
    /// Whether a failure of this kind should drive fallback to the next backend.
    ///
    /// Transient failures (rate limits, timeouts, network, server-side) are
    /// retryable; authentication and malformed requests fail on any backend
    /// and abort the chain.
    pub fn default_retryable(&self) -> bool {
        match self {
            BackendErrorKind::RateLimited
            | BackendErrorKind::Timeout
            | BackendErrorKind::Network
            | BackendErrorKind::Overloaded
            | BackendErrorKind::ServerError => true,
            BackendErrorKind::Authentication | BackendErrorKind::InvalidRequest => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorKind::RateLimited => "rate_limited",
            BackendErrorKind::Timeout => "timeout",
            BackendErrorKind::Network => "network",
            BackendErrorKind::Overloaded => "overloaded",
            BackendErrorKind::ServerError => "server_error",
            BackendErrorKind::Authentication => "authentication",
            BackendErrorKind::InvalidRequest => "invalid_request",
        }
    }
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed attempt inside a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub backend: String,
    pub error: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.backend, self.error)
    }
}

/// Unified error type for the optimizer pipeline.
///
/// Only `Validation`, `CircuitOpen` and `AllBackendsFailed` are expected to
/// reach callers of `optimize`; everything else is pipeline-internal
/// bookkeeping. `Error` is `Clone` so a single in-flight computation can
/// report its outcome to every coalesced waiter.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Cache error: {message}{}", format_context(.context))]
    Cache {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Backend '{backend}' failed ({kind}): {message}")]
    Backend {
        backend: String,
        kind: BackendErrorKind,
        message: String,
        retryable: bool,
    },

    #[error("circuit open for every eligible backend: {}", .backends.join(", "))]
    CircuitOpen { backends: Vec<String> },

    #[error("all backends failed ({} attempts): {}", .attempts.len(), format_attempts(.attempts))]
    AllBackendsFailed { attempts: Vec<AttemptFailure> },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new cache error with structured context
    pub fn cache_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Cache {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a backend error, deriving `retryable` from the kind.
    pub fn backend(
        backend: impl Into<String>,
        kind: BackendErrorKind,
        msg: impl Into<String>,
    ) -> Self {
        Error::Backend {
            backend: backend.into(),
            kind,
            message: msg.into(),
            retryable: kind.default_retryable(),
        }
    }

    /// Whether the fallback chain may continue past this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Backend { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Validation { context, .. }
            | Error::Cache { context, .. }
            | Error::Configuration { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_retryability() {
        assert!(BackendErrorKind::RateLimited.default_retryable());
        assert!(BackendErrorKind::Timeout.default_retryable());
        assert!(BackendErrorKind::Network.default_retryable());
        assert!(!BackendErrorKind::Authentication.default_retryable());
        assert!(!BackendErrorKind::InvalidRequest.default_retryable());
    }

    #[test]
    fn test_backend_error_carries_retryable() {
        let err = Error::backend("alpha", BackendErrorKind::Timeout, "deadline exceeded");
        assert!(err.is_retryable());

        let err = Error::backend("alpha", BackendErrorKind::Authentication, "bad key");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_aggregate_error_display() {
        let err = Error::AllBackendsFailed {
            attempts: vec![
                AttemptFailure {
                    backend: "alpha".into(),
                    error: "timeout".into(),
                },
                AttemptFailure {
                    backend: "beta".into(),
                    error: "rate limited".into(),
                },
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("2 attempts"));
        assert!(rendered.contains("alpha: timeout"));
        assert!(rendered.contains("beta: rate limited"));
    }

    #[test]
    fn test_context_formatting() {
        let err = Error::validation_with_context(
            "prompt must not be empty",
            ErrorContext::new()
                .with_field_path("request.prompt")
                .with_source("request_validator"),
        );
        let rendered = err.to_string();
        assert!(rendered.contains("field: request.prompt"));
        assert!(rendered.contains("source: request_validator"));
    }
}
