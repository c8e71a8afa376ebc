//! Error model shared by every component of the client
//!
//! Every fallible operation returns an [`AppResult`]. Expected failure modes
//! (network trouble, non-2xx responses, cache misses, bad input) are values,
//! never panics.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type returned by every public operation
pub type AppResult<T> = Result<T, AppError>;

/// Message shown to end users for remote-side failures
pub const SERVICE_UNAVAILABLE: &str = "service unavailable, try again";

/// Closed set of failure categories
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Transport failure or timeout; retryable
    #[error("network error: {message}")]
    Network { message: String, code: Option<i32> },

    /// Remote service answered with a non-2xx status
    #[error("api error ({status_code}): {message}")]
    Api { message: String, status_code: u16 },

    /// Local cache miss or expiry
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Malformed caller input, keyed by field name
    #[error("validation failed: {}", FieldErrors(.field_errors))]
    Validation { field_errors: BTreeMap<String, String> },

    /// Unexpected internal fault
    #[error("unknown error: {message}")]
    Unknown {
        message: String,
        cause: Option<Arc<dyn StdError + Send + Sync>>,
    },
}

impl AppError {
    pub fn network(message: impl Into<String>) -> Self {
        AppError::Network {
            message: message.into(),
            code: None,
        }
    }

    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        AppError::Api {
            message: message.into(),
            status_code,
        }
    }

    /// The error returned while the circuit breaker refuses traffic
    pub fn service_unavailable() -> Self {
        Self::api(503, "service unavailable")
    }

    pub fn cache(message: impl Into<String>) -> Self {
        AppError::Cache {
            message: message.into(),
        }
    }

    /// Single-field validation failure
    pub fn invalid(field: impl Into<String>, problem: impl Into<String>) -> Self {
        let mut field_errors = BTreeMap::new();
        field_errors.insert(field.into(), problem.into());
        AppError::Validation { field_errors }
    }

    /// Wraps an underlying error as the diagnostic cause of an `Unknown`
    pub fn unknown_with_cause<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        AppError::Unknown {
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    /// HTTP status carried by an `Api` error
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AppError::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Whether a later attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network { .. } => true,
            AppError::Api { status_code, .. } => *status_code == 429 || *status_code >= 500,
            _ => false,
        }
    }

    pub fn is_cache_miss(&self) -> bool {
        matches!(self, AppError::Cache { .. })
    }

    /// Text suitable for an end user
    ///
    /// Remote-side failures collapse into one generic signal; local problems
    /// keep their detail.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Network { .. } | AppError::Api { .. } => SERVICE_UNAVAILABLE.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::cache(format!("storage I/O failed: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::cache(format!("corrupt cache metadata: {}", err))
    }
}

/// Display adapter for validation field maps
struct FieldErrors<'a>(&'a BTreeMap<String, String>);

impl fmt::Display for FieldErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, problem) in self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", field, problem)?;
            first = false;
        }
        Ok(())
    }
}
