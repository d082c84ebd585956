//! Error types for storesync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors returned by a domain's remote source.
///
/// Remote calls report failure as a value; the coordinator turns it into an
/// [`crate::ErrorInfo`] and never propagates it as a panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network or transport failure.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// The server answered with a failure status.
    #[error("server error {status}: {message}")]
    Server {
        /// Status code reported by the server.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The call did not settle in time.
    #[error("remote call timed out")]
    Timeout,

    /// The server refused the operation (validation, stock, limits).
    #[error("rejected: {0}")]
    Rejected(String),

    /// No connection to the remote source.
    #[error("not connected to remote source")]
    NotConnected,
}

impl RemoteError {
    /// Creates a retryable network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a server error.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Returns the stable code recorded in [`crate::ErrorInfo::code`].
    pub fn code(&self) -> &'static str {
        match self {
            RemoteError::Network { .. } => "NETWORK_ERROR",
            RemoteError::Server { .. } => "SERVER_ERROR",
            RemoteError::Timeout => "TIMEOUT",
            RemoteError::Rejected(_) => "REJECTED",
            RemoteError::NotConnected => "NOT_CONNECTED",
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network { retryable, .. } => *retryable,
            RemoteError::Timeout => true,
            RemoteError::Server { status, .. } => *status >= 500,
            RemoteError::Rejected(_) | RemoteError::NotConnected => false,
        }
    }
}

/// Errors from wiring domains together.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A domain with this name is already registered.
    #[error("domain already registered: {0}")]
    DuplicateDomain(String),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] storesync_storage::StorageError),
}
