//! Error types for the file server.

use thiserror::Error;

/// Errors raised by the serving lifecycle.
///
/// Every variant except the per-request file lookup failures in
/// [`crate::files`] is fatal: it propagates to `main` and the process
/// exits non-zero. There are no retries.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Invalid startup input: bad target path or unresolvable address.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// The listener could not be bound.
    #[error("Bind error: {message}")]
    Bind {
        /// Error message.
        message: String,
    },

    /// The accept loop failed after the listener was bound.
    #[error("Serve error: {message}")]
    Serve {
        /// Error message.
        message: String,
    },

    /// Graceful shutdown did not complete within its deadline.
    #[error("Shutdown error: {message}")]
    Shutdown {
        /// Error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP protocol error.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
}

impl ServeError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a bind error.
    pub fn bind(message: impl Into<String>) -> Self {
        Self::Bind {
            message: message.into(),
        }
    }

    /// Create a serve-loop error.
    pub fn serve(message: impl Into<String>) -> Self {
        Self::Serve {
            message: message.into(),
        }
    }

    /// Create a shutdown error.
    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::Shutdown {
            message: message.into(),
        }
    }

    /// Error category, used in log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Bind { .. } => "bind",
            Self::Serve { .. } => "serve",
            Self::Shutdown { .. } => "shutdown",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
        }
    }
}

/// Result type for server operations.
pub type ServeResult<T> = Result<T, ServeError>;
