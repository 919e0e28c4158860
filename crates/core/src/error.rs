//! Error types for Cachet.

use thiserror::Error;

/// Result type alias for Cachet operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for cache, edit and operator failures.
///
/// Errors are `Clone` because a terminal stream fault is delivered to every
/// downstream subscriber of the faulted stream.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// A required argument was missing or invalid (key selector, predicate,
    /// page size). Raised before any mutation takes place.
    #[error("Invalid argument: {message}")]
    Argument { message: String },
    /// The requested operation cannot be carried out in the current state,
    /// e.g. an explicit update of a key that does not exist.
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },
    /// A predicate, comparer or selector failed, or an upstream stream
    /// faulted. Terminal for the affected stream.
    #[error("Upstream fault: {message}")]
    UpstreamFault { message: String },
}

impl Error {
    /// Creates an argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        Error::Argument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an upstream fault.
    pub fn upstream_fault(message: impl Into<String>) -> Self {
        Error::UpstreamFault {
            message: message.into(),
        }
    }

    /// Returns true if this error terminates a stream.
    #[inline]
    pub fn is_upstream_fault(&self) -> bool {
        matches!(self, Error::UpstreamFault { .. })
    }
}
