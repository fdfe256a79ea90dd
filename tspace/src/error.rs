//! Error types for tuple spaces

use thiserror::Error;

/// Boxed source error carried by [`SpaceError::Coordination`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level space error
///
/// Timeouts are not errors: a timed retrieval that finds nothing returns
/// `Ok(None)`, exactly like a probe that finds nothing.
#[derive(Debug, Error)]
pub enum SpaceError {
    /// Malformed caller input (bad directory string, unrepresentable deadline, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The space was closed before or while the operation ran
    #[error("Space '{0}' is closed")]
    Closed(String),

    /// Any engine-internal fault, surfaced uninterpreted
    #[error("Coordination error: {message}")]
    Coordination {
        /// What the engine was doing when it failed
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<BoxError>,
    },
}

impl SpaceError {
    /// Build an [`SpaceError::InvalidArgument`]
    pub fn invalid(message: impl Into<String>) -> Self {
        SpaceError::InvalidArgument(message.into())
    }

    /// Build a [`SpaceError::Coordination`] without an underlying cause
    pub fn coordination(message: impl Into<String>) -> Self {
        SpaceError::Coordination {
            message: message.into(),
            source: None,
        }
    }

    /// Build a [`SpaceError::Coordination`] wrapping `source`
    pub fn coordination_from(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        SpaceError::Coordination {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Check whether this error reports a closed space
    pub fn is_closed(&self) -> bool {
        matches!(self, SpaceError::Closed(_))
    }
}

impl From<std::io::Error> for SpaceError {
    fn from(err: std::io::Error) -> Self {
        SpaceError::coordination_from("storage I/O failed", err)
    }
}

impl From<serde_json::Error> for SpaceError {
    fn from(err: serde_json::Error) -> Self {
        SpaceError::coordination_from("snapshot encoding failed", err)
    }
}

/// Result type using SpaceError
pub type Result<T> = std::result::Result<T, SpaceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_io_errors_become_coordination() {
        let err: SpaceError = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert!(matches!(err, SpaceError::Coordination { .. }));
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Coordination error: storage I/O failed");
    }

    #[test]
    fn test_closed_display() {
        let err = SpaceError::Closed("orders".to_string());
        assert!(err.is_closed());
        assert_eq!(err.to_string(), "Space 'orders' is closed");
    }
}
