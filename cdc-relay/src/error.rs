use std::error;
use std::fmt;

use cdc_relay_config::shared::ValidationError;

/// Convenient result type for relay operations using [`RelayError`] as the error type.
pub type RelayResult<T> = Result<T, RelayError>;

/// Main error type for relay operations.
///
/// A [`RelayError`] is either a single error with a kind, a static description and an optional
/// dynamic detail, or an aggregate of many errors.
#[derive(Debug, Clone)]
pub struct RelayError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<RelayError>),
}

/// Categories of errors that can occur while relaying a replication stream.
///
/// Only some kinds stop a run. Failed checkpoint writes and dropped events are reported
/// through logs and counters and never reach the caller as a [`RelayError`].
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Bootstrap Errors
    BootstrapTimeout,
    BootstrapFailed,

    // Stream Errors
    StreamOpenFailed,
    TransportFailure,
    DownstreamClosed,

    // Checkpoint Errors
    CheckpointLoadFailed,
    CheckpointWriteFailed,
    CheckpointPartitionCountMismatch,
    CheckpointWorkerPanic,

    // State Errors
    PartitionOutOfRange,
    InvalidState,

    // Configuration Errors
    ConfigError,

    // IO & Serialization Errors
    IoError,
    SerializationError,
    DeserializationError,

    Unknown,
}

impl RelayError {
    /// Creates a [`RelayError`] containing multiple aggregated errors.
    pub fn many(errors: Vec<RelayError>) -> RelayError {
        RelayError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }

    /// Returns `true` if the error stops a run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::CheckpointWriteFailed)
    }
}

impl PartialEq for RelayError {
    fn eq(&self, other: &RelayError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for RelayError {}

impl From<(ErrorKind, &'static str)> for RelayError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> RelayError {
        RelayError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for RelayError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> RelayError {
        RelayError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for RelayError
where
    E: Into<RelayError>,
{
    fn from(errors: Vec<E>) -> RelayError {
        RelayError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> RelayError {
        RelayError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Maps [`serde_json::Error`] to a serialization or deserialization kind based on its category.
impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> RelayError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        RelayError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

impl From<ValidationError> for RelayError {
    fn from(err: ValidationError) -> RelayError {
        RelayError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConfigError,
                "Invalid relay configuration",
                err.to_string(),
            ),
        }
    }
}

/// Converts a failed join of a background task, distinguishing panics from cancellations.
impl From<tokio::task::JoinError> for RelayError {
    fn from(err: tokio::task::JoinError) -> RelayError {
        let (kind, description) = if err.is_panic() {
            (ErrorKind::CheckpointWorkerPanic, "Checkpoint worker panicked")
        } else {
            (ErrorKind::InvalidState, "Checkpoint worker was cancelled")
        };

        RelayError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, relay_error};

    #[test]
    fn test_simple_error_creation() {
        let err = RelayError::from((ErrorKind::BootstrapFailed, "Seed nodes rejected"));
        assert_eq!(err.kind(), ErrorKind::BootstrapFailed);
        assert_eq!(err.detail(), None);
        assert_eq!(err.kinds(), vec![ErrorKind::BootstrapFailed]);
    }

    #[test]
    fn test_error_with_detail() {
        let err = RelayError::from((
            ErrorKind::StreamOpenFailed,
            "Stream open request failed",
            "partition 3 is not active".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::StreamOpenFailed);
        assert_eq!(err.detail(), Some("partition 3 is not active"));
    }

    #[test]
    fn test_multiple_errors() {
        let multi_err = RelayError::many(vec![
            RelayError::from((ErrorKind::TransportFailure, "Connection reset")),
            RelayError::from((
                ErrorKind::CheckpointWriteFailed,
                "Store unavailable",
                "disk full".to_string(),
            )),
        ]);

        assert_eq!(multi_err.kind(), ErrorKind::TransportFailure);
        assert_eq!(
            multi_err.kinds(),
            vec![ErrorKind::TransportFailure, ErrorKind::CheckpointWriteFailed]
        );
        assert_eq!(multi_err.detail(), Some("disk full"));
        assert!(format!("{multi_err}").contains("2 total"));
    }

    #[test]
    fn test_empty_multiple_errors() {
        let multi_err = RelayError::many(vec![]);
        assert_eq!(multi_err.kind(), ErrorKind::Unknown);
        assert_eq!(multi_err.kinds(), vec![]);
    }

    #[test]
    fn test_error_display_with_detail() {
        let err = relay_error!(
            ErrorKind::BootstrapTimeout,
            "Bootstrap timed out",
            "open bucket took longer than 2s"
        );
        let display_str = format!("{err}");
        assert!(display_str.contains("BootstrapTimeout"));
        assert!(display_str.contains("Bootstrap timed out"));
        assert!(display_str.contains("open bucket took longer than 2s"));
    }

    #[test]
    fn test_bail_macro() {
        fn out_of_range() -> RelayResult<()> {
            bail!(
                ErrorKind::PartitionOutOfRange,
                "Partition out of range",
                "partition 1024 of 1024"
            );
        }

        let err = out_of_range().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartitionOutOfRange);
        assert_eq!(err.detail(), Some("partition 1024 of 1024"));
    }

    #[test]
    fn test_only_checkpoint_write_failures_are_non_fatal() {
        let write = relay_error!(ErrorKind::CheckpointWriteFailed, "Store unavailable");
        let transport = relay_error!(ErrorKind::TransportFailure, "Connection reset");

        assert!(!write.is_fatal());
        assert!(transport.is_fatal());
    }

    #[test]
    fn test_json_error_classification() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err = RelayError::from(json_err);
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert!(err.detail().unwrap().contains("expected"));
    }

    #[test]
    fn test_validation_error_maps_to_config_error() {
        let err = RelayError::from(ValidationError::QueueCapacityZero);
        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert!(err.detail().unwrap().contains("queue_capacity"));
    }
}
