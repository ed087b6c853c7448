//! # Design
//!
//! - Marshalling failures stay crate-internal and convert into
//!   `SessionError::MalformedRecord` at the operation boundary.
//! - Keep error messages constant; store operational context in fields.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use swarmgate_core::{InfoHashError, SessionError};

/// A native record failed validation while being decoded.
#[derive(Debug)]
pub(crate) enum MarshalError {
    /// A fixed-capacity text field had no NUL terminator.
    Unterminated {
        /// Record field that overflowed its buffer.
        field: &'static str,
        /// Buffer capacity in bytes.
        capacity: usize,
    },
    /// The info-hash field did not hold a valid hex identifier.
    InvalidInfoHash {
        /// Underlying validation failure.
        source: InfoHashError,
    },
    /// A numeric field held a value outside its domain.
    OutOfRange {
        /// Record field with the bad value.
        field: &'static str,
        /// Value as reported by the engine.
        value: i64,
    },
}

impl Display for MarshalError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unterminated { field, capacity } => {
                let _ = (field, capacity);
                formatter.write_str("native text field is not NUL-terminated")
            }
            Self::InvalidInfoHash { .. } => formatter.write_str("native info-hash is invalid"),
            Self::OutOfRange { field, value } => {
                let _ = (field, value);
                formatter.write_str("native numeric field out of range")
            }
        }
    }
}

impl Error for MarshalError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidInfoHash { source } => Some(source),
            _ => None,
        }
    }
}

impl MarshalError {
    /// Wrap into the public error for `operation`.
    pub(crate) fn into_session_error(self, operation: &'static str) -> SessionError {
        SessionError::MalformedRecord {
            operation,
            source: Box::new(self),
        }
    }
}

/// Fast-resume store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing a store file failed.
    #[error("fastresume store IO failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// A metadata sidecar could not be encoded or decoded.
    #[error("fastresume store parse failure")]
    Parse {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::Error as _;
    use std::io;
    use swarmgate_core::InfoHash;

    fn json_error() -> serde_json::Error {
        match serde_json::from_str::<serde_json::Value>("invalid") {
            Ok(_) => serde_json::Error::custom("expected invalid json"),
            Err(err) => err,
        }
    }

    #[test]
    fn marshal_error_display_and_source() {
        let hash_error = match InfoHash::parse("xyz") {
            Ok(_) => InfoHashError::InvalidLength { len: 0 },
            Err(err) => err,
        };
        let cases = vec![
            (
                MarshalError::Unterminated {
                    field: "name",
                    capacity: 256,
                },
                "native text field is not NUL-terminated",
                false,
            ),
            (
                MarshalError::InvalidInfoHash { source: hash_error },
                "native info-hash is invalid",
                true,
            ),
            (
                MarshalError::OutOfRange {
                    field: "size",
                    value: -4,
                },
                "native numeric field out of range",
                false,
            ),
        ];

        for (err, message, has_source) in cases {
            assert_eq!(err.to_string(), message);
            assert_eq!(err.source().is_some(), has_source);
        }
    }

    #[test]
    fn marshal_error_converts_to_malformed_record() {
        let err = MarshalError::Unterminated {
            field: "info_hash",
            capacity: 65,
        }
        .into_session_error("poll_updates");
        match err {
            SessionError::MalformedRecord { operation, source } => {
                assert_eq!(operation, "poll_updates");
                assert_eq!(source.to_string(), "native text field is not NUL-terminated");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn store_error_display_and_source() {
        let cases = vec![
            StoreError::Io {
                operation: "write_fastresume",
                path: PathBuf::from("store"),
                source: io::Error::other("io"),
            },
            StoreError::Parse {
                operation: "load",
                path: PathBuf::from("store"),
                source: json_error(),
            },
        ];
        let messages = ["fastresume store IO failure", "fastresume store parse failure"];
        for (err, message) in cases.into_iter().zip(messages) {
            assert_eq!(err.to_string(), message);
            assert!(err.source().is_some());
        }
    }
}
