//! Error taxonomy surfaced by the session layer.

use std::error::Error;
use std::path::PathBuf;

use thiserror::Error;

/// Failures returned by session and torrent operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session was closed or its engine handle is gone.
    #[error("torrent engine unavailable")]
    EngineUnavailable {
        /// Operation that observed the closed session.
        operation: &'static str,
    },
    /// The engine refused the operation; the native code is kept verbatim.
    #[error("engine rejected {operation} with code {code}")]
    Rejected {
        /// Operation identifier.
        operation: &'static str,
        /// Native engine status code.
        code: i32,
    },
    /// A native record failed bounds or termination validation.
    #[error("malformed engine record")]
    MalformedRecord {
        /// Operation that decoded the record.
        operation: &'static str,
        /// Underlying marshalling failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// An argument could not be passed to the engine.
    #[error("invalid input for {field}")]
    InvalidInput {
        /// Offending argument.
        field: &'static str,
        /// Why the argument was refused.
        reason: &'static str,
    },
    /// A file index exceeded the torrent's file count.
    #[error("file index out of range")]
    FileIndexOutOfRange {
        /// Requested index.
        index: u32,
        /// Number of files the engine reported.
        file_count: u32,
    },
    /// The engine could not be constructed.
    #[error("failed to construct torrent engine")]
    Construction {
        /// Short description of the failure.
        reason: &'static str,
    },
    /// The session configuration was invalid.
    #[error("invalid session configuration")]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Native engine code for rejections, if any.
    #[must_use]
    pub const fn engine_code(&self) -> Option<i32> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Convenience alias for session operation results.
pub type SessionResult<T> = Result<T, SessionError>;

/// Configuration validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field held a value outside its accepted range.
    #[error("invalid configuration field {field}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Why the value was refused.
        reason: &'static str,
    },
    /// The save path exists but is not a directory.
    #[error("save path is not a directory")]
    NotADirectory {
        /// Offending path.
        path: PathBuf,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_keeps_native_code() {
        let err = SessionError::Rejected {
            operation: "add_torrent",
            code: 3,
        };
        assert_eq!(err.engine_code(), Some(3));
        assert_eq!(err.to_string(), "engine rejected add_torrent with code 3");
    }

    #[test]
    fn config_errors_wrap_into_session_errors() {
        let err: SessionError = ConfigError::InvalidField {
            field: "status_interval_ms",
            reason: "must be greater than zero",
        }
        .into();
        assert!(matches!(err, SessionError::Config(_)));
        assert!(err.source().is_some());
        assert_eq!(err.engine_code(), None);
    }

    #[test]
    fn malformed_record_exposes_source() {
        let err = SessionError::MalformedRecord {
            operation: "poll_alerts",
            source: "missing terminator".into(),
        };
        assert_eq!(err.to_string(), "malformed engine record");
        assert_eq!(
            err.source().map(ToString::to_string).as_deref(),
            Some("missing terminator")
        );
    }
}
