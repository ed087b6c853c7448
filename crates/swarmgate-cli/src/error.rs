//! CLI error type distinguishing bad input from operational failures.

use std::fmt::{self, Display, Formatter};

use swarmgate_libt::SessionError;

#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Config(_) | SessionError::InvalidInput { .. } => {
                Self::Validation(format!("{:#}", anyhow::Error::new(err)))
            }
            other => Self::Failure(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmgate_libt::SessionConfig;

    #[test]
    fn exit_codes_split_validation_from_failure() {
        assert_eq!(CliError::validation("bad flag").exit_code(), 2);
        assert_eq!(CliError::failure(anyhow::anyhow!("boom")).exit_code(), 3);
    }

    #[test]
    fn rejections_keep_the_native_code() {
        let err = CliError::from(SessionError::Rejected {
            operation: "add_torrent",
            code: 2,
        });
        assert_eq!(err.exit_code(), 3);
        assert!(err.display_message().contains("code 2"));
    }

    #[test]
    fn config_errors_are_validation() {
        let config = SessionConfig {
            status_interval_ms: 0,
            ..SessionConfig::default()
        };
        let Err(source) = config.validate() else {
            panic!("zero interval must be rejected");
        };
        let err = CliError::from(SessionError::from(source));
        assert_eq!(err.exit_code(), 2);
    }
}
