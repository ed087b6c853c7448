//! Session configuration and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::model::RateLimit;

/// Default cadence of engine status posts, in milliseconds.
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 1_000;

/// Settings applied once when a session is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default directory for torrent payloads; the engine default when absent.
    pub save_path: Option<PathBuf>,
    /// Listen port, 0 lets the engine pick.
    pub listen_port: u16,
    /// Enable the DHT.
    pub enable_dht: bool,
    /// Enable local service discovery.
    pub enable_lsd: bool,
    /// Enable UPnP port mapping.
    pub enable_upnp: bool,
    /// Enable NAT-PMP port mapping.
    pub enable_natpmp: bool,
    /// Session-wide download cap in bytes per second.
    pub download_rate_limit: Option<u64>,
    /// Session-wide upload cap in bytes per second.
    pub upload_rate_limit: Option<u64>,
    /// Cadence of status and alert streams opened without an explicit
    /// interval, in milliseconds.
    pub status_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            save_path: None,
            listen_port: 0,
            enable_dht: true,
            enable_lsd: true,
            enable_upnp: true,
            enable_natpmp: true,
            download_rate_limit: None,
            upload_rate_limit: None,
            status_interval_ms: DEFAULT_STATUS_INTERVAL_MS,
        }
    }
}

impl SessionConfig {
    /// Start from defaults with the given save path.
    #[must_use]
    pub fn with_save_path(path: impl Into<PathBuf>) -> Self {
        Self {
            save_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// [`Self::status_interval_ms`] as a duration.
    #[must_use]
    pub const fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    /// Session-wide limits as the optional limit pair.
    #[must_use]
    pub const fn rate_limit(&self) -> RateLimit {
        RateLimit::new(self.download_rate_limit, self.upload_rate_limit)
    }

    /// Check the configuration before it reaches the engine.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero status interval, a zero rate limit, or a
    /// save path that exists but is not a directory.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.status_interval_ms == 0 {
            return Err(ConfigError::InvalidField {
                field: "status_interval_ms",
                reason: "must be greater than zero",
            });
        }
        if self.download_rate_limit == Some(0) {
            return Err(ConfigError::InvalidField {
                field: "download_rate_limit",
                reason: "must be greater than zero; omit for unlimited",
            });
        }
        if self.upload_rate_limit == Some(0) {
            return Err(ConfigError::InvalidField {
                field: "upload_rate_limit",
                reason: "must be greater than zero; omit for unlimited",
            });
        }
        if let Some(path) = self.save_path.as_deref() {
            ensure_directory_or_missing(path)?;
        }
        Ok(())
    }
}

fn ensure_directory_or_missing(path: &Path) -> ConfigResult<()> {
    if path.exists() && !path.is_dir() {
        return Err(ConfigError::NotADirectory {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_discovery_and_leave_limits_open() {
        let config = SessionConfig::default();
        assert!(config.enable_dht && config.enable_lsd);
        assert!(config.enable_upnp && config.enable_natpmp);
        assert_eq!(config.listen_port, 0);
        assert_eq!(config.rate_limit(), RateLimit::unlimited());
        assert_eq!(config.status_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_values() {
        let config = SessionConfig {
            status_interval_ms: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField {
                field: "status_interval_ms",
                ..
            })
        ));

        let config = SessionConfig {
            upload_rate_limit: Some(0),
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField {
                field: "upload_rate_limit",
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_file_as_save_path() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let config = SessionConfig::with_save_path(file.path());
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotADirectory {
                path: file.path().to_path_buf()
            })
        );
    }

    #[test]
    fn validate_accepts_missing_or_existing_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(SessionConfig::with_save_path(dir.path()).validate().is_ok());
        assert!(
            SessionConfig::with_save_path(dir.path().join("not-yet"))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"listen_port": 6881, "enable_upnp": false}"#)
                .expect("deserialize");
        assert_eq!(config.listen_port, 6881);
        assert!(!config.enable_upnp);
        assert!(config.enable_dht);
    }
}
