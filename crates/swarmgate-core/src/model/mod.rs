//! Core torrent domain types shared between the session layer and its consumers.
//!
//! Every value here is owned and engine-neutral: nothing in this module refers to
//! native buffers, sentinels, or handle pointers.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a hex-encoded SHA-1 info-hash.
pub const INFO_HASH_V1_LEN: usize = 40;
/// Length of a hex-encoded SHA-256 info-hash (v2-only torrents).
pub const INFO_HASH_V2_LEN: usize = 64;

/// Hex-encoded identifier naming a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InfoHash(String);

/// Reasons an info-hash string was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InfoHashError {
    /// The string was neither 40 nor 64 characters long.
    #[error("info-hash has an invalid length")]
    InvalidLength {
        /// Observed length in bytes.
        len: usize,
    },
    /// The string contained a non-hexadecimal character.
    #[error("info-hash contains a non-hex character")]
    InvalidCharacter {
        /// Byte offset of the first offending character.
        position: usize,
    },
}

impl InfoHash {
    /// Parse and normalise a hex info-hash.
    ///
    /// # Errors
    ///
    /// Returns an error when the value is not 40 or 64 hexadecimal characters.
    pub fn parse(value: &str) -> Result<Self, InfoHashError> {
        let trimmed = value.trim();
        if trimmed.len() != INFO_HASH_V1_LEN && trimmed.len() != INFO_HASH_V2_LEN {
            return Err(InfoHashError::InvalidLength { len: trimmed.len() });
        }
        if let Some(position) = trimmed.bytes().position(|byte| !byte.is_ascii_hexdigit()) {
            return Err(InfoHashError::InvalidCharacter { position });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Borrow the lowercase hex representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form used in terminal output.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl Display for InfoHash {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl TryFrom<String> for InfoHash {
    type Error = InfoHashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InfoHash> for String {
    fn from(value: InfoHash) -> Self {
        value.0
    }
}

impl std::str::FromStr for InfoHash {
    type Err = InfoHashError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// Where a torrent comes from when it is added to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TorrentSource {
    /// A magnet URI resolved through the swarm.
    Magnet {
        /// Magnet URI as supplied by the caller.
        uri: String,
    },
    /// A `.torrent` metainfo file on disk.
    File {
        /// Path to the metainfo file.
        path: PathBuf,
    },
}

impl TorrentSource {
    /// Convenience constructor for magnet-based sources.
    #[must_use]
    pub fn magnet(uri: impl Into<String>) -> Self {
        Self::Magnet { uri: uri.into() }
    }

    /// Convenience constructor for file-based sources.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    /// Classify a command-line style argument: `magnet:` URIs are magnets,
    /// everything else is treated as a metainfo path.
    #[must_use]
    pub fn from_arg(value: &str) -> Self {
        if value.starts_with("magnet:") {
            Self::magnet(value)
        } else {
            Self::file(value)
        }
    }

    /// Short description for log fields.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Magnet { uri } => {
                let head: String = uri.chars().skip(7).take(40).collect();
                format!("magnet:{head}")
            }
            Self::File { path } => path.display().to_string(),
        }
    }
}

/// Coarse lifecycle state exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// State could not be determined (including torrents no longer in the session).
    #[default]
    Unknown,
    /// Verifying on-disk data or resume data.
    Checking,
    /// Fetching metadata or payload.
    Downloading,
    /// Complete and uploading to peers.
    Seeding,
}

impl TorrentState {
    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::Seeding => "seeding",
        }
    }
}

impl Display for TorrentState {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Optional inputs when adding a torrent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddTorrentOptions {
    /// Engine resume data captured by an earlier session.
    pub resume_data: Option<Vec<u8>>,
    /// Save path overriding the session default.
    pub save_path: Option<PathBuf>,
}

impl AddTorrentOptions {
    /// Options restoring a torrent from persisted resume data.
    #[must_use]
    pub fn with_resume(resume_data: Vec<u8>) -> Self {
        Self {
            resume_data: Some(resume_data),
            save_path: None,
        }
    }
}

/// Point-in-time snapshot of one torrent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentStatus {
    /// Torrent identifier.
    pub info_hash: InfoHash,
    /// Display name (empty until metadata names it).
    pub name: String,
    /// Completion fraction in `[0.0, 1.0]`.
    pub progress: f64,
    /// Current download rate in bytes per second.
    pub download_rate: i64,
    /// Current upload rate in bytes per second.
    pub upload_rate: i64,
    /// Cumulative payload bytes downloaded.
    pub total_downloaded: i64,
    /// Cumulative payload bytes uploaded.
    pub total_uploaded: i64,
    /// Connected peers.
    pub num_peers: u32,
    /// Connected seeds.
    pub num_seeds: u32,
    /// Coarse lifecycle state.
    pub state: TorrentState,
    /// Whether the info dictionary has been received.
    pub has_metadata: bool,
}

impl TorrentStatus {
    /// Zeroed snapshot reported when the engine no longer knows the torrent.
    #[must_use]
    pub const fn unknown(info_hash: InfoHash) -> Self {
        Self {
            info_hash,
            name: String::new(),
            progress: 0.0,
            download_rate: 0,
            upload_rate: 0,
            total_downloaded: 0,
            total_uploaded: 0,
            num_peers: 0,
            num_seeds: 0,
            state: TorrentState::Unknown,
            has_metadata: false,
        }
    }

    /// Progress rounded to a whole percentage.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent_complete(&self) -> u8 {
        (self.progress.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

/// Identifier and name pair used for cheap listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentOverview {
    /// Torrent identifier.
    pub info_hash: InfoHash,
    /// Display name, possibly empty.
    pub name: String,
}

/// One-shot engine notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// All wanted pieces are downloaded.
    TorrentFinished,
    /// The torrent hit a storage or engine error.
    TorrentError,
    /// Metadata arrived for a magnet-added torrent.
    MetadataReceived,
    /// A tracker announce failed.
    TrackerError,
}

impl AlertKind {
    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TorrentFinished => "torrent_finished",
            Self::TorrentError => "torrent_error",
            Self::MetadataReceived => "metadata_received",
            Self::TrackerError => "tracker_error",
        }
    }
}

impl Display for AlertKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Engine notification delivered through the alert stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// What happened.
    pub kind: AlertKind,
    /// Torrent the alert refers to.
    pub info_hash: InfoHash,
    /// Native error code, zero when not applicable.
    pub error_code: i32,
    /// Human-readable engine message.
    pub message: String,
}

/// Serialized engine state for one torrent, stored and restored verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeDataItem {
    /// Torrent the payload belongs to.
    pub info_hash: InfoHash,
    /// Opaque engine-versioned payload.
    pub payload: Vec<u8>,
}

/// Download priority of a single file (0 = skip, 1..=7 increasing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct FilePriority(u8);

impl FilePriority {
    /// Do not download the file.
    pub const SKIP: Self = Self(0);
    /// Lowest priority that still downloads.
    pub const LOW: Self = Self(1);
    /// Engine default.
    pub const DEFAULT: Self = Self(4);
    /// Highest priority.
    pub const TOP: Self = Self(7);

    /// Build a priority from its numeric level.
    #[must_use]
    pub const fn new(level: u8) -> Option<Self> {
        if level <= Self::TOP.0 {
            Some(Self(level))
        } else {
            None
        }
    }

    /// Numeric level.
    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }
}

impl Default for FilePriority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for FilePriority {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or("file priority must be between 0 and 7")
    }
}

impl From<FilePriority> for u8 {
    fn from(value: FilePriority) -> Self {
        value.0
    }
}

/// Static description of a file inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Index within the torrent's file list.
    pub index: u32,
    /// File size in bytes.
    pub size: u64,
    /// Byte offset of the file within the torrent payload.
    pub offset: u64,
    /// Path relative to the save directory.
    pub path: String,
    /// Current download priority.
    pub priority: FilePriority,
}

/// Optional throughput caps; `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum download rate in bytes per second.
    pub download_bps: Option<u64>,
    /// Maximum upload rate in bytes per second.
    pub upload_bps: Option<u64>,
}

impl RateLimit {
    /// Limits with both directions set explicitly.
    #[must_use]
    pub const fn new(download_bps: Option<u64>, upload_bps: Option<u64>) -> Self {
        Self {
            download_bps,
            upload_bps,
        }
    }

    /// No caps in either direction.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789ABCDEF0123456789abcdef01234567";

    #[test]
    fn info_hash_normalises_case_and_whitespace() {
        let parsed = InfoHash::parse(&format!("  {HASH}\n")).expect("valid hash");
        assert_eq!(parsed.as_str(), HASH.to_ascii_lowercase());
        assert_eq!(parsed.short(), "01234567");
    }

    #[test]
    fn info_hash_rejects_bad_input() {
        assert_eq!(
            InfoHash::parse("abc"),
            Err(InfoHashError::InvalidLength { len: 3 })
        );
        let bad = format!("{}z", &HASH[..39]);
        assert_eq!(
            InfoHash::parse(&bad),
            Err(InfoHashError::InvalidCharacter { position: 39 })
        );
        assert!(InfoHash::parse(&"a".repeat(INFO_HASH_V2_LEN)).is_ok());
    }

    #[test]
    fn info_hash_serde_validates() {
        let json = format!("\"{HASH}\"");
        let parsed: InfoHash = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.as_str(), HASH.to_ascii_lowercase());
        assert!(serde_json::from_str::<InfoHash>("\"nothex\"").is_err());
    }

    #[test]
    fn source_classification_follows_magnet_prefix() {
        assert!(matches!(
            TorrentSource::from_arg("magnet:?xt=urn:btih:abc"),
            TorrentSource::Magnet { .. }
        ));
        assert!(matches!(
            TorrentSource::from_arg("/tmp/ubuntu.torrent"),
            TorrentSource::File { .. }
        ));
    }

    #[test]
    fn unknown_status_is_zeroed() {
        let hash = InfoHash::parse(HASH).expect("valid hash");
        let status = TorrentStatus::unknown(hash.clone());
        assert_eq!(status.info_hash, hash);
        assert_eq!(status.state, TorrentState::Unknown);
        assert!(!status.has_metadata);
        assert_eq!(status.percent_complete(), 0);
    }

    #[test]
    fn file_priority_bounds() {
        assert_eq!(FilePriority::new(0), Some(FilePriority::SKIP));
        assert_eq!(FilePriority::new(7), Some(FilePriority::TOP));
        assert_eq!(FilePriority::new(8), None);
        assert_eq!(FilePriority::default().level(), 4);
        assert!(serde_json::from_str::<FilePriority>("9").is_err());
    }
}
