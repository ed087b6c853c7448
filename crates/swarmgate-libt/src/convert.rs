//! Translation between native engine records and owned domain values.
//!
//! Pure functions: nothing here calls the engine. Text buffers are read only up
//! to their fixed capacity and a missing NUL terminator is a [`MarshalError`].

use std::ffi::CStr;
use std::time::Duration;

use swarmgate_core::{
    Alert, AlertKind, FileInfo, FilePriority, InfoHash, ResumeDataItem, TorrentOverview,
    TorrentState, TorrentStatus,
};
use tracing::debug;

use crate::error::MarshalError;
use crate::ffi::{RawAlert, RawFileInfo, RawOverview, RawResumeData, RawTorrentStatus};

/// libtorrent `torrent_status::state_t` codes.
pub(crate) mod native_state {
    pub(crate) const CHECKING_FILES: i32 = 1;
    pub(crate) const DOWNLOADING_METADATA: i32 = 2;
    pub(crate) const DOWNLOADING: i32 = 3;
    pub(crate) const FINISHED: i32 = 4;
    pub(crate) const SEEDING: i32 = 5;
    pub(crate) const CHECKING_RESUME_DATA: i32 = 7;
}

/// `sg_alert_kind` codes.
pub(crate) mod native_alert {
    pub(crate) const TORRENT_FINISHED: i32 = 1;
    pub(crate) const TORRENT_ERROR: i32 = 2;
    pub(crate) const METADATA_RECEIVED: i32 = 3;
    pub(crate) const TRACKER_ERROR: i32 = 4;
}

/// Sentinel the engine reads as "no limit".
pub(crate) const UNLIMITED: i32 = -1;

pub(crate) fn decode_text(bytes: &[u8], field: &'static str) -> Result<String, MarshalError> {
    CStr::from_bytes_until_nul(bytes)
        .map(|text| text.to_string_lossy().into_owned())
        .map_err(|_| MarshalError::Unterminated {
            field,
            capacity: bytes.len(),
        })
}

pub(crate) fn decode_info_hash(bytes: &[u8]) -> Result<InfoHash, MarshalError> {
    let text = decode_text(bytes, "info_hash")?;
    InfoHash::parse(&text).map_err(|source| MarshalError::InvalidInfoHash { source })
}

/// Finished is folded into downloading; callers only see a coarse lifecycle.
#[must_use]
pub(crate) const fn map_state(code: i32) -> TorrentState {
    match code {
        native_state::CHECKING_FILES | native_state::CHECKING_RESUME_DATA => {
            TorrentState::Checking
        }
        native_state::DOWNLOADING_METADATA
        | native_state::DOWNLOADING
        | native_state::FINISHED => TorrentState::Downloading,
        native_state::SEEDING => TorrentState::Seeding,
        _ => TorrentState::Unknown,
    }
}

#[must_use]
pub(crate) const fn map_alert_kind(code: i32) -> Option<AlertKind> {
    match code {
        native_alert::TORRENT_FINISHED => Some(AlertKind::TorrentFinished),
        native_alert::TORRENT_ERROR => Some(AlertKind::TorrentError),
        native_alert::METADATA_RECEIVED => Some(AlertKind::MetadataReceived),
        native_alert::TRACKER_ERROR => Some(AlertKind::TrackerError),
        _ => None,
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

fn non_negative(count: i32) -> u32 {
    u32::try_from(count).unwrap_or(0)
}

pub(crate) fn status_from_raw(raw: &RawTorrentStatus) -> Result<TorrentStatus, MarshalError> {
    Ok(TorrentStatus {
        info_hash: decode_info_hash(&raw.info_hash)?,
        name: decode_text(&raw.name, "name")?,
        progress: clamp_progress(raw.progress),
        download_rate: raw.download_rate,
        upload_rate: raw.upload_rate,
        total_downloaded: raw.total_downloaded,
        total_uploaded: raw.total_uploaded,
        num_peers: non_negative(raw.num_peers),
        num_seeds: non_negative(raw.num_seeds),
        state: map_state(raw.state),
        has_metadata: raw.has_metadata != 0,
    })
}

/// Decode an alert; unknown kinds yield `Ok(None)`.
pub(crate) fn alert_from_raw(raw: &RawAlert) -> Result<Option<Alert>, MarshalError> {
    let Some(kind) = map_alert_kind(raw.kind) else {
        debug!(kind = raw.kind, "ignored unsupported native alert kind");
        return Ok(None);
    };
    Ok(Some(Alert {
        kind,
        info_hash: decode_info_hash(&raw.info_hash)?,
        error_code: raw.error_code,
        message: decode_text(&raw.message, "message")?,
    }))
}

pub(crate) fn overview_from_raw(raw: &RawOverview) -> Result<TorrentOverview, MarshalError> {
    Ok(TorrentOverview {
        info_hash: decode_info_hash(&raw.info_hash)?,
        name: decode_text(&raw.name, "name")?,
    })
}

pub(crate) fn file_from_raw(raw: &RawFileInfo) -> Result<FileInfo, MarshalError> {
    let out_of_range = |field, value: i64| MarshalError::OutOfRange { field, value };
    Ok(FileInfo {
        index: u32::try_from(raw.index).map_err(|_| out_of_range("index", raw.index.into()))?,
        size: u64::try_from(raw.size).map_err(|_| out_of_range("size", raw.size))?,
        offset: u64::try_from(raw.offset).map_err(|_| out_of_range("offset", raw.offset))?,
        path: decode_text(&raw.path, "path")?,
        priority: u8::try_from(raw.priority)
            .ok()
            .and_then(FilePriority::new)
            .ok_or_else(|| out_of_range("priority", raw.priority.into()))?,
    })
}

/// Copy a resume buffer into an owned item. The caller still owns `raw.data`
/// and must release it through the engine afterwards.
#[allow(unsafe_code)]
pub(crate) fn resume_from_raw(raw: &RawResumeData) -> Result<ResumeDataItem, MarshalError> {
    let info_hash = decode_info_hash(&raw.info_hash)?;
    let payload = if raw.data.is_null() || raw.size == 0 {
        Vec::new()
    } else {
        // SAFETY: the engine guarantees `data` points to `size` initialised
        // bytes that stay alive until `free_resume_buffers` is called, which
        // happens only after this copy completes.
        unsafe { std::slice::from_raw_parts(raw.data, raw.size) }.to_vec()
    };
    Ok(ResumeDataItem { info_hash, payload })
}

/// `None` becomes the engine's unlimited sentinel; large values saturate.
#[must_use]
pub(crate) fn native_rate_limit(limit: Option<u64>) -> i32 {
    limit.map_or(UNLIMITED, |value| i32::try_from(value).unwrap_or(i32::MAX))
}

#[must_use]
pub(crate) fn timeout_millis(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX)
}

#[must_use]
pub(crate) fn native_priority(priority: FilePriority) -> i32 {
    i32::from(priority.level())
}

#[cfg(test)]
pub(crate) fn fill_text<const N: usize>(value: &str) -> [u8; N] {
    let mut buffer = [0_u8; N];
    crate::ffi::records::write_text(&mut buffer, value);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::{HASH_CAPACITY, MESSAGE_CAPACITY, NAME_CAPACITY, PATH_CAPACITY};

    const HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn raw_status() -> RawTorrentStatus {
        RawTorrentStatus {
            progress: 0.5,
            download_rate: 2048,
            upload_rate: 512,
            total_downloaded: 10_000,
            total_uploaded: 4_000,
            num_peers: 7,
            num_seeds: 3,
            state: native_state::DOWNLOADING,
            has_metadata: 1,
            info_hash: fill_text::<HASH_CAPACITY>(HASH),
            name: fill_text::<NAME_CAPACITY>("debian.iso"),
        }
    }

    #[test]
    fn state_table_covers_every_code() {
        for code in i32::from(i8::MIN)..=i32::from(i8::MAX) {
            let expected = match code {
                1 | 7 => TorrentState::Checking,
                2..=4 => TorrentState::Downloading,
                5 => TorrentState::Seeding,
                _ => TorrentState::Unknown,
            };
            assert_eq!(map_state(code), expected, "code {code}");
        }
        assert_eq!(map_state(i32::MAX), TorrentState::Unknown);
        assert_eq!(map_state(i32::MIN), TorrentState::Unknown);
    }

    #[test]
    fn status_is_decoded_into_owned_values() {
        let status = status_from_raw(&raw_status()).expect("valid record");
        assert_eq!(status.info_hash.as_str(), HASH);
        assert_eq!(status.name, "debian.iso");
        assert_eq!(status.state, TorrentState::Downloading);
        assert_eq!((status.num_peers, status.num_seeds), (7, 3));
        assert!(status.has_metadata);
    }

    #[test]
    fn status_progress_and_counts_are_sanitised() {
        let mut raw = raw_status();
        raw.progress = f64::NAN;
        raw.num_peers = -3;
        assert!(status_from_raw(&raw).expect("valid").progress.abs() < f64::EPSILON);
        raw.progress = 1.7;
        let status = status_from_raw(&raw).expect("valid");
        assert!((status.progress - 1.0).abs() < f64::EPSILON);
        assert_eq!(status.num_peers, 0);
    }

    #[test]
    fn unterminated_name_is_malformed() {
        let mut raw = raw_status();
        raw.name = [b'x'; NAME_CAPACITY];
        assert!(matches!(
            status_from_raw(&raw),
            Err(MarshalError::Unterminated {
                field: "name",
                capacity: NAME_CAPACITY
            })
        ));
    }

    #[test]
    fn invalid_hash_is_malformed() {
        let mut raw = raw_status();
        raw.info_hash = fill_text::<HASH_CAPACITY>("not-a-hash");
        assert!(matches!(
            status_from_raw(&raw),
            Err(MarshalError::InvalidInfoHash { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut raw = raw_status();
        raw.name[..3].copy_from_slice(&[0xff, b'a', 0]);
        assert_eq!(status_from_raw(&raw).expect("valid").name, "\u{fffd}a");
    }

    #[test]
    fn alerts_map_known_kinds_and_skip_unknown() {
        let mut raw = RawAlert {
            kind: native_alert::TRACKER_ERROR,
            error_code: 104,
            info_hash: fill_text::<HASH_CAPACITY>(HASH),
            message: fill_text::<MESSAGE_CAPACITY>("connection reset"),
        };
        let alert = alert_from_raw(&raw).expect("valid").expect("known kind");
        assert_eq!(alert.kind, AlertKind::TrackerError);
        assert_eq!(alert.error_code, 104);
        assert_eq!(alert.message, "connection reset");

        raw.kind = 42;
        assert!(alert_from_raw(&raw).expect("valid").is_none());
    }

    #[test]
    fn file_info_rejects_out_of_range_values() {
        let mut raw = RawFileInfo {
            index: 1,
            size: 4096,
            offset: 1024,
            path: fill_text::<PATH_CAPACITY>("dir/file.bin"),
            priority: 4,
        };
        let file = file_from_raw(&raw).expect("valid");
        assert_eq!(file.path, "dir/file.bin");
        assert_eq!(file.priority, FilePriority::DEFAULT);

        raw.priority = 9;
        assert!(matches!(
            file_from_raw(&raw),
            Err(MarshalError::OutOfRange {
                field: "priority",
                value: 9
            })
        ));
        raw.priority = 0;
        raw.size = -1;
        assert!(matches!(
            file_from_raw(&raw),
            Err(MarshalError::OutOfRange { field: "size", .. })
        ));
    }

    #[test]
    fn resume_payload_is_copied() {
        let mut bytes = b"d4:infoe".to_vec();
        let raw = RawResumeData {
            info_hash: fill_text::<HASH_CAPACITY>(HASH),
            data: bytes.as_mut_ptr(),
            size: bytes.len(),
        };
        let item = resume_from_raw(&raw).expect("valid");
        assert_eq!(item.payload, bytes);

        let empty = RawResumeData {
            info_hash: fill_text::<HASH_CAPACITY>(HASH),
            ..RawResumeData::default()
        };
        assert!(resume_from_raw(&empty).expect("valid").payload.is_empty());
    }

    #[test]
    fn rate_limits_use_sentinel_only_at_the_boundary() {
        assert_eq!(native_rate_limit(None), UNLIMITED);
        assert_eq!(native_rate_limit(Some(1024)), 1024);
        assert_eq!(native_rate_limit(Some(u64::MAX)), i32::MAX);
    }

    #[test]
    fn timeouts_saturate() {
        assert_eq!(timeout_millis(Duration::from_millis(250)), 250);
        assert_eq!(timeout_millis(Duration::from_secs(u64::MAX)), i32::MAX);
    }
}
