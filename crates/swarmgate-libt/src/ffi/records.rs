//! `#[repr(C)]` mirrors of the records declared in `swarmgate/engine.h`.
//!
//! Text fields are fixed-capacity byte buffers that the engine NUL-terminates.
//! Nothing here interprets them; decoding lives in `convert`.

use std::ptr;

/// Capacity of a hex info-hash buffer (64 hex characters plus NUL).
pub(crate) const HASH_CAPACITY: usize = 65;
/// Capacity of a torrent name buffer.
pub(crate) const NAME_CAPACITY: usize = 256;
/// Capacity of an alert message buffer.
pub(crate) const MESSAGE_CAPACITY: usize = 256;
/// Capacity of a file path buffer.
pub(crate) const PATH_CAPACITY: usize = 512;

/// Native status codes (`sg_status_code`).
pub(crate) mod status_code {
    pub(crate) const OK: i32 = 0;
    pub(crate) const GENERIC: i32 = 1;
    pub(crate) const INVALID_ARG: i32 = 2;
    pub(crate) const NOT_FOUND: i32 = 3;
}

/// `sg_torrent_status`.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RawTorrentStatus {
    pub(crate) progress: f64,
    pub(crate) download_rate: i64,
    pub(crate) upload_rate: i64,
    pub(crate) total_downloaded: i64,
    pub(crate) total_uploaded: i64,
    pub(crate) num_peers: i32,
    pub(crate) num_seeds: i32,
    pub(crate) state: i32,
    pub(crate) has_metadata: i32,
    pub(crate) info_hash: [u8; HASH_CAPACITY],
    pub(crate) name: [u8; NAME_CAPACITY],
}

impl Default for RawTorrentStatus {
    fn default() -> Self {
        Self {
            progress: 0.0,
            download_rate: 0,
            upload_rate: 0,
            total_downloaded: 0,
            total_uploaded: 0,
            num_peers: 0,
            num_seeds: 0,
            state: 0,
            has_metadata: 0,
            info_hash: [0; HASH_CAPACITY],
            name: [0; NAME_CAPACITY],
        }
    }
}

/// `sg_alert`.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RawAlert {
    pub(crate) kind: i32,
    pub(crate) error_code: i32,
    pub(crate) info_hash: [u8; HASH_CAPACITY],
    pub(crate) message: [u8; MESSAGE_CAPACITY],
}

impl Default for RawAlert {
    fn default() -> Self {
        Self {
            kind: 0,
            error_code: 0,
            info_hash: [0; HASH_CAPACITY],
            message: [0; MESSAGE_CAPACITY],
        }
    }
}

/// `sg_resume_data`. The engine owns `data` until `sg_free_resume_buffers`.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RawResumeData {
    pub(crate) info_hash: [u8; HASH_CAPACITY],
    pub(crate) data: *mut u8,
    pub(crate) size: usize,
}

impl Default for RawResumeData {
    fn default() -> Self {
        Self {
            info_hash: [0; HASH_CAPACITY],
            data: ptr::null_mut(),
            size: 0,
        }
    }
}

// SAFETY: the record only carries the buffer pointer between the engine and
// the single poll call that owns the batch; the pointee is never aliased.
unsafe impl Send for RawResumeData {}

/// `sg_torrent_overview`.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RawOverview {
    pub(crate) info_hash: [u8; HASH_CAPACITY],
    pub(crate) name: [u8; NAME_CAPACITY],
}

impl Default for RawOverview {
    fn default() -> Self {
        Self {
            info_hash: [0; HASH_CAPACITY],
            name: [0; NAME_CAPACITY],
        }
    }
}

/// `sg_file_info`.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RawFileInfo {
    pub(crate) index: i32,
    pub(crate) size: i64,
    pub(crate) offset: i64,
    pub(crate) path: [u8; PATH_CAPACITY],
    pub(crate) priority: i32,
}

impl Default for RawFileInfo {
    fn default() -> Self {
        Self {
            index: 0,
            size: 0,
            offset: 0,
            path: [0; PATH_CAPACITY],
            priority: 0,
        }
    }
}

/// Copy `value` into a fixed buffer, truncating and NUL-terminating.
#[cfg(any(test, not(feature = "libtorrent")))]
pub(crate) fn write_text<const N: usize>(buffer: &mut [u8; N], value: &str) {
    let len = value.len().min(N.saturating_sub(1));
    buffer[..len].copy_from_slice(&value.as_bytes()[..len]);
    buffer[len..].fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn record_layout_matches_header() {
        assert_eq!(mem::size_of::<RawTorrentStatus>(), 384);
        assert_eq!(mem::size_of::<RawAlert>(), 332);
        assert_eq!(mem::size_of::<RawResumeData>(), 88);
        assert_eq!(mem::size_of::<RawOverview>(), 321);
        assert_eq!(mem::size_of::<RawFileInfo>(), 544);
    }

    #[test]
    fn write_text_truncates_and_terminates() {
        let mut buffer = [0xff_u8; 4];
        write_text(&mut buffer, "abcdef");
        assert_eq!(&buffer, b"abc\0");
        write_text(&mut buffer, "z");
        assert_eq!(&buffer, b"z\0\0\0");
    }
}
