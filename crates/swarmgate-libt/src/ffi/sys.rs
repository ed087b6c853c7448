//! Raw declarations for the `sg_*` C API compiled from `engine.cpp`.

use std::ffi::c_char;
use std::marker::{PhantomData, PhantomPinned};

use super::records::{RawAlert, RawFileInfo, RawOverview, RawResumeData, RawTorrentStatus};

/// Opaque `sg_session`.
#[repr(C)]
pub(crate) struct SgSession {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// Opaque `sg_torrent`.
#[repr(C)]
pub(crate) struct SgTorrent {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// `sg_session_config`.
#[repr(C)]
pub(crate) struct RawSessionConfig {
    pub(crate) save_path: *const c_char,
    pub(crate) listen_port: i32,
    pub(crate) enable_dht: i32,
    pub(crate) enable_lsd: i32,
    pub(crate) enable_upnp: i32,
    pub(crate) enable_natpmp: i32,
    pub(crate) download_rate_limit: i32,
    pub(crate) upload_rate_limit: i32,
}

unsafe extern "C" {
    pub(crate) fn sg_session_new(config: *const RawSessionConfig) -> *mut SgSession;
    pub(crate) fn sg_session_free(session: *mut SgSession);

    pub(crate) fn sg_session_add_magnet(
        session: *mut SgSession,
        magnet_uri: *const c_char,
        save_path: *const c_char,
        resume_data: *const u8,
        resume_size: usize,
        out_torrent: *mut *mut SgTorrent,
    ) -> i32;
    pub(crate) fn sg_session_add_file(
        session: *mut SgSession,
        torrent_path: *const c_char,
        save_path: *const c_char,
        resume_data: *const u8,
        resume_size: usize,
        out_torrent: *mut *mut SgTorrent,
    ) -> i32;
    pub(crate) fn sg_session_remove_torrent(
        session: *mut SgSession,
        torrent: *const SgTorrent,
        delete_data: i32,
    ) -> i32;
    pub(crate) fn sg_session_find_torrent(
        session: *mut SgSession,
        info_hash_hex: *const c_char,
    ) -> *mut SgTorrent;
    pub(crate) fn sg_torrent_free(torrent: *mut SgTorrent);

    pub(crate) fn sg_torrent_info_hash(
        torrent: *const SgTorrent,
        out_hex: *mut c_char,
        capacity: usize,
    ) -> i32;
    pub(crate) fn sg_torrent_status(
        torrent: *const SgTorrent,
        out_status: *mut RawTorrentStatus,
    ) -> i32;
    pub(crate) fn sg_torrent_pause(torrent: *const SgTorrent) -> i32;
    pub(crate) fn sg_torrent_resume(torrent: *const SgTorrent) -> i32;
    pub(crate) fn sg_torrent_force_reannounce(torrent: *const SgTorrent) -> i32;
    pub(crate) fn sg_torrent_save_resume(torrent: *const SgTorrent) -> i32;
    pub(crate) fn sg_torrent_total_size(torrent: *const SgTorrent) -> i64;
    pub(crate) fn sg_torrent_file_count(torrent: *const SgTorrent) -> i32;
    pub(crate) fn sg_torrent_file_info(
        torrent: *const SgTorrent,
        index: i32,
        out_info: *mut RawFileInfo,
    ) -> i32;
    pub(crate) fn sg_torrent_set_file_priority(
        torrent: *const SgTorrent,
        index: i32,
        priority: i32,
    ) -> i32;
    pub(crate) fn sg_torrent_move_storage(torrent: *const SgTorrent, path: *const c_char) -> i32;
    pub(crate) fn sg_torrent_set_rate_limits(
        torrent: *const SgTorrent,
        download: i32,
        upload: i32,
    ) -> i32;

    pub(crate) fn sg_session_set_rate_limits(session: *mut SgSession, download: i32, upload: i32);
    pub(crate) fn sg_session_list_overview(
        session: *mut SgSession,
        out_items: *mut RawOverview,
        capacity: usize,
    ) -> usize;
    pub(crate) fn sg_session_post_torrent_updates(session: *mut SgSession);

    pub(crate) fn sg_session_poll_updates(
        session: *mut SgSession,
        timeout_ms: i32,
        out_statuses: *mut RawTorrentStatus,
        capacity: usize,
    ) -> usize;
    pub(crate) fn sg_session_poll_alerts(
        session: *mut SgSession,
        timeout_ms: i32,
        out_alerts: *mut RawAlert,
        capacity: usize,
    ) -> usize;
    pub(crate) fn sg_session_poll_resume(
        session: *mut SgSession,
        timeout_ms: i32,
        out_items: *mut RawResumeData,
        capacity: usize,
    ) -> usize;
    pub(crate) fn sg_free_resume_buffers(items: *mut RawResumeData, count: usize);
    pub(crate) fn sg_session_take_dropped(session: *mut SgSession) -> u64;
}
