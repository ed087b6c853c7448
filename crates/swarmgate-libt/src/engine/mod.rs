#![allow(clippy::redundant_pub_crate)]

//! Seam between the session layer and the torrent engine.
//!
//! Methods mirror the `sg_*` C API one-to-one. Torrents are addressed by
//! info-hash; handle pointers never leave the native backend.

use std::path::Path;

use swarmgate_core::{InfoHash, SessionConfig, SessionResult, TorrentSource};

use crate::ffi::{
    HASH_CAPACITY, RawAlert, RawFileInfo, RawOverview, RawResumeData, RawTorrentStatus,
};

#[cfg(feature = "libtorrent")]
#[allow(unsafe_code)]
mod native;
#[cfg(any(test, not(feature = "libtorrent")))]
pub(crate) mod stub;

/// Blocking engine operations. Implementations must be internally synchronised.
pub(crate) trait Engine: Send + Sync {
    /// Add a torrent, writing its hex info-hash into `out_hash` on success.
    fn add_torrent(
        &self,
        source: &TorrentSource,
        save_path: Option<&Path>,
        resume: Option<&[u8]>,
        out_hash: &mut [u8; HASH_CAPACITY],
    ) -> i32;
    fn remove_torrent(&self, info_hash: &InfoHash, delete_data: bool) -> i32;
    fn find_torrent(&self, info_hash: &InfoHash) -> bool;

    fn torrent_status(&self, info_hash: &InfoHash, out: &mut RawTorrentStatus) -> i32;
    fn pause(&self, info_hash: &InfoHash) -> i32;
    fn resume(&self, info_hash: &InfoHash) -> i32;
    fn force_reannounce(&self, info_hash: &InfoHash) -> i32;
    fn save_resume_data(&self, info_hash: &InfoHash) -> i32;
    /// Total payload size, or -1 before metadata.
    fn total_size(&self, info_hash: &InfoHash) -> i64;
    /// File count, 0 before metadata, -1 when the torrent is unknown.
    fn file_count(&self, info_hash: &InfoHash) -> i32;
    fn file_info(&self, info_hash: &InfoHash, index: i32, out: &mut RawFileInfo) -> i32;
    fn set_file_priority(&self, info_hash: &InfoHash, index: i32, priority: i32) -> i32;
    fn move_storage(&self, info_hash: &InfoHash, path: &Path) -> i32;
    fn set_torrent_rate_limits(&self, info_hash: &InfoHash, download: i32, upload: i32) -> i32;

    fn set_rate_limits(&self, download: i32, upload: i32);
    fn list_overview(&self, out: &mut [RawOverview]) -> usize;
    /// Queue one status record per torrent, replacing any record for the
    /// same torrent that has not been polled yet.
    fn post_torrent_updates(&self);

    /// Wait up to `timeout_ms` for status records; returns how many were written.
    fn poll_updates(&self, timeout_ms: i32, out: &mut [RawTorrentStatus]) -> usize;
    /// Wait up to `timeout_ms` for alerts; returns how many were written.
    fn poll_alerts(&self, timeout_ms: i32, out: &mut [RawAlert]) -> usize;
    /// Wait up to `timeout_ms` for serialized resume data. Every returned
    /// buffer must be handed back through [`Engine::free_resume_buffers`].
    fn poll_resume(&self, timeout_ms: i32, out: &mut [RawResumeData]) -> usize;
    fn free_resume_buffers(&self, items: &mut [RawResumeData]);
    /// Alerts and resume records discarded because their queue was full,
    /// counted since the previous call.
    fn take_dropped_events(&self) -> u64;
}

/// Construct the engine selected at build time.
pub(crate) fn create_engine(config: &SessionConfig) -> SessionResult<Box<dyn Engine>> {
    #[cfg(feature = "libtorrent")]
    {
        native::NativeEngine::create(config).map(|engine| Box::new(engine) as Box<dyn Engine>)
    }

    #[cfg(not(feature = "libtorrent"))]
    {
        Ok(Box::new(stub::StubEngine::new(config)))
    }
}
