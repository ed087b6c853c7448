//! Non-owning handle onto one torrent inside a session's engine.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use swarmgate_core::{
    FileInfo, FilePriority, InfoHash, RateLimit, SessionError, SessionResult, TorrentStatus,
};
use tracing::{debug, warn};

use crate::convert::{file_from_raw, native_priority, native_rate_limit, status_from_raw};
use crate::engine::Engine;
use crate::ffi::{RawFileInfo, RawTorrentStatus, status_code};
use crate::session::{EngineRef, command_outcome};
use crate::stream::{self, Subscription};

/// Reference to a torrent by info-hash. Cloning is cheap; the engine owns the
/// torrent, and every call re-validates that both still exist.
#[derive(Clone)]
pub struct TorrentHandle {
    info_hash: InfoHash,
    engine: EngineRef,
}

impl fmt::Debug for TorrentHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TorrentHandle")
            .field("info_hash", &self.info_hash)
            .finish_non_exhaustive()
    }
}

impl TorrentHandle {
    pub(crate) const fn new(info_hash: InfoHash, engine: EngineRef) -> Self {
        Self { info_hash, engine }
    }

    /// Identifier of the torrent.
    #[must_use]
    pub const fn info_hash(&self) -> &InfoHash {
        &self.info_hash
    }

    /// Whether the session is open and the engine still knows this torrent.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.engine
            .upgrade()
            .is_some_and(|cell| cell.engine().find_torrent(&self.info_hash))
    }

    fn fire(&self, operation: &'static str, command: impl FnOnce(&dyn Engine, &InfoHash) -> i32) {
        let Some(cell) = self.engine.upgrade() else {
            debug!(operation, info_hash = %self.info_hash, "session closed; command ignored");
            return;
        };
        let code = command(cell.engine(), &self.info_hash);
        if let Err(err) = command_outcome(operation, &self.info_hash, code) {
            warn!(operation, info_hash = %self.info_hash, error = %err, "engine refused command");
        }
    }

    /// Pause the torrent.
    pub fn pause(&self) {
        self.fire("pause", |engine, info_hash| engine.pause(info_hash));
    }

    /// Resume a paused torrent.
    pub fn resume(&self) {
        self.fire("resume", |engine, info_hash| engine.resume(info_hash));
    }

    /// Announce to all trackers now.
    pub fn force_reannounce(&self) {
        self.fire("force_reannounce", |engine, info_hash| {
            engine.force_reannounce(info_hash)
        });
    }

    /// Ask the engine to serialise resume data; collect it later with
    /// [`crate::Session::poll_resume_data`].
    pub fn save_resume_data(&self) {
        self.fire("save_resume_data", |engine, info_hash| {
            engine.save_resume_data(info_hash)
        });
    }

    /// Current snapshot. Never fails: a closed session, a removed torrent or
    /// an undecodable record all yield [`TorrentStatus::unknown`].
    #[must_use]
    pub fn status(&self) -> TorrentStatus {
        let Some(cell) = self.engine.upgrade() else {
            return TorrentStatus::unknown(self.info_hash.clone());
        };
        let mut raw = RawTorrentStatus::default();
        if cell.engine().torrent_status(&self.info_hash, &mut raw) != status_code::OK {
            return TorrentStatus::unknown(self.info_hash.clone());
        }
        status_from_raw(&raw).unwrap_or_else(|err| {
            warn!(info_hash = %self.info_hash, error = %err, "malformed status record");
            TorrentStatus::unknown(self.info_hash.clone())
        })
    }

    /// Files in the torrent; empty until metadata has been received.
    #[must_use]
    pub fn files(&self) -> Vec<FileInfo> {
        let Some(cell) = self.engine.upgrade() else {
            return Vec::new();
        };
        let engine = cell.engine();
        let count = engine.file_count(&self.info_hash).max(0);
        let mut files = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for index in 0..count {
            let mut raw = RawFileInfo::default();
            if engine.file_info(&self.info_hash, index, &mut raw) != status_code::OK {
                continue;
            }
            match file_from_raw(&raw) {
                Ok(file) => files.push(file),
                Err(err) => {
                    warn!(
                        info_hash = %self.info_hash,
                        index,
                        error = %err,
                        "skipping malformed file record"
                    );
                }
            }
        }
        files
    }

    /// Total payload size, `None` before metadata.
    #[must_use]
    pub fn total_size(&self) -> Option<u64> {
        let cell = self.engine.upgrade()?;
        u64::try_from(cell.engine().total_size(&self.info_hash)).ok()
    }

    /// Change the download priority of one file.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::FileIndexOutOfRange`] when `index` is not below
    /// the engine's current file count, [`SessionError::EngineUnavailable`]
    /// after the session closed, and [`SessionError::Rejected`] when the
    /// engine refuses the change.
    pub fn set_file_priority(&self, index: u32, priority: FilePriority) -> SessionResult<()> {
        const OPERATION: &str = "set_file_priority";
        let cell = self.engine.require(OPERATION)?;
        let engine = cell.engine();
        let file_count = engine.file_count(&self.info_hash);
        if file_count < 0 {
            return command_outcome(OPERATION, &self.info_hash, status_code::NOT_FOUND);
        }
        let file_count = u32::try_from(file_count).unwrap_or(0);
        let native_index = i32::try_from(index).ok().filter(|_| index < file_count);
        let Some(native_index) = native_index else {
            return Err(SessionError::FileIndexOutOfRange { index, file_count });
        };
        let code =
            engine.set_file_priority(&self.info_hash, native_index, native_priority(priority));
        command_outcome(OPERATION, &self.info_hash, code)
    }

    /// Apply per-torrent limits; `None` lifts a limit.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after the session closed and
    /// [`SessionError::Rejected`] when the engine refuses the change.
    pub fn set_rate_limits(&self, limits: RateLimit) -> SessionResult<()> {
        const OPERATION: &str = "set_torrent_rate_limits";
        let cell = self.engine.require(OPERATION)?;
        let code = cell.engine().set_torrent_rate_limits(
            &self.info_hash,
            native_rate_limit(limits.download_bps),
            native_rate_limit(limits.upload_bps),
        );
        command_outcome(OPERATION, &self.info_hash, code)
    }

    /// Move the torrent's storage to `path`. Completion is asynchronous.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after the session closed and
    /// [`SessionError::Rejected`] with the native code when the engine refuses.
    pub fn move_storage(&self, path: &Path) -> SessionResult<()> {
        const OPERATION: &str = "move_storage";
        let cell = self.engine.require(OPERATION)?;
        let code = cell.engine().move_storage(&self.info_hash, path);
        command_outcome(OPERATION, &self.info_hash, code)?;
        debug!(info_hash = %self.info_hash, path = %path.display(), "storage move requested");
        Ok(())
    }

    /// Snapshot of this torrent every `interval`, one value per tick. Ends
    /// when the session closes. Must be called within a Tokio runtime.
    #[must_use]
    pub fn status_stream(&self, interval: Duration) -> Subscription<TorrentStatus> {
        stream::spawn_torrent_status_stream(self.clone(), interval)
    }

    pub(crate) const fn engine_ref(&self) -> &EngineRef {
        &self.engine
    }
}
