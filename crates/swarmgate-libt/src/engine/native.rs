//! Engine backed by the libtorrent C shim.

use std::collections::HashMap;
use std::ffi::{CString, c_char};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::{PoisonError, RwLock};

use swarmgate_core::{InfoHash, SessionConfig, SessionError, SessionResult, TorrentSource};
use tracing::{debug, info};

use super::Engine;
use crate::convert::{decode_info_hash, native_rate_limit};
use crate::ffi::sys::{self, RawSessionConfig, SgSession, SgTorrent};
use crate::ffi::{
    HASH_CAPACITY, RawAlert, RawFileInfo, RawOverview, RawResumeData, RawTorrentStatus,
    status_code,
};

pub(super) struct NativeEngine {
    session: NonNull<SgSession>,
    torrents: RwLock<HashMap<InfoHash, NonNull<SgTorrent>>>,
}

// SAFETY: libtorrent's session and torrent handles are internally synchronised
// and the shim guards its own queues with a mutex. Torrent wrappers are only
// freed under the registry write lock, so no reader holds a dangling pointer.
unsafe impl Send for NativeEngine {}
// SAFETY: see the `Send` impl above.
unsafe impl Sync for NativeEngine {}

fn path_to_cstring(path: &Path) -> Option<CString> {
    path.to_str().and_then(|text| CString::new(text).ok())
}

fn optional_ptr(value: Option<&CString>) -> *const c_char {
    value.map_or(ptr::null(), |text| text.as_ptr())
}

impl NativeEngine {
    pub(super) fn create(config: &SessionConfig) -> SessionResult<Self> {
        let save_path = match config.save_path.as_deref() {
            Some(path) => Some(path_to_cstring(path).ok_or(SessionError::InvalidInput {
                field: "save_path",
                reason: "path must be UTF-8 without NUL bytes",
            })?),
            None => None,
        };
        let raw = RawSessionConfig {
            save_path: optional_ptr(save_path.as_ref()),
            listen_port: i32::from(config.listen_port),
            enable_dht: i32::from(config.enable_dht),
            enable_lsd: i32::from(config.enable_lsd),
            enable_upnp: i32::from(config.enable_upnp),
            enable_natpmp: i32::from(config.enable_natpmp),
            download_rate_limit: native_rate_limit(config.download_rate_limit),
            upload_rate_limit: native_rate_limit(config.upload_rate_limit),
        };
        // SAFETY: `raw` and the string it points to outlive the call; the shim
        // copies everything it keeps.
        let session = unsafe { sys::sg_session_new(&raw) };
        let session = NonNull::new(session).ok_or(SessionError::Construction {
            reason: "libtorrent session could not be created",
        })?;
        info!(listen_port = config.listen_port, "native libtorrent session created");
        Ok(Self {
            session,
            torrents: RwLock::new(HashMap::new()),
        })
    }

    fn with_torrent(
        &self,
        info_hash: &InfoHash,
        call: impl FnOnce(*const SgTorrent) -> i32,
    ) -> i32 {
        let torrents = self.torrents.read().unwrap_or_else(PoisonError::into_inner);
        torrents
            .get(info_hash)
            .map_or(status_code::NOT_FOUND, |torrent| call(torrent.as_ptr()))
    }

    /// Record a freshly returned wrapper; duplicates are released immediately.
    fn register(&self, info_hash: InfoHash, torrent: NonNull<SgTorrent>) {
        let mut torrents = self.torrents.write().unwrap_or_else(PoisonError::into_inner);
        if torrents.contains_key(&info_hash) {
            // SAFETY: `torrent` came from the shim and is not stored anywhere.
            unsafe { sys::sg_torrent_free(torrent.as_ptr()) };
        } else {
            torrents.insert(info_hash, torrent);
        }
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        let torrents = self.torrents.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, torrent) in torrents.drain() {
            // SAFETY: each wrapper is owned by the registry and freed once here.
            unsafe { sys::sg_torrent_free(torrent.as_ptr()) };
        }
        // SAFETY: the session pointer is valid until this call and never used after.
        unsafe { sys::sg_session_free(self.session.as_ptr()) };
        info!("native libtorrent session freed");
    }
}

impl Engine for NativeEngine {
    fn add_torrent(
        &self,
        source: &TorrentSource,
        save_path: Option<&Path>,
        resume: Option<&[u8]>,
        out_hash: &mut [u8; HASH_CAPACITY],
    ) -> i32 {
        let save_path = match save_path.map(path_to_cstring) {
            Some(None) => return status_code::INVALID_ARG,
            Some(Some(path)) => Some(path),
            None => None,
        };
        let (resume_ptr, resume_len) =
            resume.map_or((ptr::null(), 0), |bytes| (bytes.as_ptr(), bytes.len()));
        let mut out: *mut SgTorrent = ptr::null_mut();
        let code = match source {
            TorrentSource::Magnet { uri } => {
                let Ok(uri) = CString::new(uri.as_str()) else {
                    return status_code::INVALID_ARG;
                };
                // SAFETY: every pointer is valid for the duration of the call and
                // `out` is a writable slot for the returned wrapper.
                unsafe {
                    sys::sg_session_add_magnet(
                        self.session.as_ptr(),
                        uri.as_ptr(),
                        optional_ptr(save_path.as_ref()),
                        resume_ptr,
                        resume_len,
                        &mut out,
                    )
                }
            }
            TorrentSource::File { path } => {
                let Some(path) = path_to_cstring(path) else {
                    return status_code::INVALID_ARG;
                };
                // SAFETY: as above.
                unsafe {
                    sys::sg_session_add_file(
                        self.session.as_ptr(),
                        path.as_ptr(),
                        optional_ptr(save_path.as_ref()),
                        resume_ptr,
                        resume_len,
                        &mut out,
                    )
                }
            }
        };
        if code != status_code::OK {
            return code;
        }
        let Some(torrent) = NonNull::new(out) else {
            return status_code::GENERIC;
        };
        // SAFETY: `torrent` is a live wrapper and `out_hash` holds HASH_CAPACITY bytes.
        let code = unsafe {
            sys::sg_torrent_info_hash(torrent.as_ptr(), out_hash.as_mut_ptr().cast(), HASH_CAPACITY)
        };
        match (code, decode_info_hash(out_hash)) {
            (status_code::OK, Ok(info_hash)) => {
                self.register(info_hash, torrent);
                status_code::OK
            }
            _ => {
                // SAFETY: the wrapper was never registered.
                unsafe { sys::sg_torrent_free(torrent.as_ptr()) };
                status_code::GENERIC
            }
        }
    }

    fn remove_torrent(&self, info_hash: &InfoHash, delete_data: bool) -> i32 {
        let mut torrents = self.torrents.write().unwrap_or_else(PoisonError::into_inner);
        let Some(torrent) = torrents.remove(info_hash) else {
            return status_code::NOT_FOUND;
        };
        // SAFETY: the wrapper is live until freed below, and the write lock
        // keeps every other caller away from it.
        unsafe {
            let code = sys::sg_session_remove_torrent(
                self.session.as_ptr(),
                torrent.as_ptr(),
                i32::from(delete_data),
            );
            sys::sg_torrent_free(torrent.as_ptr());
            code
        }
    }

    fn find_torrent(&self, info_hash: &InfoHash) -> bool {
        if self
            .torrents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(info_hash)
        {
            return true;
        }
        let Ok(hex) = CString::new(info_hash.as_str()) else {
            return false;
        };
        // SAFETY: `hex` is a valid C string for the duration of the call.
        let found = unsafe { sys::sg_session_find_torrent(self.session.as_ptr(), hex.as_ptr()) };
        match NonNull::new(found) {
            Some(torrent) => {
                debug!(info_hash = %info_hash, "registered torrent found in engine");
                self.register(info_hash.clone(), torrent);
                true
            }
            None => false,
        }
    }

    fn torrent_status(&self, info_hash: &InfoHash, out: &mut RawTorrentStatus) -> i32 {
        // SAFETY: the registry read lock keeps the wrapper alive; `out` is writable.
        self.with_torrent(info_hash, |torrent| unsafe { sys::sg_torrent_status(torrent, out) })
    }

    fn pause(&self, info_hash: &InfoHash) -> i32 {
        // SAFETY: the registry read lock keeps the wrapper alive.
        self.with_torrent(info_hash, |torrent| unsafe { sys::sg_torrent_pause(torrent) })
    }

    fn resume(&self, info_hash: &InfoHash) -> i32 {
        // SAFETY: the registry read lock keeps the wrapper alive.
        self.with_torrent(info_hash, |torrent| unsafe { sys::sg_torrent_resume(torrent) })
    }

    fn force_reannounce(&self, info_hash: &InfoHash) -> i32 {
        // SAFETY: the registry read lock keeps the wrapper alive.
        self.with_torrent(info_hash, |torrent| unsafe {
            sys::sg_torrent_force_reannounce(torrent)
        })
    }

    fn save_resume_data(&self, info_hash: &InfoHash) -> i32 {
        // SAFETY: the registry read lock keeps the wrapper alive.
        self.with_torrent(info_hash, |torrent| unsafe { sys::sg_torrent_save_resume(torrent) })
    }

    fn total_size(&self, info_hash: &InfoHash) -> i64 {
        let torrents = self.torrents.read().unwrap_or_else(PoisonError::into_inner);
        torrents.get(info_hash).map_or(-1, |torrent| {
            // SAFETY: the registry read lock keeps the wrapper alive.
            unsafe { sys::sg_torrent_total_size(torrent.as_ptr()) }
        })
    }

    fn file_count(&self, info_hash: &InfoHash) -> i32 {
        let torrents = self.torrents.read().unwrap_or_else(PoisonError::into_inner);
        torrents.get(info_hash).map_or(-1, |torrent| {
            // SAFETY: the registry read lock keeps the wrapper alive.
            unsafe { sys::sg_torrent_file_count(torrent.as_ptr()) }
        })
    }

    fn file_info(&self, info_hash: &InfoHash, index: i32, out: &mut RawFileInfo) -> i32 {
        // SAFETY: the registry read lock keeps the wrapper alive; `out` is writable.
        self.with_torrent(info_hash, |torrent| unsafe {
            sys::sg_torrent_file_info(torrent, index, out)
        })
    }

    fn set_file_priority(&self, info_hash: &InfoHash, index: i32, priority: i32) -> i32 {
        // SAFETY: the registry read lock keeps the wrapper alive.
        self.with_torrent(info_hash, |torrent| unsafe {
            sys::sg_torrent_set_file_priority(torrent, index, priority)
        })
    }

    fn move_storage(&self, info_hash: &InfoHash, path: &Path) -> i32 {
        let Some(path) = path_to_cstring(path) else {
            return status_code::INVALID_ARG;
        };
        // SAFETY: the registry read lock keeps the wrapper alive; `path` outlives the call.
        self.with_torrent(info_hash, |torrent| unsafe {
            sys::sg_torrent_move_storage(torrent, path.as_ptr())
        })
    }

    fn set_torrent_rate_limits(&self, info_hash: &InfoHash, download: i32, upload: i32) -> i32 {
        // SAFETY: the registry read lock keeps the wrapper alive.
        self.with_torrent(info_hash, |torrent| unsafe {
            sys::sg_torrent_set_rate_limits(torrent, download, upload)
        })
    }

    fn set_rate_limits(&self, download: i32, upload: i32) {
        // SAFETY: the session pointer is valid for the engine's lifetime.
        unsafe { sys::sg_session_set_rate_limits(self.session.as_ptr(), download, upload) };
    }

    fn list_overview(&self, out: &mut [RawOverview]) -> usize {
        // SAFETY: `out` provides `out.len()` writable records.
        let written = unsafe {
            sys::sg_session_list_overview(self.session.as_ptr(), out.as_mut_ptr(), out.len())
        };
        written.min(out.len())
    }

    fn post_torrent_updates(&self) {
        // SAFETY: the session pointer is valid for the engine's lifetime.
        unsafe { sys::sg_session_post_torrent_updates(self.session.as_ptr()) };
    }

    fn poll_updates(&self, timeout_ms: i32, out: &mut [RawTorrentStatus]) -> usize {
        // SAFETY: `out` provides `out.len()` writable records.
        let written = unsafe {
            sys::sg_session_poll_updates(
                self.session.as_ptr(),
                timeout_ms,
                out.as_mut_ptr(),
                out.len(),
            )
        };
        written.min(out.len())
    }

    fn poll_alerts(&self, timeout_ms: i32, out: &mut [RawAlert]) -> usize {
        // SAFETY: `out` provides `out.len()` writable records.
        let written = unsafe {
            sys::sg_session_poll_alerts(
                self.session.as_ptr(),
                timeout_ms,
                out.as_mut_ptr(),
                out.len(),
            )
        };
        written.min(out.len())
    }

    fn poll_resume(&self, timeout_ms: i32, out: &mut [RawResumeData]) -> usize {
        // SAFETY: `out` provides `out.len()` writable records.
        let written = unsafe {
            sys::sg_session_poll_resume(
                self.session.as_ptr(),
                timeout_ms,
                out.as_mut_ptr(),
                out.len(),
            )
        };
        written.min(out.len())
    }

    fn free_resume_buffers(&self, items: &mut [RawResumeData]) {
        // SAFETY: every item was filled by `sg_session_poll_resume` and is
        // released exactly once; the shim nulls the pointers it frees.
        unsafe { sys::sg_free_resume_buffers(items.as_mut_ptr(), items.len()) };
    }

    fn take_dropped_events(&self) -> u64 {
        // SAFETY: the session pointer is valid for the engine's lifetime.
        unsafe { sys::sg_session_take_dropped(self.session.as_ptr()) }
    }
}
