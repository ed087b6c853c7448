//! In-memory engine used by tests and by builds without libtorrent.
//!
//! Fills the same fixed-size records as the native shim, hands out resume
//! buffers that must come back through `free_resume_buffers`, and honours
//! bounded waits with a condition variable.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swarmgate_core::{InfoHash, SessionConfig, TorrentSource};

use super::Engine;
use crate::convert::{native_alert, native_rate_limit, native_state};
use crate::ffi::records::write_text;
use crate::ffi::{
    HASH_CAPACITY, RawAlert, RawFileInfo, RawOverview, RawResumeData, RawTorrentStatus,
    status_code,
};

const DEFAULT_PRIORITY: i32 = 4;

/// Records held per alert or resume queue before the oldest is discarded.
pub(crate) const QUEUE_CAPACITY: usize = 1024;

/// Test handle onto a stub engine: inspects what the session sent it and
/// injects engine-side events.
#[derive(Clone)]
pub struct StubControl {
    shared: Arc<StubShared>,
}

pub(crate) struct StubEngine {
    shared: Arc<StubShared>,
}

struct StubShared {
    state: Mutex<StubState>,
    ready: Condvar,
    frees: AtomicUsize,
}

impl StubShared {
    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct StubState {
    torrents: Vec<StubTorrent>,
    updates: VecDeque<RawTorrentStatus>,
    alerts: VecDeque<RawAlert>,
    resumes: VecDeque<RawResumeData>,
    buffers: HashMap<usize, Vec<u8>>,
    dropped: u64,
    session_limits: (i32, i32),
    default_save_path: Option<PathBuf>,
    reject_next_add: Option<i32>,
}

impl StubState {
    fn torrent(&self, info_hash: &InfoHash) -> Option<&StubTorrent> {
        self.torrents.iter().find(|torrent| &torrent.info_hash == info_hash)
    }

    fn torrent_mut(&mut self, info_hash: &InfoHash) -> Option<&mut StubTorrent> {
        self.torrents
            .iter_mut()
            .find(|torrent| &torrent.info_hash == info_hash)
    }

    fn updates_queue(&mut self) -> &mut VecDeque<RawTorrentStatus> {
        &mut self.updates
    }

    fn alerts_queue(&mut self) -> &mut VecDeque<RawAlert> {
        &mut self.alerts
    }

    fn resumes_queue(&mut self) -> &mut VecDeque<RawResumeData> {
        &mut self.resumes
    }

    fn push_alert(&mut self, kind: i32, info_hash: &str, error_code: i32, message: &str) {
        let mut alert = RawAlert {
            kind,
            error_code,
            ..RawAlert::default()
        };
        write_text(&mut alert.info_hash, info_hash);
        write_text(&mut alert.message, message);
        if self.alerts.len() >= QUEUE_CAPACITY {
            self.alerts.pop_front();
            self.dropped += 1;
        }
        self.alerts.push_back(alert);
    }

    fn push_resume(&mut self, raw: RawResumeData, payload: Vec<u8>) {
        if self.resumes.len() >= QUEUE_CAPACITY {
            if let Some(oldest) = self.resumes.pop_front() {
                self.buffers.remove(&oldest.data.addr());
            }
            self.dropped += 1;
        }
        self.buffers.insert(raw.data.addr(), payload);
        self.resumes.push_back(raw);
    }

    fn push_update(&mut self, record: RawTorrentStatus) {
        let pending = self
            .updates
            .iter_mut()
            .find(|queued| queued.info_hash == record.info_hash);
        match pending {
            Some(queued) => *queued = record,
            None => self.updates.push_back(record),
        }
    }
}

struct StubFile {
    path: String,
    size: u64,
    priority: i32,
}

struct StubTorrent {
    info_hash: InfoHash,
    name: String,
    save_path: Option<PathBuf>,
    state: i32,
    progress: f64,
    has_metadata: bool,
    paused: bool,
    announces: u32,
    files: Vec<StubFile>,
    limits: (i32, i32),
}

/// Payload written by `save_resume_data` and understood on re-add.
#[derive(Serialize, Deserialize)]
struct StubResume {
    info_hash: String,
    name: String,
    progress: f64,
    paused: bool,
}

impl StubTorrent {
    fn from_source(source: &TorrentSource, save_path: Option<PathBuf>) -> Result<Self, i32> {
        match source {
            TorrentSource::Magnet { uri } => {
                let info_hash = magnet_info_hash(uri).ok_or(status_code::INVALID_ARG)?;
                let name = magnet_param(uri, "dn")
                    .map(|value| value.replace('+', " "))
                    .unwrap_or_default();
                Ok(Self::new(info_hash, name, save_path, false, Vec::new()))
            }
            TorrentSource::File { path } => {
                let metadata = std::fs::metadata(path).map_err(|_| status_code::INVALID_ARG)?;
                let name = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let files = vec![StubFile {
                    path: name.clone(),
                    size: metadata.len(),
                    priority: DEFAULT_PRIORITY,
                }];
                Ok(Self::new(path_info_hash(path), name, save_path, true, files))
            }
        }
    }

    fn new(
        info_hash: InfoHash,
        name: String,
        save_path: Option<PathBuf>,
        has_metadata: bool,
        files: Vec<StubFile>,
    ) -> Self {
        Self {
            info_hash,
            name,
            save_path,
            state: if has_metadata {
                native_state::DOWNLOADING
            } else {
                native_state::DOWNLOADING_METADATA
            },
            progress: 0.0,
            has_metadata,
            paused: false,
            announces: 0,
            files,
            limits: (native_rate_limit(None), native_rate_limit(None)),
        }
    }

    fn restore(&mut self, payload: &[u8]) {
        if let Ok(resume) = serde_json::from_slice::<StubResume>(payload) {
            if self.name.is_empty() {
                self.name = resume.name;
            }
            self.progress = resume.progress;
            self.paused = resume.paused;
            self.state = native_state::CHECKING_RESUME_DATA;
        }
    }

    fn raw_status(&self) -> RawTorrentStatus {
        let mut raw = RawTorrentStatus {
            progress: self.progress,
            num_peers: if self.paused { 0 } else { 4 },
            num_seeds: if self.paused { 0 } else { 1 },
            state: self.state,
            has_metadata: i32::from(self.has_metadata),
            ..RawTorrentStatus::default()
        };
        write_text(&mut raw.info_hash, self.info_hash.as_str());
        write_text(&mut raw.name, &self.name);
        raw
    }

    fn file_index(&self, index: i32) -> Option<usize> {
        usize::try_from(index)
            .ok()
            .filter(|index| self.has_metadata && *index < self.files.len())
    }
}

fn magnet_param<'a>(uri: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = uri.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find_map(|(name, value)| (name == key).then_some(value))
}

fn magnet_info_hash(uri: &str) -> Option<InfoHash> {
    let (_, query) = uri.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.strip_prefix("xt=urn:btih:"))
        .find_map(|value| InfoHash::parse(value).ok())
}

fn path_info_hash(path: &Path) -> InfoHash {
    let mut hex = String::with_capacity(48);
    for salt in 0_u8..3 {
        let mut hasher = DefaultHasher::new();
        salt.hash(&mut hasher);
        path.hash(&mut hasher);
        let _ = write!(hex, "{:016x}", hasher.finish());
    }
    hex.truncate(40);
    InfoHash::parse(&hex).unwrap_or_else(|_| unreachable!("40 hex characters"))
}

impl StubEngine {
    pub(crate) fn new(config: &SessionConfig) -> Self {
        let state = StubState {
            session_limits: (
                native_rate_limit(config.download_rate_limit),
                native_rate_limit(config.upload_rate_limit),
            ),
            default_save_path: config.save_path.clone(),
            ..StubState::default()
        };
        Self {
            shared: Arc::new(StubShared {
                state: Mutex::new(state),
                ready: Condvar::new(),
                frees: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn control(&self) -> StubControl {
        StubControl {
            shared: Arc::clone(&self.shared),
        }
    }

    fn with_torrent(&self, info_hash: &InfoHash, apply: impl FnOnce(&mut StubTorrent)) -> i32 {
        let mut state = self.shared.lock();
        state
            .torrent_mut(info_hash)
            .map_or(status_code::NOT_FOUND, |torrent| {
                apply(torrent);
                status_code::OK
            })
    }

    fn drain<T>(
        &self,
        timeout_ms: i32,
        out: &mut [T],
        queue: impl Fn(&mut StubState) -> &mut VecDeque<T>,
    ) -> usize {
        if out.is_empty() {
            return 0;
        }
        let timeout = Duration::from_millis(u64::try_from(timeout_ms).unwrap_or(0));
        let guard = self.shared.lock();
        let (mut guard, _) = self
            .shared
            .ready
            .wait_timeout_while(guard, timeout, |state| queue(state).is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        let pending = queue(&mut *guard);
        let count = out.len().min(pending.len());
        for (slot, item) in out.iter_mut().zip(pending.drain(..count)) {
            *slot = item;
        }
        count
    }
}

impl Drop for StubEngine {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.resumes.clear();
        state.buffers.clear();
        drop(state);
        self.shared.frees.fetch_add(1, Ordering::SeqCst);
    }
}

impl Engine for StubEngine {
    fn add_torrent(
        &self,
        source: &TorrentSource,
        save_path: Option<&Path>,
        resume: Option<&[u8]>,
        out_hash: &mut [u8; HASH_CAPACITY],
    ) -> i32 {
        let mut state = self.shared.lock();
        if let Some(code) = state.reject_next_add.take() {
            return code;
        }
        let save_path = save_path
            .map(Path::to_path_buf)
            .or_else(|| state.default_save_path.clone());
        let mut torrent = match StubTorrent::from_source(source, save_path) {
            Ok(torrent) => torrent,
            Err(code) => return code,
        };
        if let Some(payload) = resume {
            torrent.restore(payload);
        }
        write_text(out_hash, torrent.info_hash.as_str());
        if state.torrent(&torrent.info_hash).is_none() {
            state.torrents.push(torrent);
        }
        status_code::OK
    }

    fn remove_torrent(&self, info_hash: &InfoHash, _delete_data: bool) -> i32 {
        let mut state = self.shared.lock();
        let Some(position) = state
            .torrents
            .iter()
            .position(|torrent| &torrent.info_hash == info_hash)
        else {
            return status_code::NOT_FOUND;
        };
        state.torrents.remove(position);
        let needle = info_hash.as_str().as_bytes();
        state.updates.retain(|raw| {
            !(raw.info_hash.starts_with(needle) && raw.info_hash.get(needle.len()) == Some(&0))
        });
        status_code::OK
    }

    fn find_torrent(&self, info_hash: &InfoHash) -> bool {
        self.shared.lock().torrent(info_hash).is_some()
    }

    fn torrent_status(&self, info_hash: &InfoHash, out: &mut RawTorrentStatus) -> i32 {
        self.shared
            .lock()
            .torrent(info_hash)
            .map_or(status_code::NOT_FOUND, |torrent| {
                *out = torrent.raw_status();
                status_code::OK
            })
    }

    fn pause(&self, info_hash: &InfoHash) -> i32 {
        self.with_torrent(info_hash, |torrent| torrent.paused = true)
    }

    fn resume(&self, info_hash: &InfoHash) -> i32 {
        self.with_torrent(info_hash, |torrent| torrent.paused = false)
    }

    fn force_reannounce(&self, info_hash: &InfoHash) -> i32 {
        self.with_torrent(info_hash, |torrent| torrent.announces += 1)
    }

    fn save_resume_data(&self, info_hash: &InfoHash) -> i32 {
        let mut state = self.shared.lock();
        let Some(torrent) = state.torrent(info_hash) else {
            return status_code::NOT_FOUND;
        };
        let resume = StubResume {
            info_hash: torrent.info_hash.to_string(),
            name: torrent.name.clone(),
            progress: torrent.progress,
            paused: torrent.paused,
        };
        let Ok(mut payload) = serde_json::to_vec(&resume) else {
            return status_code::GENERIC;
        };
        let mut raw = RawResumeData {
            data: payload.as_mut_ptr(),
            size: payload.len(),
            ..RawResumeData::default()
        };
        write_text(&mut raw.info_hash, info_hash.as_str());
        state.push_resume(raw, payload);
        self.shared.ready.notify_all();
        status_code::OK
    }

    fn total_size(&self, info_hash: &InfoHash) -> i64 {
        self.shared
            .lock()
            .torrent(info_hash)
            .filter(|torrent| torrent.has_metadata)
            .map_or(-1, |torrent| {
                let total: u64 = torrent.files.iter().map(|file| file.size).sum();
                i64::try_from(total).unwrap_or(i64::MAX)
            })
    }

    fn file_count(&self, info_hash: &InfoHash) -> i32 {
        self.shared.lock().torrent(info_hash).map_or(-1, |torrent| {
            if torrent.has_metadata {
                i32::try_from(torrent.files.len()).unwrap_or(i32::MAX)
            } else {
                0
            }
        })
    }

    fn file_info(&self, info_hash: &InfoHash, index: i32, out: &mut RawFileInfo) -> i32 {
        let state = self.shared.lock();
        let Some(torrent) = state.torrent(info_hash) else {
            return status_code::NOT_FOUND;
        };
        let Some(position) = torrent.file_index(index) else {
            return status_code::INVALID_ARG;
        };
        let offset: u64 = torrent.files[..position].iter().map(|file| file.size).sum();
        let file = &torrent.files[position];
        *out = RawFileInfo {
            index,
            size: i64::try_from(file.size).unwrap_or(i64::MAX),
            offset: i64::try_from(offset).unwrap_or(i64::MAX),
            priority: file.priority,
            ..RawFileInfo::default()
        };
        write_text(&mut out.path, &file.path);
        status_code::OK
    }

    fn set_file_priority(&self, info_hash: &InfoHash, index: i32, priority: i32) -> i32 {
        let mut state = self.shared.lock();
        let Some(torrent) = state.torrent_mut(info_hash) else {
            return status_code::NOT_FOUND;
        };
        match torrent.file_index(index) {
            Some(position) if (0..=7).contains(&priority) => {
                torrent.files[position].priority = priority;
                status_code::OK
            }
            _ => status_code::INVALID_ARG,
        }
    }

    fn move_storage(&self, info_hash: &InfoHash, path: &Path) -> i32 {
        if path.as_os_str().is_empty() {
            return status_code::INVALID_ARG;
        }
        self.with_torrent(info_hash, |torrent| {
            torrent.save_path = Some(path.to_path_buf());
        })
    }

    fn set_torrent_rate_limits(&self, info_hash: &InfoHash, download: i32, upload: i32) -> i32 {
        self.with_torrent(info_hash, |torrent| torrent.limits = (download, upload))
    }

    fn set_rate_limits(&self, download: i32, upload: i32) {
        self.shared.lock().session_limits = (download, upload);
    }

    fn list_overview(&self, out: &mut [RawOverview]) -> usize {
        let state = self.shared.lock();
        let mut count = 0;
        for (slot, torrent) in out.iter_mut().zip(&state.torrents) {
            *slot = RawOverview::default();
            write_text(&mut slot.info_hash, torrent.info_hash.as_str());
            write_text(&mut slot.name, &torrent.name);
            count += 1;
        }
        count
    }

    fn post_torrent_updates(&self) {
        let mut state = self.shared.lock();
        let records: Vec<RawTorrentStatus> =
            state.torrents.iter().map(StubTorrent::raw_status).collect();
        for record in records {
            state.push_update(record);
        }
        self.shared.ready.notify_all();
    }

    fn poll_updates(&self, timeout_ms: i32, out: &mut [RawTorrentStatus]) -> usize {
        self.drain(timeout_ms, out, StubState::updates_queue)
    }

    fn poll_alerts(&self, timeout_ms: i32, out: &mut [RawAlert]) -> usize {
        self.drain(timeout_ms, out, StubState::alerts_queue)
    }

    fn poll_resume(&self, timeout_ms: i32, out: &mut [RawResumeData]) -> usize {
        self.drain(timeout_ms, out, StubState::resumes_queue)
    }

    fn free_resume_buffers(&self, items: &mut [RawResumeData]) {
        let mut state = self.shared.lock();
        for item in items {
            if !item.data.is_null() {
                state.buffers.remove(&item.data.addr());
            }
            item.data = std::ptr::null_mut();
            item.size = 0;
        }
    }

    fn take_dropped_events(&self) -> u64 {
        std::mem::take(&mut self.shared.lock().dropped)
    }
}

impl StubControl {
    /// Mark metadata as received with the given `(path, size)` files and
    /// queue a metadata-received alert. Returns `false` for unknown torrents.
    pub fn deliver_metadata(&self, info_hash: &InfoHash, files: &[(&str, u64)]) -> bool {
        let mut state = self.shared.lock();
        let Some(torrent) = state.torrent_mut(info_hash) else {
            return false;
        };
        torrent.has_metadata = true;
        torrent.state = native_state::DOWNLOADING;
        torrent.files = files
            .iter()
            .map(|(path, size)| StubFile {
                path: (*path).to_string(),
                size: *size,
                priority: DEFAULT_PRIORITY,
            })
            .collect();
        if torrent.name.is_empty() {
            torrent.name = files
                .first()
                .map(|(path, _)| (*path).to_string())
                .unwrap_or_default();
        }
        let message = format!("{} metadata received", torrent.name);
        state.push_alert(
            native_alert::METADATA_RECEIVED,
            info_hash.as_str(),
            0,
            &message,
        );
        self.shared.ready.notify_all();
        true
    }

    /// Set download progress; reaching 1.0 moves the torrent to seeding and
    /// queues a finished alert.
    pub fn set_progress(&self, info_hash: &InfoHash, progress: f64) -> bool {
        let mut state = self.shared.lock();
        let Some(torrent) = state.torrent_mut(info_hash) else {
            return false;
        };
        torrent.progress = progress;
        if progress >= 1.0 {
            torrent.state = native_state::SEEDING;
            let message = format!("{} finished", torrent.name);
            state.push_alert(
                native_alert::TORRENT_FINISHED,
                info_hash.as_str(),
                0,
                &message,
            );
            self.shared.ready.notify_all();
        }
        true
    }

    /// Force the next native state code reported for a torrent.
    pub fn set_state_code(&self, info_hash: &InfoHash, code: i32) -> bool {
        self.shared
            .lock()
            .torrent_mut(info_hash)
            .map(|torrent| torrent.state = code)
            .is_some()
    }

    /// Queue a raw alert, including kinds the session does not understand.
    pub fn push_alert(&self, kind: i32, info_hash: &str, error_code: i32, message: &str) {
        self.shared
            .lock()
            .push_alert(kind, info_hash, error_code, message);
        self.shared.ready.notify_all();
    }

    /// Make the next add fail with `code`.
    pub fn reject_next_add(&self, code: i32) {
        self.shared.lock().reject_next_add = Some(code);
    }

    /// Raw session-wide limits last received, `-1` meaning unlimited.
    #[must_use]
    pub fn session_rate_limits(&self) -> (i32, i32) {
        self.shared.lock().session_limits
    }

    /// Raw per-torrent limits last received.
    #[must_use]
    pub fn torrent_rate_limits(&self, info_hash: &InfoHash) -> Option<(i32, i32)> {
        self.shared.lock().torrent(info_hash).map(|torrent| torrent.limits)
    }

    /// Whether the torrent is paused, `None` when it is not in the engine.
    #[must_use]
    pub fn is_paused(&self, info_hash: &InfoHash) -> Option<bool> {
        self.shared.lock().torrent(info_hash).map(|torrent| torrent.paused)
    }

    /// Number of forced reannounces received.
    #[must_use]
    pub fn announce_count(&self, info_hash: &InfoHash) -> Option<u32> {
        self.shared
            .lock()
            .torrent(info_hash)
            .map(|torrent| torrent.announces)
    }

    /// Current storage location of a torrent.
    #[must_use]
    pub fn save_path(&self, info_hash: &InfoHash) -> Option<PathBuf> {
        self.shared
            .lock()
            .torrent(info_hash)
            .and_then(|torrent| torrent.save_path.clone())
    }

    /// Raw priority of one file.
    #[must_use]
    pub fn file_priority(&self, info_hash: &InfoHash, index: usize) -> Option<i32> {
        self.shared
            .lock()
            .torrent(info_hash)
            .and_then(|torrent| torrent.files.get(index).map(|file| file.priority))
    }

    /// Number of torrents held by the engine.
    #[must_use]
    pub fn torrent_count(&self) -> usize {
        self.shared.lock().torrents.len()
    }

    /// Resume buffers handed out and not yet released.
    #[must_use]
    pub fn outstanding_resume_buffers(&self) -> usize {
        let state = self.shared.lock();
        state.buffers.len() - state.resumes.len().min(state.buffers.len())
    }

    /// Status records queued and not yet polled.
    #[must_use]
    pub fn pending_updates(&self) -> usize {
        self.shared.lock().updates.len()
    }

    /// Alerts queued and not yet polled.
    #[must_use]
    pub fn pending_alerts(&self) -> usize {
        self.shared.lock().alerts.len()
    }

    /// How many times the engine has been freed.
    #[must_use]
    pub fn engine_frees(&self) -> usize {
        self.shared.frees.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::decode_info_hash;

    const MAGNET: &str =
        "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=Example+Linux";

    fn engine() -> StubEngine {
        StubEngine::new(&SessionConfig::default())
    }

    fn add(engine: &StubEngine, source: &TorrentSource) -> InfoHash {
        let mut hash = [0_u8; HASH_CAPACITY];
        assert_eq!(
            engine.add_torrent(source, None, None, &mut hash),
            status_code::OK
        );
        decode_info_hash(&hash).expect("hash written")
    }

    #[test]
    fn magnet_add_parses_hash_and_name() {
        let engine = engine();
        let hash = add(&engine, &TorrentSource::magnet(MAGNET));
        let mut raw = RawTorrentStatus::default();
        assert_eq!(engine.torrent_status(&hash, &mut raw), status_code::OK);
        assert_eq!(raw.state, native_state::DOWNLOADING_METADATA);
        assert_eq!(raw.has_metadata, 0);
        assert!(raw.name.starts_with(b"Example Linux\0"));
    }

    #[test]
    fn magnet_without_hash_is_invalid() {
        let engine = engine();
        let mut hash = [0_u8; HASH_CAPACITY];
        let source = TorrentSource::magnet("magnet:?dn=nothing");
        assert_eq!(
            engine.add_torrent(&source, None, None, &mut hash),
            status_code::INVALID_ARG
        );
    }

    #[test]
    fn file_add_derives_stable_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sample.torrent");
        std::fs::write(&path, b"d4:infod4:name6:samplee").expect("write");
        let engine = engine();
        let first = add(&engine, &TorrentSource::file(&path));
        assert_eq!(path_info_hash(&path), first);
        assert_eq!(engine.file_count(&first), 1);
        assert_eq!(engine.total_size(&first), 23);
    }

    #[test]
    fn poll_waits_for_bounded_time_and_drains() {
        let engine = engine();
        let mut out = [RawTorrentStatus::default(); 4];
        assert_eq!(engine.poll_updates(0, &mut out), 0);

        add(&engine, &TorrentSource::magnet(MAGNET));
        engine.post_torrent_updates();
        assert_eq!(engine.poll_updates(10, &mut out), 1);
        assert_eq!(engine.poll_updates(0, &mut out), 0);
    }

    #[test]
    fn resume_buffers_are_tracked_until_freed() {
        let engine = engine();
        let control = engine.control();
        let hash = add(&engine, &TorrentSource::magnet(MAGNET));
        assert_eq!(engine.save_resume_data(&hash), status_code::OK);

        let mut out = [RawResumeData::default(); 2];
        let count = engine.poll_resume(0, &mut out);
        assert_eq!(count, 1);
        assert_eq!(control.outstanding_resume_buffers(), 1);
        engine.free_resume_buffers(&mut out[..count]);
        assert_eq!(control.outstanding_resume_buffers(), 0);
        assert!(out[0].data.is_null());
    }

    #[test]
    fn repeated_posts_keep_one_update_per_torrent() {
        let engine = engine();
        let control = engine.control();
        let hash = add(&engine, &TorrentSource::magnet(MAGNET));
        for _ in 0..50 {
            engine.post_torrent_updates();
        }
        assert_eq!(control.pending_updates(), 1);

        assert!(control.set_progress(&hash, 0.5));
        engine.post_torrent_updates();
        let mut out = [RawTorrentStatus::default(); 4];
        assert_eq!(engine.poll_updates(0, &mut out), 1);
        assert!((out[0].progress - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn full_alert_queue_discards_oldest() {
        let engine = engine();
        let control = engine.control();
        for index in 0..QUEUE_CAPACITY + 10 {
            control.push_alert(1, "", 0, &format!("alert {index}"));
        }
        assert_eq!(control.pending_alerts(), QUEUE_CAPACITY);
        assert_eq!(engine.take_dropped_events(), 10);
        assert_eq!(engine.take_dropped_events(), 0);

        let mut out = [RawAlert::default(); 1];
        assert_eq!(engine.poll_alerts(0, &mut out), 1);
        assert!(out[0].message.starts_with(b"alert 10\0"));
    }

    #[test]
    fn full_resume_queue_releases_discarded_buffers() {
        let engine = engine();
        let control = engine.control();
        let hash = add(&engine, &TorrentSource::magnet(MAGNET));
        for _ in 0..QUEUE_CAPACITY + 3 {
            assert_eq!(engine.save_resume_data(&hash), status_code::OK);
        }
        assert_eq!(engine.take_dropped_events(), 3);
        assert_eq!(control.outstanding_resume_buffers(), 0);
        assert_eq!(engine.shared.lock().buffers.len(), QUEUE_CAPACITY);
    }

    #[test]
    fn drop_counts_engine_frees() {
        let engine = engine();
        let control = engine.control();
        drop(engine);
        assert_eq!(control.engine_frees(), 1);
    }
}
