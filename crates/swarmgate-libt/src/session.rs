//! Session lifecycle: owns the engine, adds and removes torrents, and hands
//! out non-owning torrent handles and event streams.
//!
//! # Design
//!
//! - The session holds the only strong reference to the engine. Handles and
//!   stream loops hold a `Weak` and re-check liveness on every call.
//! - `close` marks the engine closed before dropping the reference; calls
//!   already in flight keep a temporary strong reference, so the engine is
//!   freed exactly once, after they drain.
//! - Blocking engine calls run on the blocking thread pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use swarmgate_core::{
    AddTorrentOptions, Alert, InfoHash, RateLimit, ResumeDataItem, SessionConfig, SessionError,
    SessionResult, TorrentOverview, TorrentSource, TorrentStatus,
};
use tracing::{debug, info, warn};

use crate::convert::{
    decode_info_hash, native_rate_limit, overview_from_raw, resume_from_raw, timeout_millis,
};
use crate::engine::{Engine, create_engine};
use crate::ffi::{HASH_CAPACITY, RawOverview, RawResumeData, status_code};
use crate::store::FastResumeStore;
use crate::stream::{self, Subscription};
use crate::torrent::TorrentHandle;

/// Largest record buffer allocated for a single engine poll.
pub(crate) const MAX_POLL_BATCH: usize = 4096;

/// First buffer size tried when listing torrents; doubled until it fits.
const LIST_CHUNK: usize = 256;

/// The engine plus its closed flag.
pub(crate) struct EngineCell {
    engine: Box<dyn Engine>,
    closed: AtomicBool,
}

impl EngineCell {
    pub(crate) fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }
}

/// Non-owning reference to a session's engine.
#[derive(Clone)]
pub(crate) struct EngineRef(Weak<EngineCell>);

impl EngineRef {
    /// Strong reference for one call, or `None` once the session is closed.
    pub(crate) fn upgrade(&self) -> Option<Arc<EngineCell>> {
        self.0
            .upgrade()
            .filter(|cell| !cell.closed.load(Ordering::Acquire))
    }

    pub(crate) fn require(&self, operation: &'static str) -> SessionResult<Arc<EngineCell>> {
        self.upgrade()
            .ok_or(SessionError::EngineUnavailable { operation })
    }
}

/// Run `call` against the engine on the blocking pool.
pub(crate) async fn run_blocking<T, F>(
    cell: Arc<EngineCell>,
    operation: &'static str,
    call: F,
) -> SessionResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Engine) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(cell.engine()))
        .await
        .map_err(|err| {
            warn!(operation, error = %err, "blocking engine call did not complete");
            SessionError::EngineUnavailable { operation }
        })
}

/// Map a command's native code: not-found is a logged no-op.
pub(crate) fn command_outcome(
    operation: &'static str,
    info_hash: &InfoHash,
    code: i32,
) -> SessionResult<()> {
    match code {
        status_code::OK => Ok(()),
        status_code::NOT_FOUND => {
            debug!(
                operation,
                info_hash = %info_hash,
                "torrent no longer in session; command ignored"
            );
            Ok(())
        }
        code => Err(SessionError::Rejected { operation, code }),
    }
}

/// Owner of one torrent engine instance.
pub struct Session {
    cell: Option<Arc<EngineCell>>,
    config: SessionConfig,
}

impl Session {
    /// Validate `config` and start an engine.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] for an invalid configuration and
    /// [`SessionError::Construction`] when the engine cannot be created.
    pub fn new(config: SessionConfig) -> SessionResult<Self> {
        config.validate()?;
        let engine = create_engine(&config)?;
        Ok(Self::from_engine(config, engine))
    }

    /// Start a session over the in-memory engine and return its control handle.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] for an invalid configuration.
    #[cfg(not(feature = "libtorrent"))]
    pub fn with_stub(config: SessionConfig) -> SessionResult<(Self, crate::StubControl)> {
        config.validate()?;
        let engine = crate::engine::stub::StubEngine::new(&config);
        let control = engine.control();
        Ok((Self::from_engine(config, Box::new(engine)), control))
    }

    pub(crate) fn from_engine(config: SessionConfig, engine: Box<dyn Engine>) -> Self {
        info!(
            listen_port = config.listen_port,
            save_path = ?config.save_path,
            "torrent session created"
        );
        Self {
            cell: Some(Arc::new(EngineCell {
                engine,
                closed: AtomicBool::new(false),
            })),
            config,
        }
    }

    /// Configuration the session was built with.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether [`Session::close`] has not been called yet.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.cell.is_some()
    }

    /// Tear the engine down. Idempotent; handles and streams observe the
    /// closed session on their next call.
    pub fn close(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.closed.store(true, Ordering::Release);
            let in_flight = Arc::strong_count(&cell) - 1;
            drop(cell);
            info!(in_flight, "torrent session closed");
        }
    }

    pub(crate) fn engine_ref(&self) -> EngineRef {
        EngineRef(self.cell.as_ref().map_or_else(Weak::new, Arc::downgrade))
    }

    fn require(&self, operation: &'static str) -> SessionResult<Arc<EngineCell>> {
        self.cell
            .clone()
            .ok_or(SessionError::EngineUnavailable { operation })
    }

    /// Add a torrent and wait for the engine to acknowledge it.
    ///
    /// Adding a torrent that is already present returns another handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after `close`,
    /// [`SessionError::Rejected`] with the native code when the engine refuses
    /// the add, and [`SessionError::MalformedRecord`] if the returned
    /// identifier cannot be decoded.
    pub async fn add_torrent(
        &self,
        source: TorrentSource,
        options: AddTorrentOptions,
    ) -> SessionResult<TorrentHandle> {
        const OPERATION: &str = "add_torrent";
        let cell = self.require(OPERATION)?;
        let description = source.describe();
        let with_resume = options.resume_data.is_some();
        let (code, raw_hash) = run_blocking(cell, OPERATION, move |engine| {
            let mut raw_hash = [0_u8; HASH_CAPACITY];
            let code = engine.add_torrent(
                &source,
                options.save_path.as_deref(),
                options.resume_data.as_deref(),
                &mut raw_hash,
            );
            (code, raw_hash)
        })
        .await?;

        if code != status_code::OK {
            warn!(source = %description, code, "engine rejected torrent");
            return Err(SessionError::Rejected {
                operation: OPERATION,
                code,
            });
        }
        let info_hash =
            decode_info_hash(&raw_hash).map_err(|err| err.into_session_error(OPERATION))?;
        info!(info_hash = %info_hash, source = %description, with_resume, "torrent added");
        Ok(TorrentHandle::new(info_hash, self.engine_ref()))
    }

    /// Remove a torrent, optionally deleting its data. Returns once the engine
    /// has accepted the command; a handle whose torrent is already gone is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after `close` and
    /// [`SessionError::Rejected`] when the engine refuses the removal.
    pub async fn remove_torrent(
        &self,
        torrent: &TorrentHandle,
        delete_data: bool,
    ) -> SessionResult<()> {
        const OPERATION: &str = "remove_torrent";
        let cell = self.require(OPERATION)?;
        let info_hash = torrent.info_hash().clone();
        let target = info_hash.clone();
        let code = run_blocking(cell, OPERATION, move |engine| {
            engine.remove_torrent(&target, delete_data)
        })
        .await?;
        command_outcome(OPERATION, &info_hash, code)?;
        if code == status_code::OK {
            info!(info_hash = %info_hash, delete_data, "torrent removed");
        }
        Ok(())
    }

    /// Handle for a torrent already in the engine.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after `close`.
    pub fn find_torrent(&self, info_hash: &InfoHash) -> SessionResult<Option<TorrentHandle>> {
        let cell = self.require("find_torrent")?;
        Ok(cell
            .engine()
            .find_torrent(info_hash)
            .then(|| TorrentHandle::new(info_hash.clone(), self.engine_ref())))
    }

    /// Up to `max` torrents in engine order. Anything beyond `max` is dropped.
    /// Memory grows with the torrent count, not with `max`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after `close`.
    pub fn list_torrents(&self, max: usize) -> SessionResult<Vec<TorrentOverview>> {
        let cell = self.require("list_torrents")?;
        Ok(list_overviews(cell.engine(), max))
    }

    /// Apply session-wide limits; `None` lifts a limit. Takes effect on a
    /// later engine tick.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after `close`.
    pub fn set_rate_limits(&self, limits: RateLimit) -> SessionResult<()> {
        let cell = self.require("set_rate_limits")?;
        cell.engine().set_rate_limits(
            native_rate_limit(limits.download_bps),
            native_rate_limit(limits.upload_bps),
        );
        debug!(
            download = ?limits.download_bps,
            upload = ?limits.upload_bps,
            "session rate limits updated"
        );
        Ok(())
    }

    /// Drain up to `batch` finished resume-data items, waiting at most
    /// `timeout` for the first one. A timeout yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after `close`.
    pub async fn poll_resume_data(
        &self,
        timeout: Duration,
        batch: usize,
    ) -> SessionResult<Vec<ResumeDataItem>> {
        const OPERATION: &str = "poll_resume_data";
        let cell = self.require(OPERATION)?;
        if batch == 0 {
            return Ok(Vec::new());
        }
        run_blocking(cell, OPERATION, move |engine| {
            drain_resume(engine, timeout_millis(timeout), batch)
        })
        .await
    }

    /// Ask every torrent for resume data and persist what arrives within
    /// `timeout` into `store`. Returns how many blobs were written.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after `close`.
    pub async fn flush_resume_data(
        &self,
        store: &FastResumeStore,
        timeout: Duration,
        batch: usize,
    ) -> SessionResult<usize> {
        self.require("flush_resume_data")?;
        stream::flush_resume_once(&self.engine_ref(), store, timeout, batch).await
    }

    /// Session-wide status batches: each tick posts an update request and
    /// waits up to `interval` for at most `batch` records. Ticks without
    /// data emit nothing. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after `close` and
    /// [`SessionError::InvalidInput`] for a zero `batch`.
    pub fn status_stream(
        &self,
        interval: Duration,
        batch: usize,
    ) -> SessionResult<Subscription<Vec<TorrentStatus>>> {
        self.require("status_stream")?;
        ensure_batch(batch)?;
        Ok(stream::spawn_status_stream(self.engine_ref(), interval, batch))
    }

    /// [`Session::status_stream`] ticking at the configured
    /// `status_interval_ms`.
    ///
    /// # Errors
    ///
    /// Same as [`Session::status_stream`].
    pub fn default_status_stream(
        &self,
        batch: usize,
    ) -> SessionResult<Subscription<Vec<TorrentStatus>>> {
        self.status_stream(self.config.status_interval(), batch)
    }

    /// Alert batches polled on their own cadence. Must be called within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after `close` and
    /// [`SessionError::InvalidInput`] for a zero `batch`.
    pub fn alert_stream(
        &self,
        interval: Duration,
        batch: usize,
    ) -> SessionResult<Subscription<Vec<Alert>>> {
        self.require("alert_stream")?;
        ensure_batch(batch)?;
        Ok(stream::spawn_alert_stream(self.engine_ref(), interval, batch))
    }

    /// Periodically request resume data from every torrent and persist it
    /// into `store`. Each item yielded is the number of blobs written in one
    /// tick. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EngineUnavailable`] after `close` and
    /// [`SessionError::InvalidInput`] for a zero `batch`.
    pub fn spawn_resume_flusher(
        &self,
        store: FastResumeStore,
        interval: Duration,
        batch: usize,
    ) -> SessionResult<Subscription<usize>> {
        self.require("spawn_resume_flusher")?;
        ensure_batch(batch)?;
        Ok(stream::spawn_resume_flusher(self.engine_ref(), store, interval, batch))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn ensure_batch(batch: usize) -> SessionResult<()> {
    if batch == 0 {
        return Err(SessionError::InvalidInput {
            field: "batch",
            reason: "must be greater than zero",
        });
    }
    Ok(())
}

pub(crate) fn list_overviews(engine: &dyn Engine, max: usize) -> Vec<TorrentOverview> {
    if max == 0 {
        return Vec::new();
    }
    let mut capacity = max.min(LIST_CHUNK);
    let (raw, count) = loop {
        let mut raw = vec![RawOverview::default(); capacity];
        let count = engine.list_overview(&mut raw).min(capacity);
        if count < capacity || capacity == max {
            break (raw, count);
        }
        capacity = capacity.saturating_mul(2).min(max);
    };
    raw[..count]
        .iter()
        .filter_map(|record| match overview_from_raw(record) {
            Ok(overview) => Some(overview),
            Err(err) => {
                warn!(error = %err, "skipping malformed overview record");
                None
            }
        })
        .collect()
}

/// Returns polled resume buffers to the engine when dropped.
struct ResumeBatch<'a> {
    engine: &'a dyn Engine,
    items: Vec<RawResumeData>,
    count: usize,
}

impl Drop for ResumeBatch<'_> {
    fn drop(&mut self) {
        self.engine.free_resume_buffers(&mut self.items[..self.count]);
    }
}

/// Log alerts or resume records the engine discarded on queue overflow.
pub(crate) fn report_dropped_events(engine: &dyn Engine) {
    let dropped = engine.take_dropped_events();
    if dropped > 0 {
        warn!(dropped, "engine event queue full; oldest records discarded");
    }
}

/// Poll resume data and copy it into owned items; native buffers are
/// released before returning.
pub(crate) fn drain_resume(
    engine: &dyn Engine,
    timeout_ms: i32,
    batch: usize,
) -> Vec<ResumeDataItem> {
    let batch = batch.min(MAX_POLL_BATCH);
    report_dropped_events(engine);
    let mut polled = ResumeBatch {
        engine,
        items: vec![RawResumeData::default(); batch],
        count: 0,
    };
    polled.count = engine.poll_resume(timeout_ms, &mut polled.items).min(batch);
    let items: Vec<ResumeDataItem> = polled.items[..polled.count]
        .iter()
        .filter_map(|raw| match resume_from_raw(raw) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(error = %err, "skipping malformed resume record");
                None
            }
        })
        .collect();
    drop(polled);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stub::{StubControl, StubEngine};
    use swarmgate_core::TorrentState;

    const MAGNET: &str = "magnet:?xt=urn:btih:abcdefabcdefabcdefabcdefabcdefabcdefabcd&dn=demo";

    fn stub_session(config: SessionConfig) -> (Session, StubControl) {
        let engine = StubEngine::new(&config);
        let control = engine.control();
        (Session::from_engine(config, Box::new(engine)), control)
    }

    #[tokio::test]
    async fn magnet_add_reports_pending_metadata() -> anyhow::Result<()> {
        let (session, _control) = stub_session(SessionConfig::default());
        let handle = session
            .add_torrent(TorrentSource::magnet(MAGNET), AddTorrentOptions::default())
            .await?;
        let status = handle.status();
        assert!(!status.has_metadata);
        assert!(status.progress.abs() < f64::EPSILON);
        assert!(matches!(
            status.state,
            TorrentState::Downloading | TorrentState::Checking
        ));
        assert_eq!(status.name, "demo");
        Ok(())
    }

    #[tokio::test]
    async fn rejected_add_keeps_native_code() {
        let (session, control) = stub_session(SessionConfig::default());
        control.reject_next_add(status_code::GENERIC);
        let err = session
            .add_torrent(TorrentSource::magnet(MAGNET), AddTorrentOptions::default())
            .await
            .err();
        assert!(matches!(
            err,
            Some(SessionError::Rejected {
                operation: "add_torrent",
                code: 1
            })
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_frees_once() {
        let (mut session, control) = stub_session(SessionConfig::default());
        session.close();
        session.close();
        drop(session);
        assert_eq!(control.engine_frees(), 1);
    }

    #[tokio::test]
    async fn operations_after_close_fail_cheaply() {
        let (mut session, _control) = stub_session(SessionConfig::default());
        let handle = session
            .add_torrent(TorrentSource::magnet(MAGNET), AddTorrentOptions::default())
            .await
            .expect("add");
        session.close();

        assert!(matches!(
            session.list_torrents(8),
            Err(SessionError::EngineUnavailable { .. })
        ));
        assert!(matches!(
            session
                .add_torrent(TorrentSource::magnet(MAGNET), AddTorrentOptions::default())
                .await,
            Err(SessionError::EngineUnavailable { .. })
        ));
        assert_eq!(handle.status().state, TorrentState::Unknown);
        assert!(!handle.is_valid());
    }

    #[tokio::test]
    async fn constructor_limits_reach_engine_as_sentinels() {
        let config = SessionConfig {
            download_rate_limit: Some(1024),
            upload_rate_limit: None,
            ..SessionConfig::default()
        };
        let (session, control) = stub_session(config);
        assert_eq!(control.session_rate_limits(), (1024, -1));

        session
            .set_rate_limits(RateLimit::new(None, Some(u64::MAX)))
            .expect("set limits");
        assert_eq!(control.session_rate_limits(), (-1, i32::MAX));
    }

    #[test]
    fn zero_batch_is_rejected() {
        assert!(ensure_batch(0).is_err());
        assert!(ensure_batch(1).is_ok());
    }

    #[test]
    fn invalid_config_leaves_nothing_behind() {
        let config = SessionConfig {
            status_interval_ms: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            Session::new(config),
            Err(SessionError::Config(_))
        ));
    }

    #[tokio::test]
    async fn default_status_stream_uses_configured_interval() -> anyhow::Result<()> {
        let config = SessionConfig {
            status_interval_ms: 10,
            ..SessionConfig::default()
        };
        let (session, _control) = stub_session(config);
        assert_eq!(session.config().status_interval(), Duration::from_millis(10));
        session
            .add_torrent(TorrentSource::magnet(MAGNET), AddTorrentOptions::default())
            .await?;

        let mut updates = session.default_status_stream(4)?;
        let batch = tokio::time::timeout(Duration::from_secs(2), updates.recv())
            .await?
            .expect("status batch");
        assert_eq!(batch.len(), 1);
        assert!(session.default_status_stream(0).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn oversized_limits_do_not_preallocate() -> anyhow::Result<()> {
        let (session, control) = stub_session(SessionConfig::default());
        for fill in ['a', 'b', 'c'] {
            let magnet = format!("magnet:?xt=urn:btih:{}&dn={fill}", fill.to_string().repeat(40));
            session
                .add_torrent(TorrentSource::magnet(magnet), AddTorrentOptions::default())
                .await?;
        }
        assert_eq!(session.list_torrents(usize::MAX)?.len(), 3);
        assert_eq!(session.list_torrents(2)?.len(), 2);

        let items = session.poll_resume_data(Duration::ZERO, usize::MAX).await?;
        assert!(items.is_empty());

        let mut updates = session.status_stream(Duration::from_millis(10), usize::MAX)?;
        let batch = tokio::time::timeout(Duration::from_secs(2), updates.recv())
            .await?
            .expect("status batch");
        assert_eq!(batch.len(), 3);
        assert!(control.pending_updates() <= 3);
        Ok(())
    }

    #[test]
    fn listing_grows_past_the_first_chunk() {
        let config = SessionConfig::default();
        let engine = StubEngine::new(&config);
        for index in 0..LIST_CHUNK + 5 {
            let magnet = format!("magnet:?xt=urn:btih:{index:040x}&dn=t{index}");
            let mut hash = [0_u8; HASH_CAPACITY];
            let code = engine.add_torrent(&TorrentSource::magnet(magnet), None, None, &mut hash);
            assert_eq!(code, status_code::OK);
        }
        assert_eq!(list_overviews(&engine, usize::MAX).len(), LIST_CHUNK + 5);
        assert_eq!(list_overviews(&engine, LIST_CHUNK + 1).len(), LIST_CHUNK + 1);
    }

    #[tokio::test]
    async fn resume_buffers_are_released_before_return() -> anyhow::Result<()> {
        let (session, control) = stub_session(SessionConfig::default());
        let handle = session
            .add_torrent(TorrentSource::magnet(MAGNET), AddTorrentOptions::default())
            .await?;
        handle.save_resume_data();
        let items = session
            .poll_resume_data(Duration::from_millis(100), 4)
            .await?;
        assert_eq!(items.len(), 1);
        assert_eq!(&items[0].info_hash, handle.info_hash());
        assert!(!items[0].payload.is_empty());
        assert_eq!(control.outstanding_resume_buffers(), 0);
        Ok(())
    }
}
