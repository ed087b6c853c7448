//! Event distributor: engine polling loops republished as cancellable,
//! backpressured streams.
//!
//! Each subscription owns one Tokio task. A tick checks cancellation, then
//! session liveness, then runs the bounded engine poll on the blocking pool.
//! A poll already in flight when the subscription is cancelled completes
//! before the loop exits. A closed session ends the stream.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use swarmgate_core::{Alert, SessionError, SessionResult, TorrentStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, trace, warn};

use crate::convert::{alert_from_raw, status_from_raw, timeout_millis};
use crate::engine::Engine;
use crate::error::MarshalError;
use crate::ffi::{RawAlert, RawTorrentStatus, status_code};
use crate::session::{
    EngineRef, MAX_POLL_BATCH, drain_resume, list_overviews, report_dropped_events, run_blocking,
};
use crate::store::FastResumeStore;
use crate::torrent::TorrentHandle;

/// Items buffered per subscription before the polling loop waits on the consumer.
const SUBSCRIPTION_BUFFER: usize = 16;
/// Floor applied to tick intervals.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A running polling loop delivered as a [`Stream`].
///
/// Dropping the subscription cancels the loop.
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Subscription<T> {
    fn spawn<F, Fut>(span: Span, body: F) -> Self
    where
        F: FnOnce(mpsc::Sender<T>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(body(sender, cancel.clone()).instrument(span));
        Self {
            receiver,
            cancel,
            task: Some(task),
        }
    }
}

impl<T> Subscription<T> {
    /// Next item, or `None` once the loop has ended.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Stop polling. Items not yet received are discarded; the session and
    /// other subscriptions are unaffected.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
    }

    /// Whether [`Subscription::cancel`] has been called or the subscription dropped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the loop, including any in-flight poll, to finish.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "subscription task failed");
            }
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn ticker(interval: Duration, start: Instant) -> time::Interval {
    let mut ticker = time::interval_at(start, interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Wait for the next tick; `false` once cancelled.
async fn next_tick(ticker: &mut time::Interval, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        _ = ticker.tick() => true,
    }
}

/// Deliver `item`; `false` once cancelled or the subscriber is gone.
async fn deliver<T>(sender: &mpsc::Sender<T>, cancel: &CancellationToken, item: T) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = sender.send(item) => sent.is_ok(),
    }
}

struct PollLoop<R, T> {
    operation: &'static str,
    poll: fn(&dyn Engine, i32, &mut [R]) -> usize,
    decode: fn(&R) -> Result<Option<T>, MarshalError>,
}

impl<R, T> PollLoop<R, T>
where
    R: Copy + Default + Send + 'static,
    T: Send + 'static,
{
    async fn run(
        self,
        engine: EngineRef,
        sender: mpsc::Sender<Vec<T>>,
        cancel: CancellationToken,
        interval: Duration,
        batch: usize,
    ) {
        let Self {
            operation,
            poll,
            decode,
        } = self;
        let batch = batch.min(MAX_POLL_BATCH);
        let timeout_ms = timeout_millis(interval);
        let mut ticker = ticker(interval, Instant::now());
        let mut buffer = vec![R::default(); batch];

        while next_tick(&mut ticker, &cancel).await {
            let Some(cell) = engine.upgrade() else {
                info!(operation, "session closed; stream ended");
                return;
            };
            let mut records = std::mem::take(&mut buffer);
            let polled = run_blocking(cell, operation, move |engine| {
                let count = poll(engine, timeout_ms, &mut records);
                (records, count)
            })
            .await;
            let count = match polled {
                Ok((records, count)) => {
                    buffer = records;
                    count.min(batch)
                }
                Err(err) => {
                    warn!(operation, error = %err, "poll failed; retrying next tick");
                    buffer = vec![R::default(); batch];
                    continue;
                }
            };

            let items: Vec<T> = buffer[..count]
                .iter()
                .filter_map(|raw| {
                    decode(raw).unwrap_or_else(|err| {
                        warn!(operation, error = %err, "skipping malformed record");
                        None
                    })
                })
                .collect();
            if items.is_empty() {
                continue;
            }
            let delivered = items.len();
            if !deliver(&sender, &cancel, items).await {
                break;
            }
            trace!(operation, count = delivered, "batch delivered");
        }
        debug!(operation, "stream cancelled");
    }
}

fn poll_status(engine: &dyn Engine, timeout_ms: i32, out: &mut [RawTorrentStatus]) -> usize {
    engine.post_torrent_updates();
    engine.poll_updates(timeout_ms, out)
}

fn decode_status(raw: &RawTorrentStatus) -> Result<Option<TorrentStatus>, MarshalError> {
    status_from_raw(raw).map(Some)
}

fn poll_alerts(engine: &dyn Engine, timeout_ms: i32, out: &mut [RawAlert]) -> usize {
    report_dropped_events(engine);
    engine.poll_alerts(timeout_ms, out)
}

pub(crate) fn spawn_status_stream(
    engine: EngineRef,
    interval: Duration,
    batch: usize,
) -> Subscription<Vec<TorrentStatus>> {
    let span = info_span!("status_stream", batch, interval_ms = timeout_millis(interval));
    Subscription::spawn(span, move |sender, cancel| {
        PollLoop {
            operation: "poll_updates",
            poll: poll_status,
            decode: decode_status,
        }
        .run(engine, sender, cancel, interval, batch)
    })
}

pub(crate) fn spawn_alert_stream(
    engine: EngineRef,
    interval: Duration,
    batch: usize,
) -> Subscription<Vec<Alert>> {
    let span = info_span!("alert_stream", batch, interval_ms = timeout_millis(interval));
    Subscription::spawn(span, move |sender, cancel| {
        PollLoop {
            operation: "poll_alerts",
            poll: poll_alerts,
            decode: alert_from_raw,
        }
        .run(engine, sender, cancel, interval, batch)
    })
}

pub(crate) fn spawn_torrent_status_stream(
    handle: TorrentHandle,
    interval: Duration,
) -> Subscription<TorrentStatus> {
    let span = info_span!("torrent_status_stream", info_hash = %handle.info_hash());
    Subscription::spawn(span, move |sender, cancel| async move {
        let mut ticker = ticker(interval, Instant::now());
        while next_tick(&mut ticker, &cancel).await {
            if handle.engine_ref().upgrade().is_none() {
                info!("session closed; stream ended");
                return;
            }
            if !deliver(&sender, &cancel, handle.status()).await {
                break;
            }
        }
        debug!("stream cancelled");
    })
}

pub(crate) fn spawn_resume_flusher(
    engine: EngineRef,
    store: FastResumeStore,
    interval: Duration,
    batch: usize,
) -> Subscription<usize> {
    let span = info_span!("resume_flusher", batch, interval_ms = timeout_millis(interval));
    Subscription::spawn(span, move |sender, cancel| async move {
        let interval = interval.max(MIN_INTERVAL);
        let mut ticker = ticker(interval, Instant::now() + interval);
        while next_tick(&mut ticker, &cancel).await {
            match flush_resume_once(&engine, &store, interval, batch).await {
                Ok(0) => {}
                Ok(saved) => {
                    if !deliver(&sender, &cancel, saved).await {
                        break;
                    }
                }
                Err(SessionError::EngineUnavailable { .. }) => {
                    info!("session closed; resume flusher ended");
                    return;
                }
                Err(err) => warn!(error = %err, "resume flush failed"),
            }
        }
        debug!("resume flusher cancelled");
    })
}

/// Request resume data from every listed torrent and persist what arrives.
pub(crate) async fn flush_resume_once(
    engine: &EngineRef,
    store: &FastResumeStore,
    timeout: Duration,
    batch: usize,
) -> SessionResult<usize> {
    const OPERATION: &str = "flush_resume_data";
    let cell = engine.require(OPERATION)?;
    let batch = batch.max(1);
    let timeout_ms = timeout_millis(timeout);
    let items = run_blocking(cell, OPERATION, move |engine| {
        let requested = list_overviews(engine, usize::MAX)
            .iter()
            .filter(|torrent| engine.save_resume_data(&torrent.info_hash) == status_code::OK)
            .count();
        let mut items = Vec::with_capacity(requested);
        while items.len() < requested {
            let polled = drain_resume(engine, timeout_ms, batch);
            if polled.is_empty() {
                break;
            }
            items.extend(polled);
        }
        items
    })
    .await?;

    let mut saved = 0;
    for item in &items {
        match store.write_fastresume(&item.info_hash, &item.payload) {
            Ok(()) => saved += 1,
            Err(err) => {
                warn!(info_hash = %item.info_hash, error = %err, "failed to persist resume data");
            }
        }
    }
    debug!(saved, "resume data flushed");
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stub::{StubControl, StubEngine};
    use crate::session::Session;
    use swarmgate_core::{AddTorrentOptions, AlertKind, SessionConfig, TorrentSource};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);
    const TICK: Duration = Duration::from_millis(10);
    const HASH: &str = "2222222222222222222222222222222222222222";

    fn stub_session() -> (Session, StubControl) {
        let config = SessionConfig::default();
        let engine = StubEngine::new(&config);
        let control = engine.control();
        (Session::from_engine(config, Box::new(engine)), control)
    }

    async fn add(session: &Session, hash: &str) -> TorrentHandle {
        session
            .add_torrent(
                TorrentSource::magnet(format!("magnet:?xt=urn:btih:{hash}")),
                AddTorrentOptions::default(),
            )
            .await
            .expect("add")
    }

    #[tokio::test]
    async fn status_stream_delivers_batches() {
        let (session, _control) = stub_session();
        let handle = add(&session, HASH).await;
        let mut stream = session.status_stream(TICK, 8).expect("stream");
        let batch = timeout(WAIT, stream.recv())
            .await
            .expect("batch within deadline")
            .expect("stream open");
        assert_eq!(batch.len(), 1);
        assert_eq!(&batch[0].info_hash, handle.info_hash());
    }

    #[tokio::test]
    async fn unknown_alerts_are_dropped() {
        let (session, control) = stub_session();
        let mut alerts = session.alert_stream(TICK, 8).expect("stream");
        control.push_alert(99, HASH, 0, "mystery");
        control.push_alert(2, HASH, 5, "disk full");
        let batch = timeout(WAIT, alerts.recv())
            .await
            .expect("batch within deadline")
            .expect("stream open");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, AlertKind::TorrentError);
        assert_eq!(batch[0].error_code, 5);
    }

    #[tokio::test]
    async fn closing_the_session_ends_streams() {
        let (mut session, control) = stub_session();
        let mut stream = session.status_stream(TICK, 4).expect("stream");
        session.close();
        let ended = timeout(WAIT, async {
            while stream.recv().await.is_some() {}
        })
        .await;
        assert!(ended.is_ok());
        stream.shutdown().await;
        assert_eq!(control.engine_frees(), 1);
    }

    #[tokio::test]
    async fn cancelled_stream_stops_delivery() {
        let (session, _control) = stub_session();
        add(&session, HASH).await;
        let mut stream = session.status_stream(TICK, 4).expect("stream");
        stream.cancel();
        assert!(stream.is_cancelled());
        assert_eq!(timeout(WAIT, stream.recv()).await.expect("closed"), None);
        stream.shutdown().await;
        assert_eq!(session.list_torrents(4).expect("session usable").len(), 1);
    }

    #[tokio::test]
    async fn torrent_stream_tracks_single_torrent() {
        let (session, control) = stub_session();
        let handle = add(&session, HASH).await;
        assert!(control.set_progress(handle.info_hash(), 0.25));
        let mut stream = handle.status_stream(TICK);
        let status = timeout(WAIT, stream.recv())
            .await
            .expect("value within deadline")
            .expect("stream open");
        assert!((status.progress - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn flush_persists_every_torrent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FastResumeStore::new(dir.path());
        store.ensure_initialized().expect("init");
        let (session, control) = stub_session();
        let first = add(&session, HASH).await;
        add(&session, "3333333333333333333333333333333333333333").await;

        let saved = session
            .flush_resume_data(&store, Duration::from_millis(100), 1)
            .await
            .expect("flush");
        assert_eq!(saved, 2);
        assert!(store
            .load(first.info_hash())
            .expect("load")
            .expect("stored")
            .fastresume
            .is_some());
        assert_eq!(control.outstanding_resume_buffers(), 0);
    }
}
