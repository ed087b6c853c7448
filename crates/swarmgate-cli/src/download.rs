//! Session setup, restore from the resume store, render loop and shutdown.

use std::env;
use std::fs;
use std::future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use swarmgate_libt::{
    AddTorrentOptions, Alert, FastResumeStore, Session, StoredTorrentMetadata, StoredTorrentState,
    Subscription, TorrentSource, TorrentStatus,
};
use tracing::{info, warn};

use crate::cli::Cli;
use crate::error::{CliError, CliResult};
use crate::output::{render_alerts, render_status_batch};

const DOWNLOAD_DIR_NAME: &str = "torrent_downloads";
const RESUME_DIR_NAME: &str = ".swarmgate";
const STATUS_BATCH: usize = 64;
const ALERT_BATCH: usize = 32;
const RESUME_BATCH: usize = 16;
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const USAGE: &str = "usage: swarmgate [--dir <path>] <magnet-or-torrent> [more...]";

pub(crate) async fn execute(cli: Cli) -> CliResult<()> {
    let save_dir = match &cli.dir {
        Some(dir) => dir.clone(),
        None => default_download_dir().map_err(CliError::failure)?,
    };
    fs::create_dir_all(&save_dir)
        .with_context(|| format!("failed to create download directory {}", save_dir.display()))
        .map_err(CliError::failure)?;

    let store = FastResumeStore::new(
        cli.resume_dir
            .clone()
            .unwrap_or_else(|| save_dir.join(RESUME_DIR_NAME)),
    );
    store.ensure_initialized().map_err(CliError::failure)?;
    let stored = store.load_all().map_err(CliError::failure)?;
    if stored.is_empty() && cli.sources.is_empty() {
        return Err(CliError::validation(USAGE));
    }

    let mut session = Session::new(cli.session_config(save_dir.clone()))?;
    let restored = restore(&session, stored).await;
    if restored > 0 {
        info!(count = restored, "restored torrents from resume store");
    }
    for arg in &cli.sources {
        add_source(&session, &store, TorrentSource::from_arg(arg)).await?;
    }

    let mut updates = session.default_status_stream(STATUS_BATCH)?;
    let mut alerts = if cli.alerts {
        let interval = session.config().status_interval();
        Some(session.alert_stream(interval, ALERT_BATCH)?)
    } else {
        None
    };

    let outcome = render_until_interrupted(&cli, &save_dir, &mut updates, &mut alerts).await;

    updates.cancel();
    if let Some(alerts) = alerts.as_mut() {
        alerts.cancel();
    }
    match session
        .flush_resume_data(&store, SHUTDOWN_FLUSH_TIMEOUT, RESUME_BATCH)
        .await
    {
        Ok(saved) => info!(saved, "resume data flushed"),
        Err(err) => warn!(error = %err, "failed to flush resume data"),
    }
    session.close();
    outcome
}

async fn render_until_interrupted(
    cli: &Cli,
    save_dir: &Path,
    updates: &mut Subscription<Vec<TorrentStatus>>,
    alerts: &mut Option<Subscription<Vec<Alert>>>,
) -> CliResult<()> {
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for ctrl-c");
                }
                info!("interrupted; shutting down");
                return Ok(());
            }
            batch = updates.recv() => match batch {
                Some(batch) => render_status_batch(&batch, save_dir, cli.output)?,
                None => return Ok(()),
            },
            Some(batch) = next_alerts(alerts) => render_alerts(&batch, cli.output)?,
        }
    }
}

async fn next_alerts(alerts: &mut Option<Subscription<Vec<Alert>>>) -> Option<Vec<Alert>> {
    match alerts {
        Some(alerts) => alerts.recv().await,
        None => future::pending().await,
    }
}

/// Re-add stored torrents with their resume data. Returns how many were added.
async fn restore(session: &Session, stored: Vec<StoredTorrentState>) -> usize {
    let mut restored = 0;
    for state in stored {
        let Some(metadata) = state.metadata else {
            warn!(info_hash = %state.info_hash, "stored torrent has no metadata; skipping");
            continue;
        };
        let options = AddTorrentOptions {
            resume_data: state.fastresume,
            save_path: metadata.save_path,
        };
        match session.add_torrent(metadata.source, options).await {
            Ok(_) => restored += 1,
            Err(err) => {
                warn!(info_hash = %state.info_hash, error = %err, "failed to restore torrent");
            }
        }
    }
    restored
}

async fn add_source(
    session: &Session,
    store: &FastResumeStore,
    source: TorrentSource,
) -> CliResult<()> {
    let description = source.describe();
    let handle = session
        .add_torrent(source.clone(), AddTorrentOptions::default())
        .await
        .map_err(|err| {
            let context = format!("failed to add {description}");
            CliError::failure(anyhow::Error::new(err).context(context))
        })?;
    let metadata = StoredTorrentMetadata {
        source,
        save_path: None,
    };
    if let Err(err) = store.write_metadata(handle.info_hash(), &metadata) {
        warn!(info_hash = %handle.info_hash(), error = %err, "failed to persist torrent metadata");
    }
    Ok(())
}

fn default_download_dir() -> anyhow::Result<PathBuf> {
    let exe = env::current_exe().context("failed to locate the executable")?;
    let exe = fs::canonicalize(&exe).unwrap_or(exe);
    let parent = exe
        .parent()
        .context("executable path has no parent directory")?;
    Ok(parent.join(DOWNLOAD_DIR_NAME))
}

#[cfg(all(test, not(feature = "libtorrent")))]
mod tests {
    use super::*;
    use swarmgate_libt::{InfoHash, SessionConfig};

    const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=demo";

    #[test]
    fn default_dir_sits_next_to_executable() {
        let dir = default_download_dir().expect("executable path");
        assert!(dir.ends_with(DOWNLOAD_DIR_NAME));
    }

    #[tokio::test]
    async fn added_sources_are_recorded_and_restored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FastResumeStore::new(temp.path());
        store.ensure_initialized().expect("init");
        let info_hash =
            InfoHash::parse("0123456789abcdef0123456789abcdef01234567").expect("valid hash");

        {
            let (session, _control) =
                Session::with_stub(SessionConfig::default()).expect("session");
            add_source(&session, &store, TorrentSource::from_arg(MAGNET))
                .await
                .expect("add");
        }
        let stored = store.load_all().expect("load");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].info_hash, info_hash);

        let (session, control) = Session::with_stub(SessionConfig::default()).expect("session");
        assert_eq!(restore(&session, stored).await, 1);
        assert_eq!(control.torrent_count(), 1);
        assert!(session.find_torrent(&info_hash).expect("open").is_some());
    }

    #[tokio::test]
    async fn rejected_source_is_a_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FastResumeStore::new(temp.path());
        let (session, control) = Session::with_stub(SessionConfig::default()).expect("session");
        control.reject_next_add(2);
        let err = add_source(&session, &store, TorrentSource::from_arg(MAGNET))
            .await
            .expect_err("engine rejection");
        assert_eq!(err.exit_code(), 3);
        assert!(err.display_message().contains("code 2"));
    }
}
