//! Output renderers and formatting helpers.

use std::io::{self, Write};
use std::path::Path;

use anyhow::anyhow;
use clap::ValueEnum;
use serde::Serialize;
use swarmgate_libt::{Alert, TorrentStatus};

use crate::error::{CliError, CliResult};

const RATE_UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
const CLEAR_SCREEN: &str = "\u{1b}[2J\u{1b}[H";

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct StatusDocument<'a> {
    save_path: &'a Path,
    torrents: &'a [TorrentStatus],
}

#[derive(Serialize)]
struct AlertDocument<'a> {
    alerts: &'a [Alert],
}

/// Human-readable transfer rate, e.g. `1.5 MB/s`.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn humanize_rate(bytes_per_sec: i64) -> String {
    let mut value = bytes_per_sec.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < RATE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", RATE_UNITS[unit])
}

pub(crate) fn status_line(position: usize, status: &TorrentStatus) -> String {
    format!(
        "[{position:>2}] {:>3}% down: {} up: {} peers: {} seeds: {} {}",
        status.percent_complete(),
        humanize_rate(status.download_rate),
        humanize_rate(status.upload_rate),
        status.num_peers,
        status.num_seeds,
        status.state
    )
}

pub(crate) fn alert_line(alert: &Alert) -> String {
    if alert.error_code == 0 {
        format!("[{}] {} {}", alert.info_hash.short(), alert.kind, alert.message)
    } else {
        format!(
            "[{}] {} (code {}) {}",
            alert.info_hash.short(),
            alert.kind,
            alert.error_code,
            alert.message
        )
    }
}

fn to_json<T: Serialize>(value: &T) -> CliResult<String> {
    serde_json::to_string(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))
}

fn write_out(text: &str) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|err| CliError::failure(anyhow!("failed to write output: {err}")))
}

pub(crate) fn render_status_batch(
    batch: &[TorrentStatus],
    save_path: &Path,
    format: OutputFormat,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let text = to_json(&StatusDocument {
                save_path,
                torrents: batch,
            })?;
            write_out(&format!("{text}\n"))
        }
        OutputFormat::Table => {
            let mut text = format!("{CLEAR_SCREEN}Saving to: {}\n\n", save_path.display());
            for (index, status) in batch.iter().enumerate() {
                text.push_str(&status_line(index + 1, status));
                text.push('\n');
            }
            write_out(&text)
        }
    }
}

pub(crate) fn render_alerts(alerts: &[Alert], format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let text = to_json(&AlertDocument { alerts })?;
            write_out(&format!("{text}\n"))
        }
        OutputFormat::Table => {
            for alert in alerts {
                eprintln!("alert: {}", alert_line(alert));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmgate_libt::{AlertKind, InfoHash, TorrentState};

    fn info_hash() -> InfoHash {
        InfoHash::parse("0123456789abcdef0123456789abcdef01234567").expect("valid hash")
    }

    #[test]
    fn humanize_rate_picks_units() {
        assert_eq!(humanize_rate(0), "0.0 B/s");
        assert_eq!(humanize_rate(1023), "1023.0 B/s");
        assert_eq!(humanize_rate(1536), "1.5 KB/s");
        assert_eq!(humanize_rate(5 * 1024 * 1024), "5.0 MB/s");
        assert_eq!(humanize_rate(3 * 1024 * 1024 * 1024 * 1024), "3072.0 GB/s");
        assert_eq!(humanize_rate(-5), "0.0 B/s");
    }

    #[test]
    fn status_line_shows_rates_and_state() {
        let status = TorrentStatus {
            progress: 0.426,
            download_rate: 2048,
            num_peers: 7,
            num_seeds: 2,
            state: TorrentState::Downloading,
            ..TorrentStatus::unknown(info_hash())
        };
        assert_eq!(
            status_line(1, &status),
            "[ 1]  43% down: 2.0 KB/s up: 0.0 B/s peers: 7 seeds: 2 downloading"
        );
    }

    #[test]
    fn alert_line_includes_code_when_present() {
        let alert = Alert {
            kind: AlertKind::TrackerError,
            info_hash: info_hash(),
            error_code: 110,
            message: "timed out".to_string(),
        };
        assert_eq!(alert_line(&alert), "[01234567] tracker_error (code 110) timed out");
    }

    #[test]
    fn status_document_serialises_batch() {
        let batch = vec![TorrentStatus::unknown(info_hash())];
        let text = to_json(&StatusDocument {
            save_path: Path::new("/downloads"),
            torrents: &batch,
        })
        .expect("json");
        let value: serde_json::Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(value["save_path"], "/downloads");
        assert_eq!(value["torrents"][0]["state"], "unknown");
    }
}
