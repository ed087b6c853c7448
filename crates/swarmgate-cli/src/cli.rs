//! Argument parsing and the process entrypoint.

use std::path::PathBuf;

use clap::Parser;
use swarmgate_libt::{DEFAULT_STATUS_INTERVAL_MS, SessionConfig};
use swarmgate_telemetry::{
    DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, init_logging, log_format_from_str,
};

use crate::download;
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "swarmgate",
    version,
    about = "Download torrents from magnet links or .torrent files"
)]
pub(crate) struct Cli {
    /// Download directory; defaults to `torrent_downloads` next to the executable.
    #[arg(long, env = "SWARMGATE_DIR")]
    pub(crate) dir: Option<PathBuf>,
    /// Directory holding fastresume state; defaults to `.swarmgate` inside the download directory.
    #[arg(long, env = "SWARMGATE_RESUME_DIR")]
    pub(crate) resume_dir: Option<PathBuf>,
    /// Listen port, 0 for an ephemeral port.
    #[arg(long, env = "SWARMGATE_LISTEN_PORT", default_value_t = 0)]
    pub(crate) listen_port: u16,
    /// Session-wide download limit in bytes per second.
    #[arg(long, env = "SWARMGATE_DOWNLOAD_LIMIT")]
    pub(crate) download_limit: Option<u64>,
    /// Session-wide upload limit in bytes per second.
    #[arg(long, env = "SWARMGATE_UPLOAD_LIMIT")]
    pub(crate) upload_limit: Option<u64>,
    /// Status and alert refresh interval in milliseconds.
    #[arg(long, env = "SWARMGATE_INTERVAL_MS", default_value_t = DEFAULT_STATUS_INTERVAL_MS)]
    pub(crate) interval_ms: u64,
    #[arg(
        long = "output",
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Render status as a refreshing table or one JSON document per batch"
    )]
    pub(crate) output: OutputFormat,
    /// Also print engine alerts.
    #[arg(long)]
    pub(crate) alerts: bool,
    /// Disable DHT.
    #[arg(long)]
    pub(crate) no_dht: bool,
    /// Log output format (`json` or `pretty`).
    #[arg(long, env = "SWARMGATE_LOG_FORMAT")]
    pub(crate) log_format: Option<String>,
    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, env = "SWARMGATE_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub(crate) log_level: String,
    /// Magnet URIs or paths to .torrent files.
    pub(crate) sources: Vec<String>,
}

impl Cli {
    pub(crate) fn session_config(&self, save_path: PathBuf) -> SessionConfig {
        SessionConfig {
            listen_port: self.listen_port,
            enable_dht: !self.no_dht,
            download_rate_limit: self.download_limit,
            upload_rate_limit: self.upload_limit,
            status_interval_ms: self.interval_ms,
            ..SessionConfig::with_save_path(save_path)
        }
    }
}

/// Parse arguments, run the download loop and report failures.
/// Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let logging = LoggingConfig {
        level: &cli.log_level,
        format: log_format_from_str(cli.log_format.as_deref()).unwrap_or_else(LogFormat::infer),
        build_sha: option_env!("SWARMGATE_BUILD_SHA").unwrap_or("dev"),
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("warning: {err}");
    }

    match download::execute(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_session_config() {
        let cli = Cli::try_parse_from([
            "swarmgate",
            "--listen-port",
            "6881",
            "--download-limit",
            "1024",
            "--no-dht",
            "--interval-ms",
            "250",
            "magnet:?xt=urn:btih:abc",
        ])
        .expect("valid arguments");
        let config = cli.session_config(PathBuf::from("/tmp/downloads"));
        assert_eq!(config.listen_port, 6881);
        assert_eq!(config.download_rate_limit, Some(1024));
        assert_eq!(config.upload_rate_limit, None);
        assert!(!config.enable_dht);
        assert!(config.enable_lsd);
        assert_eq!(config.save_path, Some(PathBuf::from("/tmp/downloads")));
        assert_eq!(config.status_interval(), std::time::Duration::from_millis(250));
        assert_eq!(cli.sources.len(), 1);
    }

    #[test]
    fn output_defaults_to_table() {
        let cli = Cli::try_parse_from(["swarmgate", "a.torrent"]).expect("valid arguments");
        assert_eq!(cli.output, OutputFormat::Table);
        assert!(!cli.alerts);
    }

    #[test]
    fn json_output_is_selectable() {
        let cli = Cli::try_parse_from(["swarmgate", "--output", "json", "--alerts", "a.torrent"])
            .expect("valid arguments");
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.alerts);
    }
}
