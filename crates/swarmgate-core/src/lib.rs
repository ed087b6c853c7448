#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Engine-agnostic torrent session types shared across the Swarmgate workspace.
//!
//! Layout: `model/` (status snapshots, alerts, file and resume records),
//! `config.rs` (session configuration and validation), `error.rs` (error taxonomy).

pub mod config;
pub mod error;
pub mod model;

pub use config::{DEFAULT_STATUS_INTERVAL_MS, SessionConfig};
pub use error::{ConfigError, ConfigResult, SessionError, SessionResult};
pub use model::{
    AddTorrentOptions, Alert, AlertKind, FileInfo, FilePriority, InfoHash, InfoHashError, RateLimit,
    ResumeDataItem, TorrentOverview, TorrentSource, TorrentState, TorrentStatus,
};
