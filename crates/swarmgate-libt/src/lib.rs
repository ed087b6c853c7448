#![deny(unsafe_code)]
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

//! Torrent session management over the libtorrent engine.
//!
//! Layout: `session.rs` (engine ownership and session-wide operations),
//! `torrent.rs` (non-owning per-torrent handles), `stream.rs` (polling loops
//! exposed as cancellable streams), `convert.rs` (fixed-size record
//! marshalling), `store.rs` (fastresume persistence), `engine/` (native and
//! in-memory engines), `ffi/` (C ABI records and bindings).
//!
//! Without the `libtorrent` feature the crate runs on an in-memory engine
//! driven through [`StubControl`].

mod convert;
mod engine;
mod error;
#[allow(unsafe_code)]
mod ffi;
mod session;
mod store;
mod stream;
mod torrent;

#[cfg(not(feature = "libtorrent"))]
pub use engine::stub::StubControl;
pub use error::{StoreError, StoreResult};
pub use session::Session;
pub use store::{FastResumeStore, StoredTorrentMetadata, StoredTorrentState};
pub use stream::Subscription;
pub use torrent::TorrentHandle;

pub use swarmgate_core::{
    AddTorrentOptions, Alert, AlertKind, ConfigError, DEFAULT_STATUS_INTERVAL_MS, FileInfo,
    FilePriority, InfoHash, InfoHashError, RateLimit, ResumeDataItem, SessionConfig, SessionError,
    SessionResult, TorrentOverview, TorrentSource, TorrentState, TorrentStatus,
};
