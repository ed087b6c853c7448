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
#![allow(clippy::redundant_pub_crate)]

//! Command-line torrent downloader.
//!
//! Layout:
//! - `cli.rs`: argument parsing and the `run()` entrypoint
//! - `download.rs`: session setup, restore, render loop and shutdown
//! - `error.rs`: CLI error type and exit codes
//! - `output.rs`: renderers and formatting helpers
//! - `main.rs`: thin entrypoint delegating to `run()`

pub(crate) mod cli;
pub(crate) mod download;
pub(crate) mod error;
pub(crate) mod output;

pub use cli::run;
