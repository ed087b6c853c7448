//! Native boundary: record layouts shared with the C shim and, behind the
//! `libtorrent` feature, the raw function declarations.

pub(crate) mod records;
#[cfg(feature = "libtorrent")]
pub(crate) mod sys;

pub(crate) use records::{
    HASH_CAPACITY, MESSAGE_CAPACITY, NAME_CAPACITY, PATH_CAPACITY, RawAlert, RawFileInfo,
    RawOverview, RawResumeData, RawTorrentStatus, status_code,
};
