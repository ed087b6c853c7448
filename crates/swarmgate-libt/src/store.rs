//! Directory-backed persistence for fastresume payloads and the metadata
//! needed to re-add a torrent on the next start.
//!
//! Each torrent owns two files named after its info-hash:
//! `<hash>.fastresume` (opaque engine bytes) and `<hash>.json`
//! ([`StoredTorrentMetadata`]). Writes go through a temporary file and a rename.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use swarmgate_core::{InfoHash, TorrentSource};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

const FASTRESUME_EXTENSION: &str = "fastresume";
const METADATA_EXTENSION: &str = "json";

/// Everything needed to add a torrent again after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTorrentMetadata {
    /// Where the torrent originally came from.
    pub source: TorrentSource,
    /// Save path requested when the torrent was added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<PathBuf>,
}

/// Persisted state for one torrent. Either half may be missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTorrentState {
    /// Torrent the files belong to.
    pub info_hash: InfoHash,
    /// Metadata sidecar, if written.
    pub metadata: Option<StoredTorrentMetadata>,
    /// Fastresume payload, if written.
    pub fastresume: Option<Vec<u8>>,
}

/// Fastresume files rooted at one directory.
#[derive(Debug, Clone)]
pub struct FastResumeStore {
    root: PathBuf,
}

impl FastResumeStore {
    /// Store rooted at `root`. Nothing is touched until the first call.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the store files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be created.
    pub fn ensure_initialized(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            operation: "ensure_initialized",
            path: self.root.clone(),
            source,
        })
    }

    fn path_for(&self, info_hash: &InfoHash, extension: &str) -> PathBuf {
        self.root.join(format!("{}.{extension}", info_hash.as_str()))
    }

    /// Persist an engine fastresume payload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the file cannot be written.
    pub fn write_fastresume(&self, info_hash: &InfoHash, payload: &[u8]) -> StoreResult<()> {
        let path = self.path_for(info_hash, FASTRESUME_EXTENSION);
        write_atomic(&path, payload).map_err(|source| StoreError::Io {
            operation: "write_fastresume",
            path,
            source,
        })?;
        debug!(info_hash = %info_hash, bytes = payload.len(), "fastresume payload written");
        Ok(())
    }

    /// Persist the metadata sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Parse`] when encoding fails and
    /// [`StoreError::Io`] when the file cannot be written.
    pub fn write_metadata(
        &self,
        info_hash: &InfoHash,
        metadata: &StoredTorrentMetadata,
    ) -> StoreResult<()> {
        let path = self.path_for(info_hash, METADATA_EXTENSION);
        let encoded = match serde_json::to_vec_pretty(metadata) {
            Ok(encoded) => encoded,
            Err(source) => {
                return Err(StoreError::Parse {
                    operation: "write_metadata",
                    path,
                    source,
                });
            }
        };
        write_atomic(&path, &encoded).map_err(|source| StoreError::Io {
            operation: "write_metadata",
            path,
            source,
        })
    }

    /// Load whatever is stored for `info_hash`; `None` when neither file exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] for unreadable files and
    /// [`StoreError::Parse`] for a corrupt metadata sidecar.
    pub fn load(&self, info_hash: &InfoHash) -> StoreResult<Option<StoredTorrentState>> {
        let fastresume = read_optional(&self.path_for(info_hash, FASTRESUME_EXTENSION), "load")?;
        let metadata_path = self.path_for(info_hash, METADATA_EXTENSION);
        let metadata = match read_optional(&metadata_path, "load")? {
            Some(bytes) => Some(serde_json::from_slice(&bytes).map_err(|source| {
                StoreError::Parse {
                    operation: "load",
                    path: metadata_path,
                    source,
                }
            })?),
            None => None,
        };
        if fastresume.is_none() && metadata.is_none() {
            return Ok(None);
        }
        Ok(Some(StoredTorrentState {
            info_hash: info_hash.clone(),
            metadata,
            fastresume,
        }))
    }

    /// Load every stored torrent, ordered by info-hash. Files whose stem is
    /// not an info-hash are ignored. A missing root yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be listed and
    /// propagates [`FastResumeStore::load`] failures.
    pub fn load_all(&self) -> StoreResult<Vec<StoredTorrentState>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    operation: "load_all",
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let mut hashes = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                operation: "load_all",
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            let known = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == FASTRESUME_EXTENSION || ext == METADATA_EXTENSION);
            if !known {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match InfoHash::parse(stem) {
                Ok(hash) => {
                    hashes.insert(hash);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "ignoring unrecognised store file");
                }
            }
        }

        let mut states = Vec::with_capacity(hashes.len());
        for hash in &hashes {
            if let Some(state) = self.load(hash)? {
                states.push(state);
            }
        }
        Ok(states)
    }

    /// Delete both files for `info_hash`. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when an existing file cannot be removed.
    pub fn remove(&self, info_hash: &InfoHash) -> StoreResult<()> {
        for extension in [FASTRESUME_EXTENSION, METADATA_EXTENSION] {
            let path = self.path_for(info_hash, extension);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StoreError::Io {
                        operation: "remove",
                        path,
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

fn read_optional(path: &Path, operation: &'static str) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)
}
