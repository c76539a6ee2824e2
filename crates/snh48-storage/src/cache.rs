use chrono::{DateTime, Utc};
use snh48_core::{Snapshot, SnapshotError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_CACHE_FILE: &str = "data/snh48_members.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt cache file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode cache payload for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected cache contents: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// The last fetched provider payload, kept on disk between runs.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Writes the whole envelope as pretty UTF-8 JSON through a sibling temp
    /// file, so the cache path only ever holds a complete payload.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), CacheError> {
        let payload =
            serde_json::to_string_pretty(snapshot.payload()).map_err(|source| CacheError::Encode {
                path: self.path.clone(),
                source,
            })?;
        write_atomic(&self.path, &payload)?;
        info!(
            event = "member_cache_saved",
            rows = snapshot.row_count(),
            path = %self.path.display()
        );
        Ok(())
    }

    pub fn load(&self) -> Result<Snapshot, CacheError> {
        let content =
            fs::read_to_string(&self.path).map_err(|source| io_error(&self.path, source))?;
        let payload = serde_json::from_str(&content).map_err(|source| CacheError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let saved_at = fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let snapshot = Snapshot::from_payload(payload, saved_at)?;
        info!(
            event = "member_cache_loaded",
            rows = snapshot.row_count(),
            path = %self.path.display()
        );
        Ok(snapshot)
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_FILE)
    }
}

fn io_error(path: &Path, source: io::Error) -> CacheError {
    CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_atomic(path: &Path, payload: &str) -> Result<(), CacheError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
    }

    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };

    fs::write(&temp_path, payload).map_err(|err| io_error(&temp_path, err))?;
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_error(path, err));
    }
    Ok(())
}
