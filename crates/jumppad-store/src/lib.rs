//! State file persistence, working-set merge, and on-disk layout for Jumppad.
//!
//! This crate owns the canonical resource list on disk: `StateStore` loads the
//! JSON state document with a two-pass decode (type tag first, then the
//! kind-specific payload) and saves it atomically. `merge` combines the desired
//! resources of a run with the prior state into the working set. `JumppadLayout`
//! names every directory under the Jumppad home, and `cluster_config` writes the
//! per-cluster kubeconfig and Nomad config files.

pub mod cluster_config;
pub mod layout;
pub mod merge;
pub mod state;

pub use cluster_config::{
    read_nomad_config, remove_cluster_config, rewrite_server, write_kubeconfigs,
    write_nomad_config, KubeConfigPaths, NomadConfig,
};
pub use layout::JumppadLayout;
pub use merge::{mark_for_destroy, merge, MergeOptions, MergeOutcome};
pub use state::{Blueprint, LoadMode, StateDocument, StateStore};

use jumppad_schema::SchemaError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
///
/// POSIX does not guarantee rename durability without syncing the parent.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Write `content` to `path` through a temp file in the same directory:
/// write, fsync, rename over the target, fsync the directory.
///
/// A crash at any point leaves either the old file or the new one.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Write {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    fsync_dir(&dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("state file {} is corrupt: {reason} (remove it to start over)", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("state contains resource type '{kind}' which is not registered")]
    UnknownKind { kind: String },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}
