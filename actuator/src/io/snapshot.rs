//! Persistence of the read cache and performance ledger between runs.
//!
//! Snapshots live in the per-user cache directory, one JSON file per
//! workspace, named by a hash of the canonical workspace root. Loading never
//! fails: a missing, corrupt or foreign snapshot yields an empty one.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::ledger::{OperationMetric, PerformanceLedger};
use crate::io::cache::{CacheEntry, OperationCache};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub workspace: String,
    pub cache_entries: Vec<CacheEntry>,
    pub metrics: Vec<OperationMetric>,
}

impl Snapshot {
    pub fn empty(root: &Path) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            workspace: root.display().to_string(),
            cache_entries: Vec::new(),
            metrics: Vec::new(),
        }
    }

    pub fn capture(root: &Path, cache: &OperationCache, ledger: &PerformanceLedger) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            workspace: root.display().to_string(),
            cache_entries: cache.export_entries(),
            metrics: ledger.metrics().cloned().collect(),
        }
    }
}

/// Short stable key for a canonical workspace root.
pub fn workspace_key(root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

pub fn snapshot_path(cache_dir: &Path, root: &Path) -> PathBuf {
    cache_dir
        .join("actuator")
        .join(format!("{}.json", workspace_key(root)))
}

/// Snapshot path under the platform cache directory.
pub fn default_snapshot_path(root: &Path) -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir().ok_or_else(|| anyhow!("no per-user cache directory"))?;
    Ok(snapshot_path(&cache_dir, root))
}

pub fn load_snapshot(path: &Path, root: &Path) -> Snapshot {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            debug!(path = %path.display(), err = %err, "no snapshot loaded");
            return Snapshot::empty(root);
        }
    };
    let snapshot: Snapshot = match serde_json::from_str(&contents) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "ignoring corrupt snapshot");
            return Snapshot::empty(root);
        }
    };
    let workspace = root.display().to_string();
    if snapshot.version != SNAPSHOT_VERSION || snapshot.workspace != workspace {
        warn!(
            path = %path.display(),
            version = snapshot.version,
            workspace = %snapshot.workspace,
            "ignoring snapshot from another version or workspace"
        );
        return Snapshot::empty(root);
    }
    debug!(
        entries = snapshot.cache_entries.len(),
        metrics = snapshot.metrics.len(),
        "snapshot loaded"
    );
    snapshot
}

/// Atomically write a snapshot (temp file + rename).
pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("snapshot path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp snapshot {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace snapshot {}", path.display()))?;
    Ok(())
}
