//! mtime-aware cache for idempotent read results.
//!
//! Entries are keyed by `(operation, root-relative path)`. A lookup is a hit
//! only while the entry is younger than the TTL and the file's current mtime is
//! not newer than the mtime captured with the value. Cache failures are never
//! surfaced: anything unexpected counts as a miss.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default minimum read duration for admission.
pub const DEFAULT_MIN_READ_DURATION: Duration = Duration::from_millis(10);

/// One cached value, serializable for the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub operation: String,
    pub path: String,
    pub value: String,
    pub captured_at: SystemTime,
    pub source_mtime: SystemTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug)]
pub struct OperationCache {
    entries: HashMap<(String, String), CacheEntry>,
    ttl: Duration,
    min_read_duration: Duration,
    hits: u64,
    misses: u64,
}

impl Default for OperationCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MIN_READ_DURATION)
    }
}

impl OperationCache {
    pub fn new(ttl: Duration, min_read_duration: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            min_read_duration,
            hits: 0,
            misses: 0,
        }
    }

    /// Reads at least as slow as the threshold are worth caching.
    pub fn should_admit(&self, elapsed: Duration) -> bool {
        elapsed >= self.min_read_duration
    }

    /// Look up a value, dropping it if expired or stale against `absolute`.
    pub fn get(&mut self, operation: &str, path: &str, absolute: &Path) -> Option<String> {
        let key = (operation.to_string(), path.to_string());
        let Some(entry) = self.entries.get(&key) else {
            self.misses += 1;
            return None;
        };

        let expired = match SystemTime::now().duration_since(entry.captured_at) {
            Ok(age) => age > self.ttl,
            Err(_) => true,
        };
        let stale = match fs::metadata(absolute).and_then(|meta| meta.modified()) {
            Ok(mtime) => mtime > entry.source_mtime,
            Err(_) => true,
        };

        if expired || stale {
            debug!(operation, path, expired, stale, "cache entry dropped");
            self.entries.remove(&key);
            self.misses += 1;
            return None;
        }

        debug!(operation, path, "cache hit");
        self.hits += 1;
        Some(entry.value.clone())
    }

    /// Store a value read in `elapsed`, if it passes admission.
    ///
    /// `source_mtime` is the file's mtime observed before the read.
    pub fn set(
        &mut self,
        operation: &str,
        path: &str,
        value: String,
        source_mtime: SystemTime,
        elapsed: Duration,
    ) -> bool {
        if !self.should_admit(elapsed) {
            return false;
        }
        debug!(operation, path, elapsed_ms = elapsed.as_millis() as u64, "cache set");
        self.entries.insert(
            (operation.to_string(), path.to_string()),
            CacheEntry {
                operation: operation.to_string(),
                path: path.to_string(),
                value,
                captured_at: SystemTime::now(),
                source_mtime,
            },
        );
        true
    }

    /// Drop every entry for `path` or anything beneath it. Returns the count.
    pub fn invalidate(&mut self, path: &str) -> usize {
        let before = self.entries.len();
        if path == "." {
            self.entries.clear();
        } else {
            let prefix = format!("{path}/");
            self.entries
                .retain(|(_, entry_path), _| entry_path != path && !entry_path.starts_with(&prefix));
        }
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(path, removed, "cache invalidated");
        }
        removed
    }

    pub fn invalidate_all(&mut self) {
        debug!(removed = self.entries.len(), "cache cleared");
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }

    /// Entries sorted by key, for persistence.
    pub fn export_entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| (&a.operation, &a.path).cmp(&(&b.operation, &b.path)));
        entries
    }

    /// Load persisted entries. Freshness is checked lazily by `get`.
    pub fn import_entries(&mut self, entries: impl IntoIterator<Item = CacheEntry>) {
        for entry in entries {
            self.entries
                .insert((entry.operation.clone(), entry.path.clone()), entry);
        }
    }
}
