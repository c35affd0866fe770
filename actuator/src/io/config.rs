//! Engine configuration stored under `.actuator/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::command_guard::{CommandGuard, DEFAULT_DENYLIST, DEFAULT_INJECTION_PATTERNS};
use crate::io::file_store::{FileLimits, TextEncoding};
use crate::io::path_guard::Confinement;

/// Engine state directory under the workspace root. Plans cannot mutate it.
pub const ENGINE_DIR: &str = ".actuator";

/// Config location relative to the workspace root.
pub const CONFIG_RELATIVE_PATH: &str = ".actuator/config.toml";

/// Extensions the file store may write, append or delete.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".jsx", ".tsx", ".html", ".css", ".json", ".txt", ".md", ".yaml",
    ".yml", ".toml", ".xml", ".ini", ".cfg", ".conf", ".env",
];

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to the
/// values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Reads of files larger than this fail without loading content.
    pub max_file_bytes: u64,

    /// Reject `..` segments and absolute paths before canonicalization.
    pub confine_to_workspace: bool,

    /// Encoding every written text must round-trip through.
    pub text_encoding: TextEncoding,

    /// Case-insensitive extension allowlist for mutations.
    pub allowed_extensions: Vec<String>,

    pub cache: CacheConfig,
    pub ledger: LedgerConfig,
    pub commands: CommandsConfig,
    pub process: ProcessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are dropped on lookup.
    pub ttl_secs: u64,
    /// Reads faster than this are not cached (`0` caches every read).
    pub min_read_duration_ms: u64,
    /// Save the cache and ledger to the per-user cache dir at shutdown.
    pub persist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Operations slower than this are logged as warnings.
    pub slow_operation_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandsConfig {
    pub denylist: Vec<String>,
    pub injection_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessConfig {
    /// How long `stop` waits to reap a killed process.
    pub stop_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            confine_to_workspace: true,
            text_encoding: TextEncoding::Utf8,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            cache: CacheConfig::default(),
            ledger: LedgerConfig::default(),
            commands: CommandsConfig::default(),
            process: ProcessConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            min_read_duration_ms: 10,
            persist: false,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            slow_operation_ms: 1_000,
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            injection_patterns: DEFAULT_INJECTION_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self { stop_grace_ms: 2_000 }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_file_bytes == 0 {
            return Err(anyhow!("max_file_bytes must be > 0"));
        }
        if self.allowed_extensions.is_empty()
            || self.allowed_extensions.iter().any(|ext| ext.trim().is_empty())
        {
            return Err(anyhow!("allowed_extensions must be a non-empty array of extensions"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(anyhow!("cache.ttl_secs must be > 0"));
        }
        if self.ledger.slow_operation_ms == 0 {
            return Err(anyhow!("ledger.slow_operation_ms must be > 0"));
        }
        if self.process.stop_grace_ms == 0 {
            return Err(anyhow!("process.stop_grace_ms must be > 0"));
        }
        Ok(())
    }

    pub fn confinement(&self) -> Confinement {
        if self.confine_to_workspace {
            Confinement::Enforced
        } else {
            Confinement::Relaxed
        }
    }

    pub fn file_limits(&self) -> FileLimits {
        FileLimits {
            max_file_bytes: self.max_file_bytes,
            encoding: self.text_encoding,
            allowed_extensions: self.allowed_extensions.clone(),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn cache_min_read_duration(&self) -> Duration {
        Duration::from_millis(self.cache.min_read_duration_ms)
    }

    pub fn slow_operation(&self) -> Duration {
        Duration::from_millis(self.ledger.slow_operation_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.process.stop_grace_ms)
    }

    pub fn command_guard(&self) -> CommandGuard {
        CommandGuard::new(
            self.commands.denylist.iter().cloned(),
            self.commands.injection_patterns.iter().cloned(),
        )
    }
}

/// Path of the config file for a workspace.
pub fn config_path(workspace: &Path) -> PathBuf {
    workspace.join(CONFIG_RELATIVE_PATH)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
