//! Confined file operations over the workspace.
//!
//! Every operation resolves its path through [`PathGuard`] first. Mutations
//! require an allowlisted extension, validate text content, and invalidate the
//! read cache before returning.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Instant;

use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::core::types::ErrorClass;
use crate::io::cache::OperationCache;
use crate::io::config::ENGINE_DIR;
use crate::io::path_guard::{self, ConfinedPath, PathError, PathGuard};

const READ_OPERATION: &str = "read_file";

/// Encoding every text written to the workspace must fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "ascii")]
    Ascii,
}

impl TextEncoding {
    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Ascii => "ascii",
        }
    }

    fn accepts(self, text: &str) -> bool {
        match self {
            TextEncoding::Utf8 => true,
            TextEncoding::Ascii => text.is_ascii(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLimits {
    pub max_file_bytes: u64,
    pub encoding: TextEncoding,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Error)]
pub enum FileError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("not a file: {0}")]
    NotAFile(String),
    #[error("file too large: {path} is {size} bytes (limit {limit})")]
    TooLarge { path: String, size: u64, limit: u64 },
    #[error("file extension not allowed: {0}")]
    DisallowedExtension(String),
    #[error("invalid encoding for {path}: {reason}")]
    InvalidEncoding { path: String, reason: String },
    #[error("path '{0}' is outside the workspace")]
    OutsideWorkspace(String),
    #[error("path '{0}' is reserved for engine configuration")]
    Reserved(String),
    #[error("{0}")]
    Unknown(String),
}

impl FileError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FileError::NotFound(_) => ErrorClass::NotFound,
            FileError::TooLarge { .. } => ErrorClass::ResourceLimit,
            FileError::NotAFile(_)
            | FileError::DisallowedExtension(_)
            | FileError::InvalidEncoding { .. }
            | FileError::OutsideWorkspace(_)
            | FileError::Reserved(_) => ErrorClass::Validation,
            FileError::Unknown(_) => ErrorClass::Internal,
        }
    }

    fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FileError::NotFound(path.to_string()),
            _ => FileError::Unknown(format!("{path}: {err}")),
        }
    }

    fn encoding(path: &str, reason: impl Into<String>) -> Self {
        FileError::InvalidEncoding {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<PathError> for FileError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::OutsideWorkspace(path) => FileError::OutsideWorkspace(path),
            PathError::Unresolvable { path, source } => FileError::from_io(&path, source),
        }
    }
}

#[derive(Debug)]
pub struct FileStore {
    guard: PathGuard,
    cache: OperationCache,
    limits: FileLimits,
}

impl FileStore {
    pub fn new(guard: PathGuard, cache: OperationCache, limits: FileLimits) -> Self {
        Self {
            guard,
            cache,
            limits,
        }
    }

    pub fn root(&self) -> &Path {
        self.guard.root()
    }

    pub fn cache(&self) -> &OperationCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut OperationCache {
        &mut self.cache
    }

    #[instrument(skip_all, fields(path))]
    pub fn read(&mut self, path: &str) -> Result<String, FileError> {
        let confined = self.guard.resolve(path)?;
        let absolute = confined.absolute();
        let metadata = fs::metadata(absolute).map_err(|err| FileError::from_io(path, err))?;
        if !metadata.is_file() {
            return Err(FileError::NotAFile(path.to_string()));
        }
        self.check_size(path, metadata.len())?;

        if let Some(hit) = self.cache.get(READ_OPERATION, confined.relative(), absolute) {
            return Ok(hit);
        }

        let started = Instant::now();
        if path_guard::is_binary(absolute).map_err(|err| FileError::from_io(path, err))? {
            return Err(FileError::encoding(path, "binary content"));
        }

        let mut bytes = Vec::new();
        File::open(absolute)
            .and_then(|file| {
                file.take(self.limits.max_file_bytes + 1)
                    .read_to_end(&mut bytes)
            })
            .map_err(|err| FileError::from_io(path, err))?;
        self.check_size(path, bytes.len() as u64)?;

        let text = String::from_utf8(bytes)
            .map_err(|_| FileError::encoding(path, "content is not valid utf-8"))?;
        if !self.limits.encoding.accepts(&text) {
            return Err(FileError::encoding(
                path,
                format!("content is not {}", self.limits.encoding.label()),
            ));
        }

        if let Ok(mtime) = metadata.modified() {
            self.cache.set(
                READ_OPERATION,
                confined.relative(),
                text.clone(),
                mtime,
                started.elapsed(),
            );
        }
        Ok(text)
    }

    /// Create or replace a file, creating missing parent directories.
    #[instrument(skip_all, fields(path, bytes = content.len()))]
    pub fn write(&mut self, path: &str, content: &str) -> Result<(), FileError> {
        let confined = self.resolve_mutable(path)?;
        self.check_text(path, content)?;
        self.check_size(path, content.len() as u64)?;
        let absolute = confined.absolute();
        if absolute.is_dir() {
            return Err(FileError::NotAFile(path.to_string()));
        }

        create_parent(path, absolute)?;
        fs::write(absolute, content).map_err(|err| FileError::from_io(path, err))?;
        self.cache.invalidate(confined.relative());
        Ok(())
    }

    /// Append to a text file, creating it if missing.
    #[instrument(skip_all, fields(path, bytes = content.len()))]
    pub fn append(&mut self, path: &str, content: &str) -> Result<(), FileError> {
        let confined = self.resolve_mutable(path)?;
        self.check_text(path, content)?;
        let absolute = confined.absolute();

        let existing = match fs::metadata(absolute) {
            Ok(metadata) if !metadata.is_file() => {
                return Err(FileError::NotAFile(path.to_string()));
            }
            Ok(metadata) => {
                if path_guard::is_binary(absolute).map_err(|err| FileError::from_io(path, err))? {
                    return Err(FileError::encoding(path, "refusing to append to binary file"));
                }
                metadata.len()
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
            Err(err) => return Err(FileError::from_io(path, err)),
        };
        self.check_size(path, existing + content.len() as u64)?;

        create_parent(path, absolute)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(absolute)
            .and_then(|mut file| file.write_all(content.as_bytes()))
            .map_err(|err| FileError::from_io(path, err))?;
        self.cache.invalidate(confined.relative());
        Ok(())
    }

    /// Remove a file. Directories are refused.
    #[instrument(skip_all, fields(path))]
    pub fn delete(&mut self, path: &str) -> Result<(), FileError> {
        let confined = self.resolve_mutable(path)?;
        let absolute = confined.absolute();
        let metadata =
            fs::symlink_metadata(absolute).map_err(|err| FileError::from_io(path, err))?;
        if !metadata.is_file() {
            return Err(FileError::NotAFile(path.to_string()));
        }
        fs::remove_file(absolute).map_err(|err| FileError::from_io(path, err))?;
        self.cache.invalidate(confined.relative());
        Ok(())
    }

    /// Create a directory and any missing parents.
    #[instrument(skip_all, fields(path))]
    pub fn create_dir(&mut self, path: &str) -> Result<(), FileError> {
        let confined = self.resolve_unreserved(path)?;
        let absolute = confined.absolute();
        if absolute.is_file() {
            return Err(FileError::Unknown(format!(
                "{path}: a file with this name already exists"
            )));
        }
        fs::create_dir_all(absolute).map_err(|err| FileError::from_io(path, err))?;
        self.cache.invalidate(confined.relative());
        Ok(())
    }

    /// Root-relative files matching `pattern`, sorted.
    ///
    /// `*` stays within one path segment; `**/` spans directories. `.git` is
    /// never descended into.
    #[instrument(skip_all, fields(pattern))]
    pub fn list(&self, pattern: &str) -> Result<Vec<String>, FileError> {
        let pattern = pattern.trim();
        if pattern.starts_with('/')
            || pattern.starts_with('\\')
            || Path::new(pattern).is_absolute()
            || pattern.split(['/', '\\']).any(|segment| segment == "..")
        {
            return Err(FileError::OutsideWorkspace(pattern.to_string()));
        }
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|err| FileError::Unknown(format!("invalid pattern '{pattern}': {err}")))?
            .compile_matcher();

        let root = self.guard.root();
        let mut matches = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git");
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if matcher.is_match(&relative) {
                matches.push(relative);
            }
        }
        matches.sort();
        Ok(matches)
    }

    fn resolve_mutable(&self, path: &str) -> Result<ConfinedPath, FileError> {
        let confined = self.resolve_unreserved(path)?;
        if !path_guard::is_allowed_extension(confined.absolute(), &self.limits.allowed_extensions)
        {
            return Err(FileError::DisallowedExtension(path.to_string()));
        }
        Ok(confined)
    }

    fn resolve_unreserved(&self, path: &str) -> Result<ConfinedPath, FileError> {
        let confined = self.guard.resolve(path)?;
        if is_reserved(confined.relative()) {
            return Err(FileError::Reserved(path.to_string()));
        }
        Ok(confined)
    }

    fn check_text(&self, path: &str, content: &str) -> Result<(), FileError> {
        if content.contains('\0') {
            return Err(FileError::encoding(path, "content contains NUL bytes"));
        }
        if !self.limits.encoding.accepts(content) {
            return Err(FileError::encoding(
                path,
                format!("content cannot be encoded as {}", self.limits.encoding.label()),
            ));
        }
        Ok(())
    }

    fn check_size(&self, path: &str, size: u64) -> Result<(), FileError> {
        if size > self.limits.max_file_bytes {
            return Err(FileError::TooLarge {
                path: path.to_string(),
                size,
                limit: self.limits.max_file_bytes,
            });
        }
        Ok(())
    }
}

/// Whether a root-relative path lies in the engine state directory.
fn is_reserved(relative: &str) -> bool {
    relative
        .split('/')
        .next()
        .is_some_and(|first| first.eq_ignore_ascii_case(ENGINE_DIR))
}

fn create_parent(path: &str, absolute: &Path) -> Result<(), FileError> {
    if let Some(parent) = absolute.parent() {
        fs::create_dir_all(parent).map_err(|err| FileError::from_io(path, err))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::io::config::EngineConfig;
    use crate::io::path_guard::Confinement;

    fn store_with(root: &Path, limits: FileLimits) -> FileStore {
        let guard = PathGuard::new(root, Confinement::Enforced).expect("guard");
        FileStore::new(
            guard,
            OperationCache::new(Duration::from_secs(300), Duration::ZERO),
            limits,
        )
    }

    fn store(root: &Path) -> FileStore {
        store_with(root, EngineConfig::default().file_limits())
    }

    #[test]
    fn write_then_read_after_cached_read() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut files = store(temp.path());

        files.write("a.txt", "first").expect("write");
        assert_eq!(files.read("a.txt").expect("read"), "first");
        files.write("a.txt", "hello").expect("write");
        assert_eq!(files.read("a.txt").expect("read"), "hello");
    }

    #[test]
    fn second_read_is_a_cache_hit() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("notes.md"), "# notes\n").expect("seed");
        let mut files = store(temp.path());

        let first = files.read("notes.md").expect("read");
        let second = files.read("notes.md").expect("read");
        assert_eq!(first, second);
        assert_eq!(files.cache().stats().hits, 1);
    }

    #[test]
    fn write_creates_parent_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut files = store(temp.path());
        files.write("src/pkg/mod.py", "x = 1\n").expect("write");
        assert!(temp.path().join("src/pkg/mod.py").is_file());
    }

    #[test]
    fn oversize_read_fails_before_loading() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("big.txt"), "0123456789").expect("seed");
        let mut limits = EngineConfig::default().file_limits();
        limits.max_file_bytes = 4;
        let mut files = store_with(temp.path(), limits);

        let err = files.read("big.txt").unwrap_err();
        assert!(matches!(err, FileError::TooLarge { size: 10, limit: 4, .. }));
        assert_eq!(err.class(), ErrorClass::ResourceLimit);
    }

    #[test]
    fn mutations_require_allowed_extension() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("run.sh"), "echo hi\n").expect("seed");
        let mut files = store(temp.path());

        assert!(matches!(
            files.write("run.sh", "x"),
            Err(FileError::DisallowedExtension(_))
        ));
        assert!(matches!(
            files.delete("run.sh"),
            Err(FileError::DisallowedExtension(_))
        ));
        assert_eq!(files.read("run.sh").expect("read"), "echo hi\n");
    }

    #[test]
    fn binary_files_are_never_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("data.txt"), b"ab\0cd").expect("seed");
        let mut files = store(temp.path());

        assert!(matches!(
            files.read("data.txt"),
            Err(FileError::InvalidEncoding { .. })
        ));
        assert!(matches!(
            files.append("data.txt", "more"),
            Err(FileError::InvalidEncoding { .. })
        ));
        assert_eq!(fs::read(temp.path().join("data.txt")).expect("raw"), b"ab\0cd");
    }

    #[test]
    fn content_must_fit_encoding() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut limits = EngineConfig::default().file_limits();
        limits.encoding = TextEncoding::Ascii;
        let mut files = store_with(temp.path(), limits);

        assert!(matches!(
            files.write("a.txt", "café"),
            Err(FileError::InvalidEncoding { .. })
        ));
        assert!(matches!(
            files.write("a.txt", "nul\0"),
            Err(FileError::InvalidEncoding { .. })
        ));
        files.write("a.txt", "plain").expect("ascii write");
    }

    #[test]
    fn append_creates_and_extends() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut files = store(temp.path());
        files.append("log.txt", "one\n").expect("append");
        files.append("log.txt", "two\n").expect("append");
        assert_eq!(files.read("log.txt").expect("read"), "one\ntwo\n");
    }

    #[test]
    fn delete_refuses_directories_and_reports_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("dir.txt")).expect("mkdir");
        let mut files = store(temp.path());

        assert!(matches!(files.delete("dir.txt"), Err(FileError::NotAFile(_))));
        let missing = files.delete("gone.txt").unwrap_err();
        assert!(matches!(missing, FileError::NotFound(_)));
        assert_eq!(missing.class(), ErrorClass::NotFound);
    }

    #[test]
    fn traversal_maps_to_outside_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut files = store(temp.path());
        let err = files.read("../etc/passwd").unwrap_err();
        assert!(matches!(err, FileError::OutsideWorkspace(_)));
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[test]
    fn engine_directory_is_read_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join(".actuator")).expect("mkdir");
        fs::write(temp.path().join(".actuator/config.toml"), "max_file_bytes = 1\n")
            .expect("seed");
        let mut files = store(temp.path());

        for err in [
            files.write(".actuator/config.toml", "").unwrap_err(),
            files.append(".actuator/config.toml", "x").unwrap_err(),
            files.delete(".actuator/config.toml").unwrap_err(),
            files.create_dir(".actuator/extra").unwrap_err(),
            files.create_dir(".actuator").unwrap_err(),
            files.write(".Actuator/config.toml", "").unwrap_err(),
            files.write("docs/../.actuator/config.toml", "").unwrap_err(),
        ] {
            assert!(
                matches!(err, FileError::Reserved(_) | FileError::OutsideWorkspace(_)),
                "unexpected error {err:?}"
            );
        }
        assert_eq!(
            fs::read_to_string(temp.path().join(".actuator/config.toml")).expect("read"),
            "max_file_bytes = 1\n"
        );
        assert!(files.read(".actuator/config.toml").is_ok());
        assert!(files.write("actuator.toml", "").is_ok());
    }

    #[test]
    fn list_matches_segments_and_skips_git() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut files = store(temp.path());
        for path in ["b.py", "a.py", "pkg/c.py", "pkg/d.txt"] {
            files.write(path, "").expect("write");
        }
        fs::create_dir_all(temp.path().join(".git")).expect("mkdir");
        fs::write(temp.path().join(".git/hook.py"), "").expect("seed");

        assert_eq!(
            files.list("**/*.py").expect("list"),
            vec!["a.py", "b.py", "pkg/c.py"]
        );
        assert_eq!(files.list("*.py").expect("list"), vec!["a.py", "b.py"]);
        assert!(matches!(
            files.list("../*.py"),
            Err(FileError::OutsideWorkspace(_))
        ));
        assert!(matches!(
            files.list("/etc/*"),
            Err(FileError::OutsideWorkspace(_))
        ));
    }

    #[test]
    fn create_dir_is_nested_and_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut files = store(temp.path());
        files.create_dir("a/b/c").expect("mkdir");
        files.create_dir("a/b/c").expect("mkdir again");
        assert!(temp.path().join("a/b/c").is_dir());
    }
}
