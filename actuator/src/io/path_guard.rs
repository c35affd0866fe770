//! Workspace confinement and file classification.
//!
//! Every file-touching component resolves model-supplied paths here first.
//! Both the root and the candidate are canonicalized before the descendant
//! check, so symlinks and relative tricks cannot escape the root. Paths that
//! do not exist yet are resolved through their nearest existing ancestor.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::debug;

/// Bytes inspected by [`is_binary`].
pub const SNIFF_BYTES: usize = 8192;

/// Extensions that are always treated as binary.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "pdf", "zip", "gz", "tgz", "bz2",
    "xz", "7z", "rar", "tar", "jar", "exe", "dll", "so", "dylib", "o", "a", "class", "wasm",
    "pyc", "mp3", "mp4", "wav", "ogg", "mov", "avi", "woff", "woff2", "ttf", "otf", "sqlite",
    "db", "bin",
];

/// Leading signatures of common binary formats.
///
/// Each holds a control or non-ASCII byte. Formats whose signature is plain
/// ASCII (`MZ`, `GIF89a`, `%PDF-`) are left to the NUL and UTF-8 checks.
const MAGIC_NUMBERS: &[&[u8]] = &[
    b"\x89PNG\r\n\x1a\n",
    b"\xff\xd8\xff",
    b"PK\x03\x04",
    b"\x1f\x8b",
    b"\xfd7zXZ\x00",
    b"7z\xbc\xaf\x27\x1c",
    b"\x7fELF",
    b"\xca\xfe\xba\xbe",
    b"\xcf\xfa\xed\xfe",
    b"\x00asm",
    b"SQLite format 3\x00",
];

/// Whether lexical traversal checks run before canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confinement {
    /// Reject `..` segments and absolute paths outright.
    Enforced,
    /// Accept them, relying on the canonical descendant check alone.
    Relaxed,
}

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path '{0}' is outside the workspace")]
    OutsideWorkspace(String),
    #[error("cannot resolve path '{path}': {source}")]
    Unresolvable {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A path proven to sit inside the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfinedPath {
    absolute: PathBuf,
    relative: String,
}

impl ConfinedPath {
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    /// `/`-separated path relative to the root (`.` for the root itself).
    /// Used as the cache key path component.
    pub fn relative(&self) -> &str {
        &self.relative
    }
}

/// Confinement checks bound to one canonical root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    confinement: Confinement,
}

impl PathGuard {
    pub fn new(root: &Path, confinement: Confinement) -> Result<Self> {
        let root = fs::canonicalize(root)
            .with_context(|| format!("canonicalize workspace root {}", root.display()))?;
        Ok(Self { root, confinement })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, candidate: &str) -> Result<ConfinedPath, PathError> {
        resolve_canonical(&self.root, candidate, self.confinement)
    }
}

/// Resolve `candidate` against `root` with enforced confinement.
pub fn resolve(root: &Path, candidate: &str) -> Result<ConfinedPath, PathError> {
    let root = fs::canonicalize(root).map_err(|source| PathError::Unresolvable {
        path: root.display().to_string(),
        source,
    })?;
    resolve_canonical(&root, candidate, Confinement::Enforced)
}

fn resolve_canonical(
    root: &Path,
    candidate: &str,
    confinement: Confinement,
) -> Result<ConfinedPath, PathError> {
    let path = Path::new(candidate);
    if confinement == Confinement::Enforced && is_lexically_unsafe(path) {
        debug!(candidate, "rejected traversal or absolute path");
        return Err(PathError::OutsideWorkspace(candidate.to_string()));
    }

    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let absolute = canonicalize_lenient(&joined, candidate)?;
    let Ok(stripped) = absolute.strip_prefix(root) else {
        debug!(candidate, resolved = %absolute.display(), "resolved outside root");
        return Err(PathError::OutsideWorkspace(candidate.to_string()));
    };

    let parts: Vec<String> = stripped
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    let relative = if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    };
    Ok(ConfinedPath { absolute, relative })
}

fn is_lexically_unsafe(path: &Path) -> bool {
    path.is_absolute()
        || path.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        })
}

enum Tail {
    Name(OsString),
    Up,
}

/// Canonicalize `path`, resolving a missing tail lexically on top of the
/// nearest existing ancestor.
fn canonicalize_lenient(path: &Path, candidate: &str) -> Result<PathBuf, PathError> {
    let mut current = path.to_path_buf();
    let mut tail = Vec::new();

    let base = loop {
        match fs::canonicalize(&current) {
            Ok(canonical) => break canonical,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // A dangling symlink exists but cannot be canonicalized; writing
                // through it would follow a target we never checked.
                if fs::symlink_metadata(&current).is_ok() {
                    return Err(PathError::OutsideWorkspace(candidate.to_string()));
                }
                match current.components().next_back() {
                    Some(Component::Normal(name)) => tail.push(Tail::Name(name.to_owned())),
                    Some(Component::ParentDir) => tail.push(Tail::Up),
                    Some(Component::CurDir) => {}
                    _ => {
                        return Err(PathError::Unresolvable {
                            path: candidate.to_string(),
                            source: err,
                        });
                    }
                }
                current = match current.parent() {
                    Some(parent) => parent.to_path_buf(),
                    None => {
                        return Err(PathError::Unresolvable {
                            path: candidate.to_string(),
                            source: err,
                        });
                    }
                };
            }
            Err(source) => {
                return Err(PathError::Unresolvable {
                    path: candidate.to_string(),
                    source,
                });
            }
        }
    };

    let mut resolved = base;
    for part in tail.into_iter().rev() {
        match part {
            Tail::Name(name) => resolved.push(name),
            Tail::Up => {
                resolved.pop();
            }
        }
    }
    Ok(resolved)
}

/// Case-insensitive extension check. Allowlist entries may omit the dot;
/// dotfiles such as `.env` match on their name.
pub fn is_allowed_extension(path: &Path, allowlist: &[String]) -> bool {
    let Some(extension) = extension_of(path) else {
        return false;
    };
    allowlist.iter().any(|allowed| {
        allowed
            .trim()
            .trim_start_matches('.')
            .eq_ignore_ascii_case(&extension)
    })
}

fn extension_of(path: &Path) -> Option<String> {
    if let Some(ext) = path.extension() {
        return Some(ext.to_string_lossy().into_owned());
    }
    let name = path.file_name()?.to_str()?;
    name.strip_prefix('.')
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

/// True if `path` should never be handled as text.
///
/// Checks the extension table, then magic numbers in the first chunk, then a
/// NUL byte or invalid UTF-8 in that chunk.
pub fn is_binary(path: &Path) -> io::Result<bool> {
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        let ext = ext.to_ascii_lowercase();
        if BINARY_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(true);
        }
    }

    let mut chunk = Vec::with_capacity(SNIFF_BYTES);
    File::open(path)?
        .take(SNIFF_BYTES as u64)
        .read_to_end(&mut chunk)?;
    Ok(is_binary_chunk(&chunk))
}

fn is_binary_chunk(chunk: &[u8]) -> bool {
    if MAGIC_NUMBERS.iter().any(|magic| chunk.starts_with(magic)) {
        return true;
    }
    if chunk.contains(&0) {
        return true;
    }
    match std::str::from_utf8(chunk) {
        Ok(_) => false,
        // A multi-byte sequence cut by the sniff window is not evidence.
        Err(err) => !(err.error_len().is_none() && chunk.len() == SNIFF_BYTES),
    }
}
