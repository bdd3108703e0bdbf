//! Filesystem abstraction for signal evaluation.
//!
//! Evaluators never talk to the disk directly. They go through
//! [`FileSystem`], which lets the engine run against the real filesystem,
//! test mocks, or anything else that can answer stat/read/glob queries.
//! Every method is infallible by signature: a missing file, a permission
//! error or a failed walk all come back as "nothing found".

use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use log::*;
use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};
use walkdir::{DirEntry, WalkDir};

use crate::error::{DetectorError, Result};

/// Dependency, VCS and tool-cache directories never descended into during
/// glob expansion.
pub const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".hg",
    ".svn",
    "vendor",
    "target",
    "dist",
    ".venv",
    "venv",
    "__pycache__",
    "deps",
    "_build",
    "obj",
    ".next",
    "coverage",
];

/// Subset of file metadata the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
}

/// A compiled glob used to select files relative to a project root.
#[derive(Debug, Clone)]
pub struct FileSelector {
    pattern: String,
    matcher: GlobMatcher,
}

impl FileSelector {
    /// Compiles `pattern`. `*` does not cross directory separators; use
    /// `**` for that.
    pub fn new(pattern: &str) -> Result<Self> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                DetectorError::invalid_catalog(format!(
                    "invalid glob '{pattern}': {e}"
                ))
            })?;

        Ok(Self {
            pattern: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Matches a path relative to the project root.
    pub fn is_match(&self, relative: &Path) -> bool {
        self.matcher.is_match(relative)
    }

    /// Returns true when `pattern` contains glob metacharacters and so
    /// cannot be answered with a single stat.
    pub fn is_glob(pattern: &str) -> bool {
        pattern.contains(['*', '?', '[', '{'])
    }
}

/// Read-only view of a project tree.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Stat a path. `None` if it does not exist or cannot be read.
    async fn metadata(&self, path: &Path) -> Option<FileStat>;

    /// Read a file as UTF-8. `None` on any failure.
    async fn read_to_string(&self, path: &Path) -> Option<String>;

    /// Expand `selector` under `root`, returning at most `limit` files in
    /// a deterministic order. Directories deeper than `max_depth` and the
    /// entries of [`EXCLUDED_DIRS`] are skipped, symlinks are not followed.
    async fn glob(
        &self,
        root: &Path,
        selector: &FileSelector,
        max_depth: usize,
        limit: usize,
    ) -> Vec<PathBuf>;
}

/// [`FileSystem`] backed by the local disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn is_excluded(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
}

fn walk(
    root: &Path,
    selector: &FileSelector,
    max_depth: usize,
    limit: usize,
) -> Vec<PathBuf> {
    let mut found = Vec::new();

    if limit == 0 {
        return found;
    }

    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(
                    "skipping unreadable entry under {}: {e}",
                    root.display()
                );
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };

        if selector.is_match(relative) {
            found.push(entry.path().to_path_buf());
            if found.len() >= limit {
                break;
            }
        }
    }

    found
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn metadata(&self, path: &Path) -> Option<FileStat> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Some(FileStat {
                is_dir: meta.is_dir(),
                modified: meta.modified().ok(),
            }),
            Err(_) => None,
        }
    }

    async fn read_to_string(&self, path: &Path) -> Option<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Some(content),
            Err(e) => {
                debug!("failed to read {}: {e}", path.display());
                None
            }
        }
    }

    async fn glob(
        &self,
        root: &Path,
        selector: &FileSelector,
        max_depth: usize,
        limit: usize,
    ) -> Vec<PathBuf> {
        let root = root.to_path_buf();
        let selector = selector.clone();

        let result = tokio::task::spawn_blocking(move || {
            walk(&root, &selector, max_depth, limit)
        })
        .await;

        match result {
            Ok(paths) => paths,
            Err(e) => {
                debug!("glob expansion failed: {e}");
                vec![]
            }
        }
    }
}
