//! File set discovery.
//!
//! Recursively scans a directory for `.cmp` and `.unit` files and loads them
//! as a compile request. Paths are made relative to the scanned directory with
//! `/` separators, so folder names become namespace segments exactly as they
//! would for files submitted by a host.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::translate::CodeFile;

const EXTENSIONS: [&str; 2] = ["cmp", "unit"];

/// Load every source file under `base_dir`, sorted by relative path.
///
/// A missing directory yields an empty set. Unreadable files are logged and skipped.
pub fn discover_files(base_dir: &Path) -> Vec<CodeFile> {
    if !base_dir.exists() {
        tracing::debug!(dir = %base_dir.display(), "source directory does not exist");
        return Vec::new();
    }

    let mut files: Vec<CodeFile> = find_source_files(base_dir)
        .into_iter()
        .filter_map(|path| {
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping unreadable source file");
                    return None;
                }
            };
            Some(CodeFile::new(relative_path(base_dir, &path), source))
        })
        .collect();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(dir = %base_dir.display(), files = files.len(), "discovered source files");
    files
}

fn find_source_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        })
        .map(|entry| entry.into_path())
        .collect()
}

fn relative_path(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
