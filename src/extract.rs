//! Package archive extraction.
//!
//! Two kinds of entries are kept: binaries under `lib/<platform>/` whose
//! platform folder matches the install target, and static assets under
//! `staticwebassets/` whatever their platform. Everything is keyed by the
//! entry's file name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read};

use crate::config::InstallerOptions;
use crate::error::ArchiveError;

const LIB_PREFIX: &str = "lib/";
const STATIC_ASSETS_PREFIX: &str = "staticwebassets/";

/// A normalized platform identifier. `net5.0`, `NET50` and `net50` are the same tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformTag(String);

impl PlatformTag {
    pub fn new(tag: &str) -> Self {
        Self(
            tag.trim()
                .chars()
                .filter(|c| *c != '.')
                .flat_map(char::to_lowercase)
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// File name to bytes, merged across every package of one installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageAssets {
    files: BTreeMap<String, Vec<u8>>,
}

impl PackageAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later inserts overwrite earlier ones with the same name.
    pub fn insert(&mut self, name: String, bytes: Vec<u8>) -> Option<Vec<u8>> {
        self.files.insert(name, bytes)
    }

    pub fn merge(&mut self, other: PackageAssets) {
        for (name, bytes) in other.files {
            if self.files.insert(name.clone(), bytes).is_some() {
                tracing::debug!(file = %name, "asset overwritten by a later package");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Binaries with the given extension, in name order.
    pub fn binaries(&self, extension: &str) -> Vec<Vec<u8>> {
        self.files
            .iter()
            .filter(|(name, _)| has_extension(name, extension))
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }
}

/// What to keep from an archive.
#[derive(Debug, Clone)]
pub struct ExtractFilter {
    pub target: PlatformTag,
    pub binary_extension: String,
    pub static_asset_extensions: Vec<String>,
}

impl ExtractFilter {
    pub fn from_options(options: &InstallerOptions) -> Self {
        Self {
            target: PlatformTag::new(&options.target),
            binary_extension: options.binary_extension.clone(),
            static_asset_extensions: options.static_asset_extensions.clone(),
        }
    }

    fn keeps(&self, path: &str) -> bool {
        if let Some(rest) = strip_prefix_ignore_case(path, LIB_PREFIX) {
            let Some((folder, file)) = rest.split_once('/') else {
                return false;
            };
            return PlatformTag::new(folder) == self.target
                && has_extension(file, &self.binary_extension);
        }
        if strip_prefix_ignore_case(path, STATIC_ASSETS_PREFIX).is_some() {
            return self
                .static_asset_extensions
                .iter()
                .any(|ext| has_extension(path, ext));
        }
        false
    }
}

fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if path.len() >= prefix.len()
        && path.is_char_boundary(prefix.len())
        && path[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&path[prefix.len()..])
    } else {
        None
    }
}

fn has_extension(path: &str, extension: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension.trim_start_matches('.')))
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Headers are untrusted; never reserve more than this up front.
const MAX_CAPACITY_HINT: u64 = 64 * 1024;

/// Extract the kept entries of one archive.
pub fn extract_assets(archive: &[u8], filter: &ExtractFilter) -> Result<PackageAssets, ArchiveError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    let mut assets = PackageAssets::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let path = entry.name().replace('\\', "/");
        if !filter.keeps(&path) {
            continue;
        }

        let declared = entry.size();
        let mut bytes = Vec::with_capacity(declared.min(MAX_CAPACITY_HINT) as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|source| ArchiveError::Entry {
                entry: path.clone(),
                source,
            })?;
        if bytes.len() as u64 != declared {
            return Err(ArchiveError::SizeMismatch {
                entry: path,
                declared,
                actual: bytes.len() as u64,
            });
        }
        tracing::debug!(entry = %path, size = bytes.len(), "extracted package entry");
        assets.insert(file_name(&path).to_string(), bytes);
    }

    Ok(assets)
}
