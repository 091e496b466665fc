//! In-memory fakes shared by unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::bootstrap::BinarySource;
use crate::cache::ReferenceSet;
use crate::emitter::{emit, SourceFragment};
use crate::error::{FetchError, RegistryError};
use crate::image::ModuleImage;
use crate::registry::{DependencyGroup, PackageDependency, PackageManifest, PackageRegistry};
use crate::version::{Version, VersionRange};

/// Route `tracing` output to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// An empty module image named `name` that depends on `references`.
pub fn image_bytes(name: &str, references: &[&str]) -> Vec<u8> {
    let mut image = ModuleImage::new(name);
    image.references = references.iter().map(|r| r.to_string()).collect();
    image.to_bytes().unwrap()
}

/// Compile intermediate source into a standalone library module.
pub fn library_bytes(name: &str, source: &str) -> Vec<u8> {
    let path = format!("{name}.unit");
    let result = emit(name, &[SourceFragment::new(path, source)], &ReferenceSet::new()).unwrap();
    assert!(!result.has_errors(), "{:?}", result.diagnostics);
    result.bytes.unwrap()
}

/// A zip archive holding `entries`, stored uncompressed.
pub fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (path, bytes) in entries {
        writer.start_file(*path, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

// ═══════════════════════════════════════════════════════════════════════════════
// BINARY SOURCE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryBinarySource {
    binaries: HashMap<String, Vec<u8>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemoryBinarySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.binaries.insert(name.to_string(), bytes);
        self
    }

    pub fn fetch_count(&self, name: &str) -> usize {
        self.fetches.lock().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl BinarySource for MemoryBinarySource {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, FetchError> {
        *self.fetches.lock().entry(name.to_string()).or_default() += 1;
        self.binaries
            .get(name)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(name.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

type GroupSpec<'a> = (Option<&'a str>, Vec<(&'a str, &'a str)>);

/// Registry fake. Ids are case-insensitive. A package without an explicit
/// archive downloads as one holding `lib/net5.0/<id>.dll`.
#[derive(Default)]
pub struct MemoryRegistry {
    manifests: HashMap<String, Vec<PackageManifest>>,
    archives: HashMap<(String, Version), Vec<u8>>,
    broken: Vec<String>,
    gate: Option<Arc<Semaphore>>,
    resolution_gate: Option<Arc<Semaphore>>,
    manifest_requests: Mutex<HashMap<String, usize>>,
    downloads: Mutex<HashMap<String, usize>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package(self, id: &str, version: &str, dependencies: &[(&str, &str)]) -> Self {
        self.package_with_groups(id, version, vec![(None, dependencies.to_vec())])
    }

    pub fn package_with_groups(mut self, id: &str, version: &str, groups: Vec<GroupSpec<'_>>) -> Self {
        let manifest = PackageManifest {
            id: id.to_string(),
            version: Version::parse(version).unwrap(),
            require_license_acceptance: false,
            license_url: None,
            dependency_groups: groups
                .into_iter()
                .map(|(target, deps)| DependencyGroup {
                    target: target.map(str::to_string),
                    dependencies: deps
                        .into_iter()
                        .map(|(dep, range)| PackageDependency {
                            id: dep.to_string(),
                            range: VersionRange::parse(range).unwrap(),
                        })
                        .collect(),
                })
                .collect(),
        };
        self.manifests
            .entry(id.to_ascii_lowercase())
            .or_default()
            .push(manifest);
        self
    }

    pub fn require_license(mut self, id: &str, version: &str, url: &str) -> Self {
        let version = Version::parse(version).unwrap();
        let manifest = self
            .manifests
            .get_mut(&id.to_ascii_lowercase())
            .and_then(|all| all.iter_mut().find(|m| m.version == version))
            .unwrap();
        manifest.require_license_acceptance = true;
        manifest.license_url = Some(url.to_string());
        self
    }

    pub fn archive(mut self, id: &str, version: &str, bytes: Vec<u8>) -> Self {
        self.archives
            .insert((id.to_ascii_lowercase(), Version::parse(version).unwrap()), bytes);
        self
    }

    /// Downloads of `id` fail with a server error.
    pub fn failing_download(mut self, id: &str) -> Self {
        self.broken.push(id.to_ascii_lowercase());
        self
    }

    /// Every download waits for a permit from `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Every version lookup waits for a permit from `gate`.
    pub fn gated_resolution(mut self, gate: Arc<Semaphore>) -> Self {
        self.resolution_gate = Some(gate);
        self
    }

    pub fn manifest_requests(&self, id: &str) -> usize {
        count(&self.manifest_requests, id)
    }

    pub fn downloads(&self, id: &str) -> usize {
        count(&self.downloads, id)
    }
}

fn count(counter: &Mutex<HashMap<String, usize>>, id: &str) -> usize {
    counter
        .lock()
        .get(&id.to_ascii_lowercase())
        .copied()
        .unwrap_or(0)
}

fn bump(counter: &Mutex<HashMap<String, usize>>, id: &str) {
    *counter.lock().entry(id.to_ascii_lowercase()).or_default() += 1;
}

#[async_trait]
impl PackageRegistry for MemoryRegistry {
    async fn versions(&self, id: &str) -> Result<Vec<Version>, RegistryError> {
        if let Some(gate) = &self.resolution_gate {
            let _permit = gate.acquire().await.unwrap();
        }
        self.manifests
            .get(&id.to_ascii_lowercase())
            .map(|all| all.iter().map(|m| m.version.clone()).collect())
            .ok_or_else(|| RegistryError::PackageNotFound(id.to_string()))
    }

    async fn manifest(&self, id: &str, version: &Version) -> Result<PackageManifest, RegistryError> {
        bump(&self.manifest_requests, id);
        self.manifests
            .get(&id.to_ascii_lowercase())
            .and_then(|all| all.iter().find(|m| &m.version == version))
            .cloned()
            .ok_or_else(|| RegistryError::PackageNotFound(id.to_string()))
    }

    async fn download(&self, id: &str, version: &Version) -> Result<Vec<u8>, RegistryError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        bump(&self.downloads, id);

        let key = id.to_ascii_lowercase();
        if self.broken.contains(&key) {
            return Err(RegistryError::Status {
                url: format!("memory://{key}/{version}"),
                status: 500,
            });
        }
        if let Some(bytes) = self.archives.get(&(key, version.clone())) {
            return Ok(bytes.clone());
        }
        let entry = format!("lib/net5.0/{id}.dll");
        let binary = image_bytes(id, &[]);
        Ok(build_archive(&[(entry.as_str(), binary.as_slice())]))
    }
}
