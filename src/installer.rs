//! Package Installer
//!
//! One installation at a time moves through
//! `Idle -> Resolving -> ReadyToDownload -> Downloading -> Installed`.
//! `Installed`, `Cancelled` and `Failed` are resting states: `prepare` is
//! allowed from them exactly as from `Idle`.
//!
//! State lives behind a `parking_lot::Mutex` that is never held across an
//! await. A generation counter lets `cancel` during `Resolving` discard the
//! walk that is still in flight, and an atomic flag stops the download loop
//! between archives. Dropping a `prepare` or `download_and_install` future
//! before it finishes (a caller timeout, say) leaves the installer `Cancelled`.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::InstallerOptions;
use crate::error::InstallError;
use crate::extract::{extract_assets, ExtractFilter, PackageAssets, PlatformTag};
use crate::registry::{PackageIdentity, PackageRegistry};
use crate::version::{Version, VersionRange};
use crate::walker::{DependencyWalker, LicenseInfo, WalkResult};

/// Where the installer is in its single installation.
///
/// `Installed`, `Cancelled` and `Failed` behave exactly like `Idle` for every
/// operation: `prepare` starts a new attempt, `cancel` returns `false` and
/// `download_and_install` reports `NothingPending`. They only record how the
/// last attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InstallState {
    Idle,
    Resolving,
    ReadyToDownload,
    Downloading,
    Installed,
    Cancelled,
    Failed,
}

impl InstallState {
    /// An installation is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            InstallState::Resolving | InstallState::ReadyToDownload | InstallState::Downloading
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallState::Idle => "idle",
            InstallState::Resolving => "resolving",
            InstallState::ReadyToDownload => "readyToDownload",
            InstallState::Downloading => "downloading",
            InstallState::Installed => "installed",
            InstallState::Cancelled => "cancelled",
            InstallState::Failed => "failed",
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A package requested by the user, as opposed to one pulled in as a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    pub version: Version,
    pub target: PlatformTag,
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.target)
    }
}

#[derive(Debug)]
struct InstallerState {
    state: InstallState,
    generation: u64,
    current: Option<Package>,
    pending: Option<WalkResult>,
    installed: Vec<Package>,
}

impl InstallerState {
    fn clear_attempt(&mut self, state: InstallState) {
        self.state = state;
        self.current = None;
        self.pending = None;
    }
}

/// Rolls an attempt back to `Cancelled` if its future is dropped mid-await.
struct AttemptGuard<'a> {
    inner: &'a Mutex<InstallerState>,
    generation: u64,
    in_flight: InstallState,
    completed: bool,
}

impl<'a> AttemptGuard<'a> {
    fn new(inner: &'a Mutex<InstallerState>, generation: u64, in_flight: InstallState) -> Self {
        Self {
            inner,
            generation,
            in_flight,
            completed: false,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut inner = self.inner.lock();
        // A cancel or a newer attempt already moved the state on.
        if inner.generation != self.generation || inner.state != self.in_flight {
            return;
        }
        inner.generation += 1;
        inner.clear_attempt(InstallState::Cancelled);
        tracing::warn!(state = %self.in_flight, "package installation abandoned before completion");
    }
}

pub struct PackageInstaller {
    options: InstallerOptions,
    target: PlatformTag,
    registry: Arc<dyn PackageRegistry>,
    inner: Mutex<InstallerState>,
    cancel_requested: AtomicBool,
}

impl PackageInstaller {
    pub fn new(options: InstallerOptions, registry: Arc<dyn PackageRegistry>) -> Self {
        Self {
            target: PlatformTag::new(&options.target),
            options,
            registry,
            inner: Mutex::new(InstallerState {
                state: InstallState::Idle,
                generation: 0,
                current: None,
                pending: None,
                installed: Vec::new(),
            }),
            cancel_requested: AtomicBool::new(false),
        }
    }

    #[cfg(feature = "http")]
    pub fn with_http(options: InstallerOptions) -> Self {
        let registry = Arc::new(crate::registry::HttpRegistry::from_options(&options));
        Self::new(options, registry)
    }

    pub fn state(&self) -> InstallState {
        self.inner.lock().state
    }

    pub fn installed_packages(&self) -> Vec<Package> {
        self.inner.lock().installed.clone()
    }

    /// The package being installed, set once `prepare` succeeds.
    pub fn current_package(&self) -> Option<Package> {
        self.inner.lock().current.clone()
    }

    /// Packages the pending installation will download, in resolution order.
    pub fn pending_packages(&self) -> Vec<PackageIdentity> {
        self.inner
            .lock()
            .pending
            .as_ref()
            .map(|walk| {
                walk.packages_to_install
                    .iter()
                    .map(|node| node.identity.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn license_acceptance(&self) -> Vec<LicenseInfo> {
        self.inner
            .lock()
            .pending
            .as_ref()
            .map(|walk| walk.license_acceptance.clone())
            .unwrap_or_default()
    }

    /// Resolve `name` at `version` or later and hold the result for download.
    ///
    /// Blank arguments fail before any registry call. The returned walk carries
    /// the license acceptance list the caller should present before downloading.
    pub async fn prepare(&self, name: &str, version: &str) -> Result<WalkResult, InstallError> {
        let name = name.trim();
        let version = version.trim();
        if name.is_empty() {
            return Err(InstallError::InvalidArgument { field: "name" });
        }
        if version.is_empty() {
            return Err(InstallError::InvalidArgument { field: "version" });
        }
        let requested = Version::parse(version)?;

        let generation = {
            let mut inner = self.inner.lock();
            if inner.state.is_active() {
                return Err(InstallError::Busy);
            }
            if inner
                .installed
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(name) && p.version == requested)
            {
                return Err(InstallError::AlreadyInstalled {
                    name: name.to_string(),
                    version: requested.to_string(),
                });
            }
            inner.generation += 1;
            inner.clear_attempt(InstallState::Resolving);
            inner.generation
        };

        let mut guard = AttemptGuard::new(&self.inner, generation, InstallState::Resolving);
        tracing::info!(package = %name, version = %requested, "resolving package");
        let walker = DependencyWalker::new(self.registry.as_ref(), self.target.clone());
        let outcome = walker
            .walk(name, &VersionRange::at_least(requested.clone()))
            .await;
        guard.complete();

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            tracing::debug!(package = %name, "discarding walk of a cancelled attempt");
            return Err(InstallError::Cancelled);
        }

        match outcome {
            Ok(walk) => {
                inner.state = InstallState::ReadyToDownload;
                inner.current = Some(Package {
                    name: name.to_string(),
                    version: requested,
                    target: self.target.clone(),
                });
                inner.pending = Some(walk.clone());
                tracing::info!(
                    package = %name,
                    packages = walk.packages_to_install.len(),
                    licenses = walk.license_acceptance.len(),
                    "package ready to download"
                );
                Ok(walk)
            }
            Err(err) => {
                tracing::warn!(package = %name, error = %err, "package resolution failed");
                inner.clear_attempt(InstallState::Failed);
                Err(err.into())
            }
        }
    }

    /// Abandon the installation in flight.
    ///
    /// From `Resolving` or `ReadyToDownload` the attempt is dropped at once.
    /// From `Downloading` the archive in progress finishes and the loop stops
    /// before the next one. From any resting state this does nothing and
    /// returns `false`.
    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            InstallState::Resolving | InstallState::ReadyToDownload => {
                inner.generation += 1;
                inner.clear_attempt(InstallState::Cancelled);
                tracing::info!("package installation cancelled");
                true
            }
            InstallState::Downloading => {
                self.cancel_requested.store(true, Ordering::SeqCst);
                tracing::info!("package installation cancel requested");
                true
            }
            _ => false,
        }
    }

    /// Download and extract every pending package.
    ///
    /// All or nothing: the requested package joins the installed list only
    /// when every archive was fetched and read. The merged assets are returned
    /// for the caller to hand to the compilation session.
    pub async fn download_and_install(&self) -> Result<PackageAssets, InstallError> {
        let (packages, generation) = {
            let mut inner = self.inner.lock();
            match inner.state {
                InstallState::ReadyToDownload => {}
                InstallState::Downloading | InstallState::Resolving => {
                    return Err(InstallError::Busy)
                }
                _ => return Err(InstallError::NothingPending),
            }
            let Some(pending) = inner.pending.as_ref() else {
                return Err(InstallError::NothingPending);
            };
            let packages: Vec<PackageIdentity> = pending
                .packages_to_install
                .iter()
                .map(|node| node.identity.clone())
                .collect();
            self.cancel_requested.store(false, Ordering::SeqCst);
            inner.state = InstallState::Downloading;
            (packages, inner.generation)
        };

        let mut guard = AttemptGuard::new(&self.inner, generation, InstallState::Downloading);
        let outcome = self.fetch_assets(&packages).await;
        guard.complete();

        let mut inner = self.inner.lock();
        match outcome {
            Ok(assets) => {
                if let Some(package) = inner.current.take() {
                    tracing::info!(package = %package, files = assets.len(), "package installed");
                    inner.installed.push(package);
                }
                inner.clear_attempt(InstallState::Installed);
                Ok(assets)
            }
            Err(InstallError::Cancelled) => {
                inner.clear_attempt(InstallState::Cancelled);
                Err(InstallError::Cancelled)
            }
            Err(err) => {
                tracing::warn!(error = %err, "package installation failed");
                inner.clear_attempt(InstallState::Failed);
                Err(err)
            }
        }
    }

    async fn fetch_assets(&self, packages: &[PackageIdentity]) -> Result<PackageAssets, InstallError> {
        let filter = ExtractFilter::from_options(&self.options);
        let mut merged = PackageAssets::new();

        for identity in packages {
            if self.cancel_requested.load(Ordering::SeqCst) {
                return Err(InstallError::Cancelled);
            }

            let archive = self
                .registry
                .download(&identity.id, &identity.version)
                .await
                .map_err(|source| InstallError::Download {
                    package: identity.to_string(),
                    source,
                })?;
            let assets = extract_assets(&archive, &filter).map_err(|source| InstallError::Extract {
                package: identity.to_string(),
                source,
            })?;
            tracing::debug!(
                package = %identity,
                archive_size = archive.len(),
                files = assets.len(),
                "package archive extracted"
            );
            merged.merge(assets);
        }

        if self.cancel_requested.load(Ordering::SeqCst) {
            return Err(InstallError::Cancelled);
        }
        Ok(merged)
    }
}
