//! Host startup.
//!
//! Before a host starts serving compile requests it may have two things to do:
//! reload the binaries of packages a previous run installed, and run a
//! configuration callback the user registered. Neither step may take the host
//! down. Each failure is logged and recorded in the [`StartupReport`] and the
//! remaining steps still run.

use async_trait::async_trait;
use std::sync::Arc;

use crate::bootstrap::BinarySource;
use crate::config::SessionOptions;
use crate::error::StartupError;
use crate::extract::PackageAssets;
use crate::session::CompilationSession;
use crate::translate::CompileResult;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Supplies binaries of packages installed by an earlier run.
#[async_trait]
pub trait StoredPackageSource: Send + Sync {
    /// `None` when there is no stored installation to restore.
    async fn stored_binaries(&self) -> Result<Option<Vec<Vec<u8>>>, BoxError>;
}

/// Consumes a compiled module together with the assets of installed packages.
pub trait ModuleLoader {
    fn load(&self, module: &[u8], assets: &PackageAssets);
}

/// Hand a successful compile result to `loader`. Returns whether it was loaded.
pub fn load_module(loader: &dyn ModuleLoader, result: &CompileResult, assets: &PackageAssets) -> bool {
    match &result.module_bytes {
        Some(module) => {
            loader.load(module, assets);
            true
        }
        None => {
            tracing::debug!(diagnostics = result.diagnostics.len(), "no module to load");
            false
        }
    }
}

type ConfigureHook = Box<dyn FnOnce(&mut SessionOptions) -> Result<(), BoxError> + Send>;

#[derive(Default)]
pub struct StartupHooks {
    configure: Option<ConfigureHook>,
}

impl StartupHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the user configuration callback. A later registration replaces
    /// an earlier one.
    pub fn on_configure<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut SessionOptions) -> Result<(), BoxError> + Send + 'static,
    {
        self.configure = Some(Box::new(hook));
        self
    }
}

#[derive(Debug, Default)]
pub struct StartupReport {
    /// Stored package binaries added to the session.
    pub restored_binaries: usize,
    pub configured: bool,
    pub errors: Vec<StartupError>,
}

impl StartupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, error: StartupError) {
        tracing::warn!(error = %error, "startup step failed");
        self.errors.push(error);
    }
}

/// Apply the configure hook, build the session and restore stored packages.
///
/// The hook edits a copy of `options`; if it fails the copy is discarded and
/// the session uses `options` as given.
pub async fn run_startup(
    options: SessionOptions,
    source: Arc<dyn BinarySource>,
    stored: Option<&dyn StoredPackageSource>,
    hooks: StartupHooks,
) -> (CompilationSession, StartupReport) {
    let mut report = StartupReport::default();

    let mut options = options;
    if let Some(configure) = hooks.configure {
        let mut candidate = options.clone();
        match configure(&mut candidate) {
            Ok(()) => {
                options = candidate;
                report.configured = true;
                tracing::info!("user configuration applied");
            }
            Err(e) => report.record(StartupError::Configure(e.to_string())),
        }
    }

    let session = CompilationSession::new(options, source);

    if let Some(stored) = stored {
        match stored.stored_binaries().await {
            Ok(Some(binaries)) if !binaries.is_empty() => {
                match restore(&session, &binaries).await {
                    Ok(added) => report.restored_binaries = added,
                    Err(e) => report.record(e),
                }
            }
            Ok(_) => tracing::debug!("no stored packages to restore"),
            Err(e) => report.record(StartupError::StoredPackages(e.to_string())),
        }
    }

    (session, report)
}

async fn restore(session: &CompilationSession, binaries: &[Vec<u8>]) -> Result<usize, StartupError> {
    session.initialize().await?;
    let added = session.add_references(binaries).await?;
    tracing::info!(added, "stored package binaries restored");
    Ok(added)
}
