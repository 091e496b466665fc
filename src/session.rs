//! Compilation Session
//!
//! Owns the reference set for its lifetime and serializes every operation that
//! touches it. Hosts create one session, call `initialize` once, and then submit
//! file sets to `compile` as often as they like.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bootstrap::{load_references, BinarySource};
use crate::cache::ReferenceSet;
use crate::config::SessionOptions;
use crate::error::SessionError;
use crate::image::ModuleImage;
use crate::translate::{compile_files, CodeFile, CompileResult, CompileStage};

pub type ProgressCallback<'a> = &'a (dyn Fn(CompileStage) + Sync);

pub struct CompilationSession {
    options: SessionOptions,
    source: Arc<dyn BinarySource>,
    /// `None` until `initialize` succeeds.
    context: Mutex<Option<ReferenceSet>>,
}

impl CompilationSession {
    pub fn new(options: SessionOptions, source: Arc<dyn BinarySource>) -> Self {
        Self {
            options,
            source,
            context: Mutex::new(None),
        }
    }

    /// A session that fetches bootstrap binaries from `options.static_base_url`.
    #[cfg(feature = "http")]
    pub fn with_http(options: SessionOptions) -> Self {
        let source = Arc::new(crate::bootstrap::HttpBinarySource::from_options(&options));
        Self::new(options, source)
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Fetch the bootstrap binaries and build the base reference set.
    ///
    /// Calling this again after success does nothing. On failure the session
    /// stays uninitialized.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        let mut context = self.context.lock().await;
        if context.is_some() {
            return Ok(());
        }

        let set = load_references(self.source.as_ref(), &self.options.bootstrap_binaries)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "session initialization failed"))?;

        tracing::info!(references = set.len(), "compilation session initialized");
        *context = Some(set);
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.context.lock().await.is_some()
    }

    /// Append binaries to the reference set. Every blob is validated first;
    /// if any is bad, nothing is added. Returns how many were new.
    pub async fn add_references(&self, binaries: &[Vec<u8>]) -> Result<usize, SessionError> {
        let mut context = self.context.lock().await;
        let set = context.as_mut().ok_or(SessionError::Uninitialized)?;

        let mut images = Vec::with_capacity(binaries.len());
        for (index, bytes) in binaries.iter().enumerate() {
            if bytes.is_empty() {
                return Err(SessionError::EmptyBinary { index });
            }
            let image = ModuleImage::from_bytes(bytes)
                .map_err(|err| SessionError::InvalidBinary { index, source: err })?;
            images.push(image);
        }

        let mut added = 0;
        for (bytes, image) in binaries.iter().zip(images) {
            if set.push(bytes, image) {
                added += 1;
            }
        }
        tracing::info!(added, total = set.len(), "references added");
        Ok(added)
    }

    /// Compile a file set against the current reference set.
    ///
    /// `progress` hears `preparing` before the declaration pass and `compiling`
    /// before the full pass. Diagnostics never fail the call; only misuse does.
    pub async fn compile(
        &self,
        files: &[CodeFile],
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<CompileResult, SessionError> {
        let context = self.context.lock().await;
        let base = context.as_ref().ok_or(SessionError::Uninitialized)?;

        let mut paths = HashSet::with_capacity(files.len());
        for file in files {
            if !paths.insert(file.path.as_str()) {
                return Err(SessionError::DuplicatePath(file.path.clone()));
            }
        }

        let result = compile_files(files, base, &self.options, &|stage| report(progress, stage))?;
        tracing::info!(
            files = files.len(),
            diagnostics = result.diagnostics.len(),
            succeeded = result.succeeded(),
            "compilation finished"
        );
        Ok(result)
    }

    /// Drop the reference set; the session must be initialized again.
    pub async fn reset(&self) {
        let mut context = self.context.lock().await;
        if context.take().is_some() {
            tracing::info!("compilation session reset");
        }
    }

    /// Names of the current references, in insertion order.
    pub async fn references(&self) -> Vec<String> {
        self.context
            .lock()
            .await
            .as_ref()
            .map(ReferenceSet::names)
            .unwrap_or_default()
    }
}

fn report(progress: Option<ProgressCallback<'_>>, stage: CompileStage) {
    let Some(callback) = progress else {
        return;
    };
    if catch_unwind(AssertUnwindSafe(|| callback(stage))).is_err() {
        tracing::warn!(stage = %stage, "progress callback panicked");
    }
}
