//! # Component Sandbox
//!
//! Compiles component-markup files into runnable binary modules and installs
//! third-party packages whose binaries those modules can reference.
//!
//! ## Compilation
//!
//! 1. **Session**: [`CompilationSession::initialize`] fetches the bootstrap
//!    platform binaries once and builds the base reference set.
//! 2. **Declaration pass**: every `.cmp` file becomes a declaration-only stub.
//!    The stubs and all plain `.unit` files are emitted as a throwaway module,
//!    so components can see each other regardless of file order.
//! 3. **Full pass**: component tags are resolved against base + throwaway
//!    module, full intermediate source is generated, and the final module is
//!    emitted against the base references.
//! 4. **Result**: diagnostics with positions in the original files, plus module
//!    bytes iff no diagnostic is an error.
//!
//! ## Packages
//!
//! [`PackageInstaller::prepare`] walks the dependency graph of one requested
//! package, [`PackageInstaller::download_and_install`] downloads every archive
//! and extracts the binaries built for the target platform plus static assets.
//! The caller hands the binaries to [`CompilationSession::add_references`].

mod bootstrap;
mod cache;
mod codegen;
mod component;
mod config;
mod discovery;
mod emitter;
mod error;
mod extract;
mod image;
mod installer;
mod parse;
mod registry;
mod session;
mod startup;
mod syntax;
mod translate;
mod validate;
mod version;
mod walker;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod session_tests;
#[cfg(test)]
mod translate_tests;

#[cfg(feature = "http")]
pub use bootstrap::HttpBinarySource;
pub use bootstrap::BinarySource;
pub use cache::{Reference, ReferenceSet};
pub use config::{InstallerOptions, SessionOptions};
pub use discovery::discover_files;
pub use error::{
    ArchiveError, FetchError, ImageError, InstallError, RegistryError, ResolveError,
    SessionError, StartupError, VersionError,
};
pub use extract::{extract_assets, ExtractFilter, PackageAssets, PlatformTag};
pub use image::{ModuleImage, RenderOp, RenderProgram, TypeKind, TypeMetadata};
pub use installer::{InstallState, Package, PackageInstaller};
#[cfg(feature = "http")]
pub use registry::HttpRegistry;
pub use registry::{
    DependencyGroup, PackageDependency, PackageIdentity, PackageManifest, PackageRegistry,
};
pub use session::{CompilationSession, ProgressCallback};
pub use startup::{
    load_module, run_startup, BoxError, ModuleLoader, StartupHooks, StartupReport,
    StoredPackageSource,
};
pub use translate::{CodeFile, CodeFileKind, CompileResult, CompileStage};
pub use validate::{describe_code, Diagnostic, Severity, SourceSpan};
pub use version::{Version, VersionRange};
pub use walker::{DependencyGraphNode, DependencyWalker, LicenseInfo, VersionConflict, WalkResult};
