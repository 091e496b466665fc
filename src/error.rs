//! Error types for the compilation session and the package installer.
//!
//! Compilation diagnostics are not errors; they travel as data in
//! [`crate::CompileResult`]. Everything here is a failure of the call itself.

use thiserror::Error;

/// Errors reading a binary module image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("binary is empty")]
    Empty,

    #[error("binary does not start with the module magic")]
    BadMagic,

    #[error("unsupported module format version {0}")]
    UnsupportedVersion(u16),

    #[error("binary is truncated: expected {expected} payload bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("invalid module payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Errors fetching a platform binary by logical name.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read.
    #[error("failed to fetch '{name}': {message}")]
    Network { name: String, message: String },

    /// The endpoint answered with a non-success status.
    #[error("failed to fetch '{name}': status {status}")]
    Status { name: String, status: u16 },

    /// The source has no binary with that name.
    #[error("binary '{0}' not found")]
    NotFound(String),
}

/// Errors from [`crate::CompilationSession`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("compilation session is not initialized; call initialize() first")]
    Uninitialized,

    #[error("reference binary #{index} is empty")]
    EmptyBinary { index: usize },

    #[error("reference binary #{index} is invalid: {source}")]
    InvalidBinary {
        index: usize,
        #[source]
        source: ImageError,
    },

    #[error("bootstrap binary '{name}' is invalid: {source}")]
    InvalidBootstrapBinary {
        name: String,
        #[source]
        source: ImageError,
    },

    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] FetchError),

    #[error("duplicate file path in compile request: {0}")]
    DuplicatePath(String),

    #[error("failed to serialize module: {0}")]
    Serialize(#[from] ImageError),
}

/// Errors parsing versions and version ranges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("invalid version range '{0}'")]
    InvalidRange(String),
}

/// Errors talking to a package registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("package '{0}' not found in registry")]
    PackageNotFound(String),

    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("invalid registry response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error(transparent)]
    Version(#[from] VersionError),
}

/// Errors resolving a dependency graph.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No version in the registry satisfies the requested range.
    /// `chain` runs from the requested package down to `name`.
    #[error("no version of '{name}' satisfies {range} (dependency chain: {})", chain.join(" -> "))]
    NoMatchingVersion {
        name: String,
        range: String,
        chain: Vec<String>,
    },

    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors reading a package archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("corrupt archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("failed to read archive entry '{entry}': {source}")]
    Entry {
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive entry '{entry}' declares {declared} bytes but holds {actual}")]
    SizeMismatch {
        entry: String,
        declared: u64,
        actual: u64,
    },
}

/// Errors from [`crate::PackageInstaller`] operations.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("invalid {field}: value must not be blank")]
    InvalidArgument { field: &'static str },

    #[error("another package is currently being installed")]
    Busy,

    #[error("no package installation is pending")]
    NothingPending,

    #[error("package {name} {version} is already installed")]
    AlreadyInstalled { name: String, version: String },

    #[error("installation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("failed to download {package}: {source}")]
    Download {
        package: String,
        #[source]
        source: RegistryError,
    },

    #[error("failed to extract {package}: {source}")]
    Extract {
        package: String,
        #[source]
        source: ArchiveError,
    },
}

/// A single failed startup step.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read stored packages: {0}")]
    StoredPackages(String),

    #[error("failed to load stored package binaries: {0}")]
    LoadPackages(#[from] SessionError),

    #[error("configure hook failed: {0}")]
    Configure(String),
}
