use std::sync::{Arc, Mutex};

use crate::config::{InstallerOptions, SessionOptions};
use crate::error::SessionError;
use crate::installer::PackageInstaller;
use crate::session::{CompilationSession, ProgressCallback};
use crate::testing::{
    build_archive, image_bytes, init_tracing, library_bytes, MemoryBinarySource, MemoryRegistry,
};
use crate::translate::{CodeFile, CompileStage};
use crate::validate::{SB_NOT_FOUND, SB_TYPE_MISMATCH};

const CHARTS: &str = r#"
namespace Widgets.Charts;
component BarChart {
    param Title: string;
    param Bars: int;
    render { open "svg"; expr Title; close; }
}
"#;

const DASHBOARD: &str = r#"<script>
    use Widgets.Charts;
</script>
<BarChart title="Sales" bars="4" />"#;

fn source() -> Arc<MemoryBinarySource> {
    Arc::new(
        MemoryBinarySource::new()
            .with("Sandbox.Runtime", image_bytes("Sandbox.Runtime", &["Sandbox.Core"]))
            .with("Sandbox.Core", image_bytes("Sandbox.Core", &[])),
    )
}

fn session_with(source: Arc<MemoryBinarySource>) -> CompilationSession {
    init_tracing();
    CompilationSession::new(SessionOptions::default(), source)
}

async fn ready_session() -> CompilationSession {
    let session = session_with(source());
    session.initialize().await.unwrap();
    session
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let source = source();
    let session = session_with(source.clone());

    session.initialize().await.unwrap();
    let once = session.references().await;
    session.initialize().await.unwrap();

    assert_eq!(session.references().await, once);
    assert_eq!(once, vec!["Sandbox.Core", "Sandbox.Runtime"]);
    assert_eq!(source.fetch_count("Sandbox.Runtime"), 1);
    assert!(session.is_initialized().await);
}

#[tokio::test]
async fn test_failed_initialize_leaves_session_uninitialized() {
    let source = Arc::new(MemoryBinarySource::new());
    let session = session_with(source);
    assert!(matches!(session.initialize().await, Err(SessionError::Bootstrap(_))));
    assert!(!session.is_initialized().await);
}

#[tokio::test]
async fn test_operations_require_initialization() {
    let session = session_with(source());
    let files = [CodeFile::new("Page.cmp", "<p>hi</p>")];

    assert!(matches!(
        session.compile(&files, None).await,
        Err(SessionError::Uninitialized)
    ));
    assert!(matches!(
        session.add_references(&[image_bytes("X", &[])]).await,
        Err(SessionError::Uninitialized)
    ));
}

#[tokio::test]
async fn test_compile_returns_module() {
    let session = ready_session().await;
    let result = session
        .compile(&[CodeFile::new("Page.cmp", "<p>hi</p>")], None)
        .await
        .unwrap();
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    assert!(result.succeeded());
}

#[tokio::test]
async fn test_duplicate_paths_are_rejected() {
    let session = ready_session().await;
    let files = [
        CodeFile::new("Page.cmp", "<p>a</p>"),
        CodeFile::new("Page.cmp", "<p>b</p>"),
    ];
    let err = session.compile(&files, None).await.unwrap_err();
    assert!(matches!(err, SessionError::DuplicatePath(ref p) if p == "Page.cmp"));
}

#[tokio::test]
async fn test_error_diagnostic_means_no_module() {
    let session = ready_session().await;
    let result = session
        .compile(&[CodeFile::new("Page.cmp", DASHBOARD)], None)
        .await
        .unwrap();
    assert_eq!(result.diagnostics[0].code, SB_NOT_FOUND);
    assert!(result.module_bytes.is_none());
}

#[tokio::test]
async fn test_added_references_are_visible_to_later_compiles() {
    let session = ready_session().await;
    let added = session
        .add_references(&[library_bytes("Widgets.Charts", CHARTS)])
        .await
        .unwrap();
    assert_eq!(added, 1);

    let result = session
        .compile(&[CodeFile::new("Dashboard.cmp", DASHBOARD)], None)
        .await
        .unwrap();
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    assert!(result.succeeded());
}

#[tokio::test]
async fn test_static_values_are_checked_against_parameter_types() {
    let session = ready_session().await;
    session
        .add_references(&[library_bytes("Widgets.Charts", CHARTS)])
        .await
        .unwrap();

    let page = "<script>use Widgets.Charts;</script><BarChart title=\"Sales\" bars=\"many\" />";
    let result = session
        .compile(&[CodeFile::new("Dashboard.cmp", page)], None)
        .await
        .unwrap();
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].code, SB_TYPE_MISMATCH);
    assert!(!result.succeeded());
}

#[tokio::test]
async fn test_add_references_is_all_or_nothing() {
    let session = ready_session().await;
    let before = session.references().await;

    let err = session
        .add_references(&[library_bytes("Widgets.Charts", CHARTS), Vec::new()])
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::EmptyBinary { index: 1 }));

    let err = session
        .add_references(&[b"not a module".to_vec()])
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidBinary { index: 0, .. }));

    assert_eq!(session.references().await, before);
}

#[tokio::test]
async fn test_same_binary_is_added_once() {
    let session = ready_session().await;
    let charts = library_bytes("Widgets.Charts", CHARTS);
    assert_eq!(session.add_references(&[charts.clone()]).await.unwrap(), 1);
    assert_eq!(session.add_references(&[charts]).await.unwrap(), 0);
    assert_eq!(session.references().await.len(), 3);
}

#[tokio::test]
async fn test_progress_callback_panics_are_contained() {
    let session = ready_session().await;
    let seen = Mutex::new(Vec::new());
    let progress: ProgressCallback<'_> = &|stage: CompileStage| {
        seen.lock().unwrap().push(stage);
        panic!("progress listener failed");
    };

    let result = session
        .compile(&[CodeFile::new("Page.cmp", "<p>hi</p>")], Some(progress))
        .await
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![CompileStage::Preparing, CompileStage::Compiling]
    );
}

#[tokio::test]
async fn test_reset_requires_initialize_again() {
    let session = ready_session().await;
    session.reset().await;
    assert!(!session.is_initialized().await);
    assert!(session.references().await.is_empty());

    let err = session
        .compile(&[CodeFile::new("Page.cmp", "<p>hi</p>")], None)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Uninitialized));
}

#[tokio::test]
async fn test_concurrent_compiles_are_serialized() {
    let session = ready_session().await;
    let a = [CodeFile::new("A.cmp", "<p>a</p>")];
    let b = [CodeFile::new("B.cmp", "<p>b</p>")];
    let (ra, rb) = tokio::join!(session.compile(&a, None), session.compile(&b, None));
    assert!(ra.unwrap().succeeded());
    assert!(rb.unwrap().succeeded());
}

#[tokio::test]
async fn test_installed_package_binaries_feed_the_session() {
    let charts = library_bytes("Widgets.Charts", CHARTS);
    let archive = build_archive(&[
        ("lib/net5.0/Widgets.Charts.dll", charts.as_slice()),
        ("staticwebassets/charts.js", b"export {}".as_slice()),
    ]);
    let registry = Arc::new(
        MemoryRegistry::new()
            .package("Widgets.Charts", "1.2.0", &[])
            .archive("Widgets.Charts", "1.2.0", archive),
    );
    let installer = PackageInstaller::new(InstallerOptions::default(), registry);
    installer.prepare("Widgets.Charts", "1.2.0").await.unwrap();
    let assets = installer.download_and_install().await.unwrap();
    assert!(assets.contains("charts.js"));

    let session = ready_session().await;
    session.add_references(&assets.binaries("dll")).await.unwrap();
    let result = session
        .compile(&[CodeFile::new("Dashboard.cmp", DASHBOARD)], None)
        .await
        .unwrap();
    assert!(result.succeeded(), "{:?}", result.diagnostics);
}
