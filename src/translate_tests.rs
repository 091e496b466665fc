use std::cell::RefCell;

use pretty_assertions::assert_eq;

use crate::cache::ReferenceSet;
use crate::config::SessionOptions;
use crate::image::{ModuleImage, RenderOp};
use crate::translate::{compile_files, CodeFile, CompileResult, CompileStage};
use crate::validate::{
    Severity, SourceSpan, CMP_INVALID_DECLARATION, CMP_UNEXPECTED_ELEMENT, SB_MEMBER_NOT_FOUND,
    SB_NOT_FOUND, SB_SYNTAX, SB_UNUSED_FIELD,
};

const GREETING: &str = r#"<script>
    param Name: string;
    param Count: int;
</script>
<p>Hello {Name}, you have {Count} messages</p>"#;

const PAGE: &str = r#"<h1>Inbox</h1>
<Greeting name="Ada" count="3" />"#;

fn compile(files: &[CodeFile]) -> CompileResult {
    compile_files(files, &ReferenceSet::new(), &SessionOptions::default(), &|_| {}).unwrap()
}

fn codes(result: &CompileResult) -> Vec<&str> {
    result.diagnostics.iter().map(|d| d.code.as_str()).collect()
}

fn module(result: &CompileResult) -> ModuleImage {
    ModuleImage::from_bytes(result.module_bytes.as_ref().unwrap()).unwrap()
}

#[test]
fn test_component_declared_in_a_later_file_resolves() {
    let files = [
        CodeFile::new("Page.cmp", PAGE),
        CodeFile::new("Greeting.cmp", GREETING),
    ];
    let result = compile(&files);
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

    let image = module(&result);
    let page = image
        .renders
        .iter()
        .find(|r| r.component == "Sandbox.UserComponents.Page")
        .unwrap();
    let child = page
        .ops
        .iter()
        .find_map(|op| match op {
            RenderOp::Child { component, .. } => Some(component.as_str()),
            _ => None,
        })
        .unwrap();
    assert_eq!(child, "Sandbox.UserComponents.Greeting");
}

#[test]
fn test_file_order_does_not_matter() {
    let forward = compile(&[
        CodeFile::new("Greeting.cmp", GREETING),
        CodeFile::new("Page.cmp", PAGE),
    ]);
    let backward = compile(&[
        CodeFile::new("Page.cmp", PAGE),
        CodeFile::new("Greeting.cmp", GREETING),
    ]);
    assert!(forward.succeeded());
    assert!(backward.succeeded());
}

#[test]
fn test_compilation_is_deterministic() {
    let files = [
        CodeFile::new("Page.cmp", PAGE),
        CodeFile::new("Greeting.cmp", GREETING),
        CodeFile::new("Broken.cmp", "<Nowhere />"),
    ];
    let first = compile(&files);
    let second = compile(&files);
    assert_eq!(first.diagnostics, second.diagnostics);
    assert_eq!(first.module_bytes, second.module_bytes);
}

#[test]
fn test_unknown_component_is_a_warning() {
    let result = compile(&[CodeFile::new("Page.cmp", "<div>\n  <Missing label=\"x\" />\n</div>")]);
    assert_eq!(codes(&result), vec![CMP_UNEXPECTED_ELEMENT]);
    assert_eq!(result.diagnostics[0].severity, Severity::Warning);
    assert_eq!(result.diagnostics[0].file_path, "Page.cmp");
    assert_eq!(result.diagnostics[0].span.line, 2);
    assert!(result.succeeded());
}

#[test]
fn test_declaration_error_skips_the_full_pass() {
    let stages = RefCell::new(Vec::new());
    let files = [
        CodeFile::new("Bad.cmp", "<script>\n    bogus thing;\n</script><p>x</p>"),
        CodeFile::new("Page.cmp", "<Missing />"),
    ];
    let result = compile_files(&files, &ReferenceSet::new(), &SessionOptions::default(), &|stage| {
        stages.borrow_mut().push(stage)
    })
    .unwrap();

    assert_eq!(codes(&result), vec![CMP_INVALID_DECLARATION]);
    assert_eq!(result.diagnostics[0].span.line, 2);
    assert!(result.module_bytes.is_none());
    assert_eq!(*stages.borrow(), vec![CompileStage::Preparing]);
}

#[test]
fn test_declaration_emit_errors_point_at_markup() {
    let result = compile(&[CodeFile::new(
        "Card.cmp",
        "<script>\n    param Title: string;\n    param Owner: Person;\n</script>\n<h2>{Title}</h2>",
    )]);
    assert_eq!(codes(&result), vec![SB_NOT_FOUND]);
    assert_eq!(result.diagnostics[0].file_path, "Card.cmp");
    assert_eq!(result.diagnostics[0].span.line, 3);
    assert!(!result.succeeded());
}

#[test]
fn test_full_pass_errors_point_at_markup() {
    let result = compile(&[CodeFile::new("Card.cmp", "<h2>Card</h2>\n<p>{nothing}</p>")]);
    assert_eq!(codes(&result), vec![SB_MEMBER_NOT_FOUND]);
    assert_eq!(result.diagnostics[0].span, SourceSpan::new(2, 4));
    assert!(result.module_bytes.is_none());
}

#[test]
fn test_progress_reports_both_stages_in_order() {
    let stages = RefCell::new(Vec::new());
    let result = compile_files(
        &[CodeFile::new("Greeting.cmp", GREETING)],
        &ReferenceSet::new(),
        &SessionOptions::default(),
        &|stage| stages.borrow_mut().push(stage),
    )
    .unwrap();
    assert!(result.succeeded());
    assert_eq!(*stages.borrow(), vec![CompileStage::Preparing, CompileStage::Compiling]);
}

#[test]
fn test_components_use_plain_code_types() {
    let models = "namespace Sandbox.UserComponents;\nrecord Point {\n    field x: int;\n    field y: int;\n}\n";
    let marker = "<script>\n    field at: Point;\n</script>\n<span>{at.x}, {at.y}</span>";
    let result = compile(&[
        CodeFile::new("Marker.cmp", marker),
        CodeFile::new("Models.unit", models),
    ]);
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

    let image = module(&result);
    let names: Vec<String> = image.types.iter().map(|t| t.full_name()).collect();
    assert_eq!(
        names,
        vec!["Sandbox.UserComponents.Marker", "Sandbox.UserComponents.Point"]
    );
}

#[test]
fn test_plain_code_syntax_error_fails_declaration_pass() {
    let result = compile(&[
        CodeFile::new("Greeting.cmp", GREETING),
        CodeFile::new("Broken.unit", "record {"),
    ]);
    assert!(codes(&result).contains(&SB_SYNTAX));
    assert!(result.diagnostics.iter().all(|d| d.file_path == "Broken.unit"));
    assert!(result.module_bytes.is_none());
}

#[test]
fn test_warnings_do_not_block_the_module() {
    let result = compile(&[CodeFile::new(
        "Idle.cmp",
        "<script>\n    field spare: int = 1;\n</script>\n<p>idle</p>",
    )]);
    assert_eq!(codes(&result), vec![SB_UNUSED_FIELD]);
    assert_eq!(result.diagnostics[0].span.line, 2);
    assert!(result.succeeded());
}

#[test]
fn test_folders_become_namespace_segments() {
    let result = compile(&[
        CodeFile::new("Shared/Badge.cmp", "<script>param Text: string;</script><b>{Text}</b>"),
        CodeFile::new(
            "Page.cmp",
            "<script>use Sandbox.UserComponents.Shared;</script><Badge text=\"new\" />",
        ),
    ]);
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    let image = module(&result);
    assert!(image
        .types
        .iter()
        .any(|t| t.full_name() == "Sandbox.UserComponents.Shared.Badge"));
}
