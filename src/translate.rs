//! Two-pass translation of a file set into a module.
//!
//! Components in one file may use components declared in another, so no file
//! can be translated in isolation. Pass 1 turns every component file into a
//! declaration-only stub and emits those stubs, together with the plain-code
//! files, as a throwaway module against the base references. Pass 2 resolves
//! component tags against the base references plus that module, generates
//! the full source, and emits the final module against the base references
//! alone.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::cache::ReferenceSet;
use crate::codegen::{generate_unit, CodegenMode, GeneratedUnit};
use crate::component::resolve_components;
use crate::config::SessionOptions;
use crate::emitter::{emit, SourceFragment};
use crate::error::ImageError;
use crate::parse::{parse_component, ComponentIR};
use crate::validate::{has_errors, Diagnostic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CodeFileKind {
    Component,
    PlainCode,
}

impl CodeFileKind {
    /// `.cmp` files are components; everything else is plain code.
    pub fn from_path(path: &str) -> Self {
        if path.to_ascii_lowercase().ends_with(".cmp") {
            CodeFileKind::Component
        } else {
            CodeFileKind::PlainCode
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFile {
    pub path: String,
    pub content: String,
    pub kind: CodeFileKind,
}

impl CodeFile {
    /// A file whose kind is inferred from its extension.
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            kind: CodeFileKind::from_path(&path),
            path,
            content: content.into(),
        }
    }

    pub fn component(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            kind: CodeFileKind::Component,
        }
    }

    pub fn plain(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            kind: CodeFileKind::PlainCode,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    pub diagnostics: Vec<Diagnostic>,
    /// Present iff no diagnostic is an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_bytes: Option<Vec<u8>>,
}

impl CompileResult {
    pub fn succeeded(&self) -> bool {
        self.module_bytes.is_some()
    }

    fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            diagnostics,
            module_bytes: None,
        }
    }
}

/// Stages reported to a compile progress callback, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStage {
    Preparing,
    Compiling,
}

impl CompileStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompileStage::Preparing => "preparing",
            CompileStage::Compiling => "compiling",
        }
    }
}

impl fmt::Display for CompileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run both passes over `files` against `base`.
pub fn compile_files(
    files: &[CodeFile],
    base: &ReferenceSet,
    options: &SessionOptions,
    progress: &dyn Fn(CompileStage),
) -> Result<CompileResult, ImageError> {
    let mut diagnostics = Vec::new();
    progress(CompileStage::Preparing);

    // Parse every component file once; both passes work from the same IR.
    let mut components: Vec<ComponentIR> = Vec::new();
    let mut plain: Vec<SourceFragment> = Vec::new();
    for file in files {
        match file.kind {
            CodeFileKind::Component => {
                if let Some(ir) = parse_component(
                    &file.path,
                    &file.content,
                    &options.root_namespace,
                    &mut diagnostics,
                ) {
                    components.push(ir);
                }
            }
            CodeFileKind::PlainCode => {
                plain.push(SourceFragment::new(file.path.clone(), file.content.clone()));
            }
        }
    }

    // Pass 1: declarations
    let declaration_units: Vec<(String, GeneratedUnit)> = components
        .iter()
        .map(|ir| {
            let unit = generate_unit(ir, &options.default_imports, CodegenMode::Declarations);
            (ir.path.clone(), unit)
        })
        .collect();
    let mut declaration_fragments: Vec<SourceFragment> = declaration_units
        .iter()
        .map(|(path, unit)| SourceFragment::new(path.clone(), unit.source.clone()))
        .collect();
    declaration_fragments.extend(plain.iter().cloned());

    let declarations = emit(&options.declaration_module_name(), &declaration_fragments, base)?;
    if has_errors(&diagnostics) || declarations.has_errors() {
        let declaration_maps: HashMap<String, GeneratedUnit> = declaration_units.into_iter().collect();
        diagnostics.extend(remap(declarations.diagnostics, &declaration_maps));
        tracing::debug!(
            diagnostics = diagnostics.len(),
            "declaration pass failed; skipping full pass"
        );
        return Ok(CompileResult::failed(diagnostics));
    }

    // Pass 2: full generation against base + declarations
    progress(CompileStage::Compiling);
    let mut resolution_set = base.clone();
    if let (Some(image), Some(bytes)) = (declarations.image, declarations.bytes) {
        resolution_set.push(&bytes, image);
    }
    let index = resolution_set.type_index();

    let mut generated: HashMap<String, GeneratedUnit> = HashMap::new();
    let mut fragments = Vec::with_capacity(components.len() + plain.len());
    for mut ir in components {
        diagnostics.extend(resolve_components(&mut ir, &index, &options.default_imports));
        let unit = generate_unit(&ir, &options.default_imports, CodegenMode::Full);
        fragments.push(SourceFragment::new(ir.path.clone(), unit.source.clone()));
        generated.insert(ir.path, unit);
    }
    fragments.extend(plain);

    let emitted = emit(&options.module_name, &fragments, base)?;
    diagnostics.extend(remap(emitted.diagnostics, &generated));

    tracing::debug!(
        files = files.len(),
        diagnostics = diagnostics.len(),
        succeeded = emitted.bytes.is_some(),
        "compiled file set"
    );

    Ok(CompileResult {
        diagnostics,
        module_bytes: emitted.bytes,
    })
}

/// Point emitter diagnostics for component files at markup positions.
fn remap(diagnostics: Vec<Diagnostic>, generated: &HashMap<String, GeneratedUnit>) -> Vec<Diagnostic> {
    diagnostics
        .into_iter()
        .map(|mut d| {
            if let Some(unit) = generated.get(&d.file_path) {
                d.span = unit.map_span(d.span);
            }
            d
        })
        .collect()
}
