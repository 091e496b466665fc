//! Binary Emitter
//!
//! Parses intermediate-source fragments, links them against a reference set and,
//! when nothing is wrong, serializes the result as a module image.

use std::collections::{HashMap, HashSet};

use crate::cache::{ReferenceSet, TypeIndex};
use crate::error::ImageError;
use crate::image::{
    is_builtin_type, qualify, MemberMetadata, ModuleImage, RenderOp, RenderProgram, TypeMetadata,
    Value,
};
use crate::syntax::{parse_unit, MemberDecl, Stmt, StmtKind, SyntaxUnit, TypeDecl};
use crate::validate::{
    Diagnostic, Severity, SourceSpan, SB_DUPLICATE_MEMBER, SB_DUPLICATE_TYPE,
    SB_MEMBER_NOT_FOUND, SB_NOT_A_COMPONENT, SB_NOT_FOUND, SB_TYPE_MISMATCH,
    SB_UNBALANCED_ELEMENT, SB_UNNECESSARY_USE, SB_UNUSED_FIELD,
};

/// Base chains longer than this are treated as circular.
const MAX_BASE_DEPTH: usize = 64;

/// One intermediate-source text tagged with the file it came from.
#[derive(Debug, Clone)]
pub struct SourceFragment {
    pub file_path: String,
    pub source: String,
}

impl SourceFragment {
    pub fn new(file_path: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmitResult {
    /// Diagnostics above `Info`, in fragment order.
    pub diagnostics: Vec<Diagnostic>,
    /// Present iff no diagnostic is an error.
    pub image: Option<ModuleImage>,
    pub bytes: Option<Vec<u8>>,
}

impl EmitResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Emit `fragments` as a module named `module_name`, linked against `references`.
pub fn emit(
    module_name: &str,
    fragments: &[SourceFragment],
    references: &ReferenceSet,
) -> Result<EmitResult, ImageError> {
    let mut diagnostics = Vec::new();
    let units: Vec<SyntaxUnit> = fragments
        .iter()
        .map(|fragment| {
            let (unit, diags) = parse_unit(&fragment.source, &fragment.file_path);
            diagnostics.extend(diags);
            unit
        })
        .collect();

    let mut linker = Linker {
        index: references.type_index(),
        diagnostics,
    };
    let types = linker.link(&units);

    let diagnostics: Vec<Diagnostic> = linker
        .diagnostics
        .into_iter()
        .filter(|d| d.severity > Severity::Info)
        .collect();

    if diagnostics.iter().any(Diagnostic::is_error) {
        tracing::debug!(
            module = %module_name,
            errors = diagnostics.iter().filter(|d| d.is_error()).count(),
            "emit failed"
        );
        return Ok(EmitResult {
            diagnostics,
            image: None,
            bytes: None,
        });
    }

    let mut image = ModuleImage::new(module_name);
    image.references = references.names();
    for (metadata, render) in types {
        if let Some(ops) = render {
            image.renders.push(RenderProgram {
                component: metadata.full_name(),
                ops,
            });
        }
        image.types.push(metadata);
    }
    let bytes = image.to_bytes()?;

    tracing::debug!(
        module = %module_name,
        types = image.types.len(),
        size = bytes.len(),
        "emitted module"
    );

    Ok(EmitResult {
        diagnostics,
        image: Some(image),
        bytes: Some(bytes),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// LINKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Lookup scope of one unit.
struct Scope<'u> {
    file_path: &'u str,
    namespace: &'u str,
    imports: Vec<String>,
    used_imports: HashSet<String>,
}

struct Linker {
    index: TypeIndex,
    diagnostics: Vec<Diagnostic>,
}

impl Linker {
    fn error(&mut self, code: &str, message: String, file_path: &str, span: SourceSpan) {
        self.diagnostics
            .push(Diagnostic::error(code, message, file_path, span));
    }

    /// Link every unit. Returns each declared type with its render program, in order.
    fn link(&mut self, units: &[SyntaxUnit]) -> Vec<(TypeMetadata, Option<Vec<RenderOp>>)> {
        // Declare: every local type enters the index before anything is resolved.
        let mut declared: Vec<(usize, &TypeDecl)> = Vec::new();
        for (unit_idx, unit) in units.iter().enumerate() {
            for decl in &unit.types {
                let metadata = TypeMetadata {
                    namespace: unit.namespace_name().to_string(),
                    name: decl.name.clone(),
                    kind: decl.kind,
                    base: None,
                    params: Vec::new(),
                    fields: Vec::new(),
                };
                let full_name = metadata.full_name();
                if self.index.insert(metadata) {
                    declared.push((unit_idx, decl));
                } else {
                    self.error(
                        SB_DUPLICATE_TYPE,
                        format!("the namespace already contains a definition for '{}'", full_name),
                        &unit.file_path,
                        decl.span,
                    );
                }
            }
        }

        let mut scopes: Vec<Scope> = units
            .iter()
            .map(|unit| Scope {
                file_path: &unit.file_path,
                namespace: unit.namespace_name(),
                imports: unit.imports(),
                used_imports: HashSet::new(),
            })
            .collect();

        for (unit, scope) in units.iter().zip(scopes.iter()) {
            for import in &unit.uses {
                if !self.index.has_namespace(&import.value) {
                    self.error(
                        SB_NOT_FOUND,
                        format!("the namespace '{}' could not be found", import.value),
                        scope.file_path,
                        import.span,
                    );
                }
            }
        }

        // Resolve signatures, then rebuild the index with full member types.
        let mut resolved = Vec::with_capacity(declared.len());
        for (unit_idx, decl) in &declared {
            let metadata = self.resolve_signature(decl, &mut scopes[*unit_idx]);
            resolved.push(metadata);
        }
        for metadata in &resolved {
            self.index.replace(metadata.clone());
        }
        for ((unit_idx, decl), metadata) in declared.iter().zip(resolved.iter()) {
            self.check_base_chain(decl, metadata, scopes[*unit_idx].file_path);
        }

        // Bodies
        let mut output = Vec::with_capacity(declared.len());
        for ((unit_idx, decl), metadata) in declared.iter().zip(resolved) {
            let render = decl
                .render
                .as_ref()
                .map(|body| self.link_render(decl, &metadata, body, &mut scopes[*unit_idx]));
            output.push((metadata, render));
        }

        for (unit, scope) in units.iter().zip(scopes.iter()) {
            for import in &unit.uses {
                if !scope.used_imports.contains(&import.value) {
                    self.diagnostics.push(Diagnostic::new(
                        SB_UNNECESSARY_USE,
                        Severity::Info,
                        format!("unnecessary use of '{}'", import.value),
                        scope.file_path,
                        import.span,
                    ));
                }
            }
        }

        output
    }

    fn resolve_type(&self, name: &str, scope: &mut Scope) -> Option<TypeMetadata> {
        let found = self
            .index
            .resolve(name, scope.namespace, &scope.imports)?
            .clone();
        if scope.imports.iter().any(|i| *i == found.namespace) {
            scope.used_imports.insert(found.namespace.clone());
        }
        Some(found)
    }

    fn resolve_signature(&mut self, decl: &TypeDecl, scope: &mut Scope) -> TypeMetadata {
        let mut metadata = TypeMetadata {
            namespace: scope.namespace.to_string(),
            name: decl.name.clone(),
            kind: decl.kind,
            base: None,
            params: Vec::new(),
            fields: Vec::new(),
        };

        if let Some(base) = &decl.base {
            match self.resolve_type(&base.value, scope) {
                Some(base_ty) if base_ty.kind == decl.kind => {
                    metadata.base = Some(base_ty.full_name());
                }
                Some(base_ty) => self.error(
                    SB_NOT_A_COMPONENT,
                    format!(
                        "'{}' cannot derive from '{}'",
                        decl.name,
                        base_ty.full_name()
                    ),
                    scope.file_path,
                    base.span,
                ),
                None => self.error(
                    SB_NOT_FOUND,
                    format!("the type '{}' could not be found", base.value),
                    scope.file_path,
                    base.span,
                ),
            }
        }

        let mut seen = HashSet::new();
        for (is_param, member) in decl
            .params
            .iter()
            .map(|m| (true, m))
            .chain(decl.fields.iter().map(|m| (false, m)))
        {
            if !seen.insert(member.name.as_str()) {
                self.error(
                    SB_DUPLICATE_MEMBER,
                    format!("'{}' already defines a member called '{}'", decl.name, member.name),
                    scope.file_path,
                    member.span,
                );
                continue;
            }
            let resolved = self.resolve_member(member, scope);
            if is_param {
                metadata.params.push(resolved);
            } else {
                metadata.fields.push(resolved);
            }
        }

        metadata
    }

    fn resolve_member(&mut self, member: &MemberDecl, scope: &mut Scope) -> MemberMetadata {
        let ty = if is_builtin_type(&member.ty.value) {
            member.ty.value.clone()
        } else {
            match self.resolve_type(&member.ty.value, scope) {
                Some(found) => found.full_name(),
                None => {
                    self.error(
                        SB_NOT_FOUND,
                        format!("the type '{}' could not be found", member.ty.value),
                        scope.file_path,
                        member.ty.span,
                    );
                    member.ty.value.clone()
                }
            }
        };

        if let Some(default) = &member.default {
            match default.literal_type() {
                Some(literal) if literal == ty => {}
                Some(literal) => self.error(
                    SB_TYPE_MISMATCH,
                    format!("cannot convert {} to '{}' for '{}'", literal, ty, member.name),
                    scope.file_path,
                    member.span,
                ),
                None => self.error(
                    SB_TYPE_MISMATCH,
                    format!("initializer of '{}' must be a literal", member.name),
                    scope.file_path,
                    member.span,
                ),
            }
        }

        MemberMetadata {
            name: member.name.clone(),
            ty,
            default: member.default.clone(),
        }
    }

    fn check_base_chain(&mut self, decl: &TypeDecl, metadata: &TypeMetadata, file_path: &str) {
        let mut seen = HashSet::new();
        seen.insert(metadata.full_name());
        let mut next = metadata.base.clone();
        while let Some(base) = next {
            if !seen.insert(base.clone()) || seen.len() > MAX_BASE_DEPTH {
                let span = decl.base.as_ref().map(|b| b.span).unwrap_or(decl.span);
                self.error(
                    SB_NOT_A_COMPONENT,
                    format!("circular base dependency involving '{}'", metadata.full_name()),
                    file_path,
                    span,
                );
                return;
            }
            next = self.index.get(&base).and_then(|ty| ty.base.clone());
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Member lookup
    // ───────────────────────────────────────────────────────────────────────────

    /// Find a member on `owner` or one of its bases.
    fn find_member(&self, owner: &TypeMetadata, name: &str, params_only: bool) -> Option<MemberMetadata> {
        let mut current = Some(owner.clone());
        let mut depth = 0;
        while let Some(ty) = current {
            let found = if params_only {
                ty.param(name)
            } else {
                ty.member(name)
            };
            if let Some(member) = found {
                return Some(member.clone());
            }
            depth += 1;
            if depth > MAX_BASE_DEPTH {
                return None;
            }
            current = ty.base.as_ref().and_then(|b| self.index.get(b)).cloned();
        }
        None
    }

    /// Type of a member path read from inside `owner`.
    fn path_type(&self, owner: &TypeMetadata, path: &[String]) -> Result<String, String> {
        let Some((first, rest)) = path.split_first() else {
            return Err(String::new());
        };
        let mut ty = self
            .find_member(owner, first, false)
            .ok_or_else(|| format!("'{}' does not contain a definition for '{}'", owner.name, first))?
            .ty;
        for segment in rest {
            let record = self
                .index
                .get(&ty)
                .ok_or_else(|| format!("'{}' does not contain a definition for '{}'", ty, segment))?;
            ty = self
                .find_member(record, segment, false)
                .ok_or_else(|| format!("'{}' does not contain a definition for '{}'", ty, segment))?
                .ty;
        }
        Ok(ty)
    }

    fn value_type(
        &mut self,
        owner: &TypeMetadata,
        value: &Value,
        used: &mut HashSet<String>,
        file_path: &str,
        span: SourceSpan,
    ) -> Option<String> {
        match value {
            Value::Member(path) => {
                if let Some(first) = path.first() {
                    used.insert(first.clone());
                }
                match self.path_type(owner, path) {
                    Ok(ty) => Some(ty),
                    Err(message) => {
                        self.error(SB_MEMBER_NOT_FOUND, message, file_path, span);
                        None
                    }
                }
            }
            literal => literal.literal_type().map(String::from),
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Render bodies
    // ───────────────────────────────────────────────────────────────────────────

    fn link_render(
        &mut self,
        decl: &TypeDecl,
        owner: &TypeMetadata,
        body: &[Stmt],
        scope: &mut Scope,
    ) -> Vec<RenderOp> {
        let file_path = scope.file_path;
        let mut ops = Vec::with_capacity(body.len());
        let mut open: Vec<SourceSpan> = Vec::new();
        let mut used: HashSet<String> = HashSet::new();

        for stmt in body {
            match &stmt.kind {
                StmtKind::Open(tag) => {
                    open.push(stmt.span);
                    ops.push(RenderOp::Open { tag: tag.clone() });
                }
                StmtKind::Close => {
                    if open.pop().is_none() {
                        self.error(
                            SB_UNBALANCED_ELEMENT,
                            "close has no matching open".to_string(),
                            file_path,
                            stmt.span,
                        );
                    }
                    ops.push(RenderOp::Close);
                }
                StmtKind::Attr(name, value) => {
                    if open.is_empty() {
                        self.error(
                            SB_UNBALANCED_ELEMENT,
                            format!("attribute '{}' is outside of any element", name),
                            file_path,
                            stmt.span,
                        );
                    }
                    self.value_type(owner, value, &mut used, file_path, stmt.span);
                    ops.push(RenderOp::Attr {
                        name: name.clone(),
                        value: value.clone(),
                    });
                }
                StmtKind::Text(value) => ops.push(RenderOp::Text {
                    value: value.clone(),
                }),
                StmtKind::Expr(path) => {
                    let value = Value::Member(path.clone());
                    self.value_type(owner, &value, &mut used, file_path, stmt.span);
                    ops.push(RenderOp::Expr { path: path.clone() });
                }
                StmtKind::Child { component, sets } => {
                    let target = match self.resolve_type(component, scope) {
                        Some(ty) if ty.is_component() => Some(ty),
                        Some(ty) => {
                            self.error(
                                SB_NOT_A_COMPONENT,
                                format!("'{}' is not a component", ty.full_name()),
                                file_path,
                                stmt.span,
                            );
                            None
                        }
                        None => {
                            self.error(
                                SB_NOT_FOUND,
                                format!("the type '{}' could not be found", component),
                                file_path,
                                stmt.span,
                            );
                            None
                        }
                    };

                    let mut assigned = Vec::with_capacity(sets.len());
                    for set in sets {
                        let value_ty =
                            self.value_type(owner, &set.value, &mut used, file_path, set.span);
                        if let Some(target) = &target {
                            match self.find_member(target, &set.name, true) {
                                Some(param) => {
                                    if let Some(value_ty) = value_ty {
                                        if value_ty != param.ty {
                                            self.error(
                                                SB_TYPE_MISMATCH,
                                                format!(
                                                    "cannot convert '{}' to '{}' for parameter '{}'",
                                                    value_ty, param.ty, param.name
                                                ),
                                                file_path,
                                                set.span,
                                            );
                                        }
                                    }
                                }
                                None => self.error(
                                    SB_MEMBER_NOT_FOUND,
                                    format!(
                                        "'{}' does not have a parameter named '{}'",
                                        target.name, set.name
                                    ),
                                    file_path,
                                    set.span,
                                ),
                            }
                        }
                        assigned.push((set.name.clone(), set.value.clone()));
                    }

                    ops.push(RenderOp::Child {
                        component: target
                            .map(|t| t.full_name())
                            .unwrap_or_else(|| qualify(scope.namespace, component)),
                        sets: assigned,
                    });
                }
            }
        }

        for span in open {
            self.error(
                SB_UNBALANCED_ELEMENT,
                "open has no matching close".to_string(),
                file_path,
                span,
            );
        }

        let declared_fields: HashMap<&str, &MemberDecl> =
            decl.fields.iter().map(|f| (f.name.as_str(), f)).collect();
        for field in &owner.fields {
            if !used.contains(&field.name) {
                let span = declared_fields
                    .get(field.name.as_str())
                    .map(|f| f.span)
                    .unwrap_or(decl.span);
                self.diagnostics.push(Diagnostic::warning(
                    SB_UNUSED_FIELD,
                    format!("the field '{}.{}' is never used", decl.name, field.name),
                    file_path,
                    span,
                ));
            }
        }

        ops
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
