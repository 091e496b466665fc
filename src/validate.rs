use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

// Markup (translator) codes
pub const CMP_INVALID_COMPONENT_NAME: &str = "CMP0001";
pub const CMP_INVALID_DECLARATION: &str = "CMP0002";
pub const CMP_DUPLICATE_MEMBER: &str = "CMP0003";
pub const CMP_UNTERMINATED_SCRIPT: &str = "CMP0004";
pub const CMP_UNBALANCED_EXPRESSION: &str = "CMP0005";
pub const CMP_MARKUP_PARSE: &str = "CMP0006";
pub const CMP_UNEXPECTED_ELEMENT: &str = "CMP0012";

// Emitter (link) codes
pub const SB_SYNTAX: &str = "SB1002";
pub const SB_NOT_FOUND: &str = "SB0246";
pub const SB_DUPLICATE_TYPE: &str = "SB0101";
pub const SB_DUPLICATE_MEMBER: &str = "SB0102";
pub const SB_MEMBER_NOT_FOUND: &str = "SB0117";
pub const SB_TYPE_MISMATCH: &str = "SB0029";
pub const SB_NOT_A_COMPONENT: &str = "SB0305";
pub const SB_UNBALANCED_ELEMENT: &str = "SB1513";
pub const SB_UNUSED_FIELD: &str = "SB0169";
pub const SB_UNNECESSARY_USE: &str = "SB8019";

/// One-line explanation of a diagnostic code, shown next to the message by hosts.
pub fn describe_code(code: &str) -> &'static str {
    match code {
        CMP_INVALID_COMPONENT_NAME => "Component file names must be valid identifiers.",
        CMP_INVALID_DECLARATION => {
            "Script blocks may only contain use, inherits, param and field declarations."
        }
        CMP_DUPLICATE_MEMBER => "Each param and field name may be declared once.",
        CMP_UNTERMINATED_SCRIPT => "Every <script> block must be closed.",
        CMP_UNBALANCED_EXPRESSION => "Every '{' starting an expression needs a matching '}'.",
        CMP_MARKUP_PARSE => "Markup must be well-formed.",
        CMP_UNEXPECTED_ELEMENT => {
            "Tags starting with an uppercase letter should name a known component."
        }
        SB_SYNTAX => "Source must follow the unit grammar.",
        SB_NOT_FOUND => "Every referenced type and namespace must be declared or referenced.",
        SB_DUPLICATE_TYPE => "Type names are unique within a namespace.",
        SB_DUPLICATE_MEMBER => "Member names are unique within a type.",
        SB_MEMBER_NOT_FOUND => "Expressions and parameter assignments must name real members.",
        SB_TYPE_MISMATCH => "Values must match the declared member type.",
        SB_NOT_A_COMPONENT => "Only component types can be rendered or inherited from.",
        SB_UNBALANCED_ELEMENT => "Every open must be matched by a close in the same render block.",
        SB_UNUSED_FIELD => "Fields should be read somewhere in the render block.",
        SB_UNNECESSARY_USE => "Imports should be used.",
        _ => "Unknown diagnostic.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTICS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpan {
    pub line: u32,
    pub column: u32,
}

impl SourceSpan {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// 1-based line/column of a byte offset into `source`.
    pub fn at_offset(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() as u32 + 1;
        let column = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count() as u32 + 1,
            None => before.chars().count() as u32 + 1,
        };
        Self { line, column }
    }
}

/// Byte offset to line/column mapping for one source text.
pub struct LineIndex<'a> {
    source: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { source, starts }
    }

    pub fn span(&self, offset: usize) -> SourceSpan {
        let offset = offset.min(self.source.len());
        let line = self.starts.partition_point(|&start| start <= offset);
        let start = self.starts[line - 1];
        let column = self.source[start..offset].chars().count() as u32 + 1;
        SourceSpan::new(line as u32, column)
    }
}

/// A translation or emission finding. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub file_path: String,
    pub span: SourceSpan,
}

impl Diagnostic {
    pub fn new(
        code: &str,
        severity: Severity,
        message: impl Into<String>,
        file_path: &str,
        span: SourceSpan,
    ) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            severity,
            file_path: file_path.to_string(),
            span,
        }
    }

    pub fn error(code: &str, message: impl Into<String>, file_path: &str, span: SourceSpan) -> Self {
        Self::new(code, Severity::Error, message, file_path, span)
    }

    pub fn warning(
        code: &str,
        message: impl Into<String>,
        file_path: &str,
        span: SourceSpan,
    ) -> Self {
        Self::new(code, Severity::Warning, message, file_path, span)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn guarantee(&self) -> &'static str {
        describe_code(&self.code)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({},{}): {} {}: {}",
            self.file_path, self.span.line, self.span.column, self.severity, self.code, self.message
        )
    }
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
