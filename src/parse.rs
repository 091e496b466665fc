//! Parse Module for component markup
//!
//! Provides HTML5-compliant template parsing with expression extraction, plus
//! the `<script>` declaration block that gives a component its shape.

use html5ever::parse_document;
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tendril::TendrilSink;

use crate::validate::{
    Diagnostic, LineIndex, SourceSpan, CMP_DUPLICATE_MEMBER, CMP_INVALID_COMPONENT_NAME,
    CMP_INVALID_DECLARATION, CMP_MARKUP_PARSE, CMP_UNBALANCED_EXPRESSION, CMP_UNTERMINATED_SCRIPT,
};

const COMPONENT_NAME_ATTR: &str = "data-sb-component";

lazy_static! {
    /// Expression placeholder pattern for normalization
    static ref EXPR_PLACEHOLDER_RE: Regex = Regex::new(r"__SANDBOX_EXPR_(\d+)__").unwrap();

    /// Script block regex
    static ref SCRIPT_REGEX: Regex = Regex::new(r"(?is)<script\b[^>]*>([\s\S]*?)</script\s*>").unwrap();
    static ref SCRIPT_OPEN_REGEX: Regex = Regex::new(r"(?i)<script\b").unwrap();

    static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();

    static ref USE_DECL_RE: Regex =
        Regex::new(r"^use\s+([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*)$").unwrap();
    static ref INHERITS_DECL_RE: Regex =
        Regex::new(r"^inherits\s+([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*)$").unwrap();
    static ref MEMBER_DECL_RE: Regex = Regex::new(
        r#"^(param|field)\s+([A-Za-z_]\w*)\s*:\s*([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*)(?:\s*=\s*("(?:[^"\\]|\\.)*"|-?\d+|true|false))?$"#
    )
    .unwrap();

    /// Opening component tags in source order, for locating component nodes.
    static ref COMPONENT_OPEN_RE: Regex = Regex::new(r"<([A-Z][A-Za-z0-9_.]*)").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE IR TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum AttributeValue {
    Static(String),
    Dynamic(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeIR {
    pub name: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TemplateNode {
    Element(ElementNode),
    Text(TextNode),
    Expression(ExpressionNode),
    Component(ComponentNode),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub tag: String,
    pub attributes: Vec<AttributeIR>,
    pub children: Vec<TemplateNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNode {
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionNode {
    pub code: String,
    #[serde(default)]
    pub location: SourceSpan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNode {
    pub name: String,
    pub attributes: Vec<AttributeIR>,
    pub children: Vec<TemplateNode>,
    #[serde(default)]
    pub location: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDeclaration {
    pub name: String,
    pub ty: String,
    /// Literal initializer exactly as written (`"text"`, `42`, `true`).
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub location: SourceSpan,
}

/// Everything a component's `<script>` blocks declare.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDeclarations {
    pub uses: Vec<String>,
    pub inherits: Option<String>,
    pub params: Vec<MemberDeclaration>,
    pub fields: Vec<MemberDeclaration>,
}

/// A parsed component-markup file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentIR {
    pub name: String,
    pub namespace: String,
    pub path: String,
    pub declarations: ScriptDeclarations,
    pub nodes: Vec<TemplateNode>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT IDENTITY
// ═══════════════════════════════════════════════════════════════════════════════

/// Component name from a file path: the stem of the last segment.
pub fn component_name(path: &str) -> &str {
    let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
    file.split('.').next().unwrap_or(file)
}

/// Namespace for a component file: the root namespace plus its folder segments.
/// Folder names that are not identifiers are skipped.
pub fn component_namespace(root_namespace: &str, path: &str) -> String {
    let mut namespace = root_namespace.to_string();
    let segments: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if let Some((_, folders)) = segments.split_last() {
        for folder in folders {
            if IDENT_RE.is_match(folder) {
                if !namespace.is_empty() {
                    namespace.push('.');
                }
                namespace.push_str(folder);
            }
        }
    }
    namespace
}

/// Check if a tag name represents a component (starts with uppercase)
pub fn is_component_tag(tag_name: &str) -> bool {
    tag_name
        .chars()
        .next()
        .map(|c| c.is_uppercase())
        .unwrap_or(false)
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSION NORMALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Find the end of a balanced brace expression, handling string literals.
/// Returns the index after the closing brace, or None if unbalanced.
fn find_balanced_brace_end(chars: &[(usize, char)], start_index: usize) -> Option<usize> {
    let mut depth = 0;
    let mut i = start_index;
    let mut in_string: Option<char> = None;

    while i < chars.len() {
        let c = chars[i].1;

        if c == '\\' && i + 1 < chars.len() {
            i += 2;
            continue;
        }

        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }

        if c == '"' || c == '\'' {
            in_string = Some(c);
        } else if c == '{' {
            depth += 1;
        } else if c == '}' {
            depth -= 1;
            if depth == 0 {
                return Some(i + 1);
            }
        }

        i += 1;
    }

    None
}

#[derive(Debug, Clone)]
struct NormalizedExpression {
    code: String,
    location: SourceSpan,
}

/// Replaces both attr={expr} and {textExpr} with placeholders so html5ever can parse correctly.
/// Placeholder ids are allocated per call, so the same source always normalizes the same way.
fn normalize_all_expressions(
    html: &str,
    lines: &LineIndex,
    file_path: &str,
) -> Result<(String, HashMap<String, NormalizedExpression>), Diagnostic> {
    let mut normalized = String::with_capacity(html.len());
    let mut expressions = HashMap::new();
    let chars: Vec<(usize, char)> = html.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c == '{' {
            let Some(end) = find_balanced_brace_end(&chars, i) else {
                return Err(Diagnostic::error(
                    CMP_UNBALANCED_EXPRESSION,
                    "unterminated expression: missing '}'",
                    file_path,
                    lines.span(offset),
                ));
            };
            let code: String = chars[i + 1..end - 1].iter().map(|(_, ch)| *ch).collect();
            let placeholder = format!("__SANDBOX_EXPR_{}__", expressions.len());
            expressions.insert(
                placeholder.clone(),
                NormalizedExpression {
                    code: code.trim().to_string(),
                    location: lines.span(offset),
                },
            );
            normalized.push_str(&placeholder);
            i = end;
            continue;
        }

        if c == '}' {
            return Err(Diagnostic::error(
                CMP_UNBALANCED_EXPRESSION,
                "unexpected '}' outside of an expression",
                file_path,
                lines.span(offset),
            ));
        }

        normalized.push(c);
        i += 1;
    }

    Ok((normalized, expressions))
}

/// Convert self-closing component tags to properly closed tags.
/// HTML5/html5ever treats `<ComponentName />` as an opening tag,
/// causing following siblings to be incorrectly nested as children.
fn convert_self_closing_components(html: &str) -> String {
    lazy_static! {
        static ref SELF_CLOSING_RE: Regex =
            Regex::new(r"<([A-Z][A-Za-z0-9_.]*)\s*([^>]*?)\s*/>").unwrap();
    }

    SELF_CLOSING_RE
        .replace_all(html, "<$1 $2></$1>")
        .to_string()
}

/// Pre-pass to mark component tags (uppercase) with a data attribute to preserve casing
/// because html5ever lowercases all tag names.
fn mark_component_tags(html: &str) -> String {
    lazy_static! {
        static ref TAG_OPEN_RE: Regex = Regex::new(r"<([A-Z][A-Za-z0-9_.]*)(\s|>)").unwrap();
    }

    TAG_OPEN_RE
        .replace_all(html, |caps: &regex::Captures| {
            format!("<{} {}=\"{}\"{}", &caps[1], COMPONENT_NAME_ATTR, &caps[1], &caps[2])
        })
        .to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCRIPT DECLARATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Blank out script blocks without moving any other byte, so template offsets stay valid.
/// Returns the blanked template and each block's (content offset, content).
fn split_script_blocks<'a>(
    source: &'a str,
    lines: &LineIndex,
    file_path: &str,
) -> Result<(String, Vec<(usize, &'a str)>), Diagnostic> {
    let mut template = String::with_capacity(source.len());
    let mut blocks = Vec::new();
    let mut last = 0;

    for caps in SCRIPT_REGEX.captures_iter(source) {
        let (Some(whole), Some(content)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        template.push_str(&source[last..whole.start()]);
        template.extend(
            source[whole.start()..whole.end()]
                .chars()
                .map(|c| if c == '\n' { '\n' } else { ' ' }),
        );
        blocks.push((content.start(), content.as_str()));
        last = whole.end();
    }
    template.push_str(&source[last..]);

    if let Some(m) = SCRIPT_OPEN_REGEX.find(&template) {
        return Err(Diagnostic::error(
            CMP_UNTERMINATED_SCRIPT,
            "<script> block is never closed",
            file_path,
            lines.span(m.start()),
        ));
    }

    Ok((template, blocks))
}

fn strip_line_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Parse the declaration statements of all script blocks.
fn parse_declarations(
    blocks: &[(usize, &str)],
    lines: &LineIndex,
    file_path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> ScriptDeclarations {
    let mut decls = ScriptDeclarations::default();

    for (block_offset, content) in blocks {
        // Comments are removed in place so statement offsets still line up.
        let cleaned: String = content
            .split_inclusive('\n')
            .map(|line| {
                let kept = strip_line_comment(line);
                let mut out = kept.to_string();
                out.extend(line[kept.len()..].chars().map(|c| if c == '\n' { '\n' } else { ' ' }));
                out
            })
            .collect();

        let mut stmt_start = 0;
        for stmt in cleaned.split(';') {
            let offset = block_offset + stmt_start + (stmt.len() - stmt.trim_start().len());
            stmt_start += stmt.len() + 1;

            let text = stmt.trim();
            if text.is_empty() {
                continue;
            }
            let location = lines.span(offset);

            if let Some(caps) = USE_DECL_RE.captures(text) {
                decls.uses.push(caps[1].to_string());
            } else if let Some(caps) = INHERITS_DECL_RE.captures(text) {
                if decls.inherits.is_some() {
                    diagnostics.push(Diagnostic::error(
                        CMP_INVALID_DECLARATION,
                        "a component may inherit from only one base",
                        file_path,
                        location,
                    ));
                }
                decls.inherits = Some(caps[1].to_string());
            } else if let Some(caps) = MEMBER_DECL_RE.captures(text) {
                let name = caps[2].to_string();
                let duplicate = decls
                    .params
                    .iter()
                    .chain(decls.fields.iter())
                    .any(|m| m.name == name);
                if duplicate {
                    diagnostics.push(Diagnostic::error(
                        CMP_DUPLICATE_MEMBER,
                        format!("member '{}' is declared more than once", name),
                        file_path,
                        location,
                    ));
                    continue;
                }
                let member = MemberDeclaration {
                    name,
                    ty: caps[3].to_string(),
                    default: caps.get(4).map(|m| m.as_str().to_string()),
                    location,
                };
                if &caps[1] == "param" {
                    decls.params.push(member);
                } else {
                    decls.fields.push(member);
                }
            } else {
                diagnostics.push(Diagnostic::error(
                    CMP_INVALID_DECLARATION,
                    format!("invalid declaration '{}'", text),
                    file_path,
                    location,
                ));
            }
        }
    }

    decls
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE PARSING
// ═══════════════════════════════════════════════════════════════════════════════

struct NodeContext<'a> {
    expressions: &'a HashMap<String, NormalizedExpression>,
    /// Source positions of component tags, queued per name in document order.
    component_positions: HashMap<String, VecDeque<SourceSpan>>,
}

impl NodeContext<'_> {
    fn next_component_position(&mut self, name: &str) -> SourceSpan {
        self.component_positions
            .get_mut(name)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default()
    }

    fn restore_placeholders(&self, text: &str) -> String {
        EXPR_PLACEHOLDER_RE
            .replace_all(text, |caps: &regex::Captures| match self.expressions.get(&caps[0]) {
                Some(expr) => format!("{{{}}}", expr.code),
                None => caps[0].to_string(),
            })
            .to_string()
    }
}

/// Parse DOM node to TemplateNode
fn parse_dom_node(handle: &Handle, ctx: &mut NodeContext) -> Vec<TemplateNode> {
    match &handle.data {
        NodeData::Document => handle
            .children
            .borrow()
            .iter()
            .flat_map(|child| parse_dom_node(child, ctx))
            .collect(),

        NodeData::Text { contents } => {
            let text = contents.borrow().to_string();
            process_text_with_expressions(&text, ctx)
        }

        NodeData::Element { name, attrs, .. } => {
            let mut tag_name = name.local.to_string();
            let attributes = attrs.borrow();

            // CASING RESTORATION: Check if we marked this tag's original casing
            let mut marked = false;
            for attr in attributes.iter() {
                if &*attr.name.local == COMPONENT_NAME_ATTR {
                    tag_name = attr.value.to_string();
                    marked = true;
                    break;
                }
            }

            let mut parsed_attrs = Vec::new();
            for attr in attributes.iter() {
                let attr_name = attr.name.local.to_string();
                if attr_name == COMPONENT_NAME_ATTR {
                    continue;
                }
                let attr_value = attr.value.to_string();

                let value = match ctx.expressions.get(attr_value.trim()) {
                    Some(expr) => AttributeValue::Dynamic(expr.code.clone()),
                    None => AttributeValue::Static(ctx.restore_placeholders(&attr_value)),
                };
                parsed_attrs.push(AttributeIR {
                    name: attr_name,
                    value,
                });
            }

            let location = if marked {
                ctx.next_component_position(&tag_name)
            } else {
                SourceSpan::default()
            };

            let children: Vec<TemplateNode> = handle
                .children
                .borrow()
                .iter()
                .flat_map(|child| parse_dom_node(child, ctx))
                .collect();

            if marked && is_component_tag(&tag_name) {
                vec![TemplateNode::Component(ComponentNode {
                    name: tag_name,
                    attributes: parsed_attrs,
                    children,
                    location,
                })]
            } else {
                vec![TemplateNode::Element(ElementNode {
                    tag: tag_name,
                    attributes: parsed_attrs,
                    children,
                })]
            }
        }

        _ => vec![],
    }
}

/// Process text that may contain multiple expression placeholders
fn process_text_with_expressions(text: &str, ctx: &NodeContext) -> Vec<TemplateNode> {
    let mut nodes = Vec::new();
    let mut last_end = 0;

    for m in EXPR_PLACEHOLDER_RE.find_iter(text) {
        if m.start() > last_end {
            let before_text = &text[last_end..m.start()];
            if !before_text.trim().is_empty() {
                nodes.push(TemplateNode::Text(TextNode {
                    value: before_text.to_string(),
                }));
            }
        }

        if let Some(expr) = ctx.expressions.get(m.as_str()) {
            nodes.push(TemplateNode::Expression(ExpressionNode {
                code: expr.code.clone(),
                location: expr.location,
            }));
        }

        last_end = m.end();
    }

    if last_end < text.len() {
        let after_text = &text[last_end..];
        if !after_text.trim().is_empty() {
            nodes.push(TemplateNode::Text(TextNode {
                value: after_text.to_string(),
            }));
        }
    }

    nodes
}

/// Collect nodes under <html>/<head>/<body> without the wrappers html5ever inserts.
fn collect_body_content(handle: &Handle, nodes: &mut Vec<TemplateNode>, ctx: &mut NodeContext) {
    match &handle.data {
        NodeData::Document => {
            for child in handle.children.borrow().iter() {
                collect_body_content(child, nodes, ctx);
            }
        }
        NodeData::Element { name, .. } => {
            let tag = name.local.to_string();
            if tag == "html" || tag == "head" || tag == "body" {
                for child in handle.children.borrow().iter() {
                    collect_body_content(child, nodes, ctx);
                }
            } else {
                nodes.extend(parse_dom_node(handle, ctx));
            }
        }
        NodeData::Text { .. } => nodes.extend(parse_dom_node(handle, ctx)),
        _ => {}
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN PARSING FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse a component-markup file into its IR.
///
/// Returns `None` only when the markup is too broken to produce a tree; any
/// diagnostics are appended to `diagnostics` either way.
pub fn parse_component(
    path: &str,
    source: &str,
    root_namespace: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<ComponentIR> {
    let source = source.replace('\r', "");
    let lines = LineIndex::new(&source);

    let name = component_name(path).to_string();
    if !IDENT_RE.is_match(&name) {
        diagnostics.push(Diagnostic::error(
            CMP_INVALID_COMPONENT_NAME,
            format!("'{}' is not a valid component name", name),
            path,
            SourceSpan::new(1, 1),
        ));
    }

    // Step 1: Separate script blocks from the template
    let (template, blocks) = match split_script_blocks(&source, &lines, path) {
        Ok(split) => split,
        Err(diagnostic) => {
            diagnostics.push(diagnostic);
            return None;
        }
    };
    let declarations = parse_declarations(&blocks, &lines, path, diagnostics);

    // Step 2: Record component tag positions before anything moves
    let mut component_positions: HashMap<String, VecDeque<SourceSpan>> = HashMap::new();
    for caps in COMPONENT_OPEN_RE.captures_iter(&template) {
        if let Some(m) = caps.get(0) {
            component_positions
                .entry(caps[1].to_string())
                .or_default()
                .push_back(lines.span(m.start()));
        }
    }

    // Step 3: Normalize expressions to placeholders
    let (normalized, expressions) = match normalize_all_expressions(&template, &lines, path) {
        Ok(result) => result,
        Err(diagnostic) => {
            diagnostics.push(diagnostic);
            return None;
        }
    };

    // Step 4: Convert self-closing components and preserve component casing
    let html = mark_component_tags(&convert_self_closing_components(&normalized));

    // Step 5: Parse with html5ever
    let dom = match parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())
    {
        Ok(dom) => dom,
        Err(e) => {
            diagnostics.push(Diagnostic::error(
                CMP_MARKUP_PARSE,
                format!("failed to parse markup: {}", e),
                path,
                SourceSpan::new(1, 1),
            ));
            return None;
        }
    };

    // Step 6: Convert DOM to TemplateNodes
    let mut ctx = NodeContext {
        expressions: &expressions,
        component_positions,
    };
    let mut nodes = Vec::new();
    collect_body_content(&dom.document, &mut nodes, &mut ctx);

    Some(ComponentIR {
        namespace: component_namespace(root_namespace, path),
        name,
        path: path.to_string(),
        declarations,
        nodes,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
