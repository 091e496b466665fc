//! Intermediate-source generation for parsed components.
//!
//! Declaration mode writes the component's signature only (params, fields, base)
//! and is what the first pass feeds to the declaration module. Full mode adds the
//! render block and expects component tags to have been resolved already.

use crate::parse::{AttributeValue, ComponentIR, ElementNode, MemberDeclaration, TemplateNode};
use crate::syntax::quote;
use crate::validate::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenMode {
    Declarations,
    Full,
}

/// Generated intermediate source plus, per generated line, the markup position it came from.
#[derive(Debug, Clone, Default)]
pub struct GeneratedUnit {
    pub source: String,
    line_map: Vec<Option<SourceSpan>>,
}

impl GeneratedUnit {
    /// Map a span in the generated source back to the markup file.
    ///
    /// Lines without a direct origin take the nearest mapped line above them.
    pub fn map_span(&self, span: SourceSpan) -> SourceSpan {
        let line = (span.line as usize).min(self.line_map.len());
        self.line_map[..line]
            .iter()
            .rev()
            .find_map(|origin| *origin)
            .unwrap_or(SourceSpan::new(1, 1))
    }
}

struct Writer {
    out: String,
    line_map: Vec<Option<SourceSpan>>,
    indent: usize,
}

impl Writer {
    fn line(&mut self, text: &str, origin: Option<SourceSpan>) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
        self.line_map.push(origin);
    }
}

pub fn generate_unit(ir: &ComponentIR, default_imports: &[String], mode: CodegenMode) -> GeneratedUnit {
    let mut w = Writer {
        out: String::new(),
        line_map: Vec::new(),
        indent: 0,
    };

    let head = Some(SourceSpan::new(1, 1));
    if !ir.namespace.is_empty() {
        w.line(&format!("namespace {};", ir.namespace), head);
    }
    for import in ir.declarations.uses.iter().chain(default_imports.iter()) {
        w.line(&format!("use {};", import), head);
    }

    let header = match &ir.declarations.inherits {
        Some(base) => format!("component {} : {} {{", ir.name, base),
        None => format!("component {} {{", ir.name),
    };
    w.line(&header, head);
    w.indent += 1;

    for param in &ir.declarations.params {
        w.line(&member_line("param", param), Some(param.location));
    }
    for field in &ir.declarations.fields {
        w.line(&member_line("field", field), Some(field.location));
    }

    if mode == CodegenMode::Full {
        w.line("render {", None);
        w.indent += 1;
        generate_nodes(&mut w, &ir.nodes);
        w.indent -= 1;
        w.line("}", None);
    }

    w.indent -= 1;
    w.line("}", None);

    GeneratedUnit {
        source: w.out,
        line_map: w.line_map,
    }
}

fn member_line(keyword: &str, member: &MemberDeclaration) -> String {
    match &member.default {
        Some(default) => format!("{} {}: {} = {};", keyword, member.name, member.ty, default),
        None => format!("{} {}: {};", keyword, member.name, member.ty),
    }
}

fn generate_nodes(w: &mut Writer, nodes: &[TemplateNode]) {
    for node in nodes {
        generate_node(w, node);
    }
}

fn generate_node(w: &mut Writer, node: &TemplateNode) {
    match node {
        TemplateNode::Element(el) => generate_element(w, el),
        TemplateNode::Text(t) => w.line(&format!("text {};", quote(&t.value)), None),
        TemplateNode::Expression(e) => {
            w.line(&format!("expr {};", e.code), Some(e.location));
        }
        TemplateNode::Component(c) => {
            let origin = Some(c.location);
            w.line(&format!("child {} {{", c.name), origin);
            w.indent += 1;
            for attr in &c.attributes {
                let value = attribute_value(&attr.value);
                w.line(&format!("set {} = {};", attr.name, value), origin);
            }
            w.indent -= 1;
            w.line("}", origin);
        }
    }
}

fn generate_element(w: &mut Writer, el: &ElementNode) {
    w.line(&format!("open {};", quote(&el.tag)), None);
    for attr in &el.attributes {
        w.line(
            &format!("attr {} = {};", quote(&attr.name), attribute_value(&attr.value)),
            None,
        );
    }
    generate_nodes(w, &el.children);
    w.line("close;", None);
}

fn attribute_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Static(s) => quote(s),
        AttributeValue::Dynamic(code) => code.clone(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
