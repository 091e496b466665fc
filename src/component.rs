//! Component tag resolution.
//!
//! Runs between the two translation passes. Every component tag in a parsed
//! template is looked up in the type index built from the base references plus
//! the declaration module. Resolved tags get their full type name and their
//! attribute names mapped back to the declared parameter casing; unresolved tags
//! fall back to plain elements with a warning.

use crate::cache::TypeIndex;
use crate::image::{MemberMetadata, TypeMetadata};
use crate::parse::{AttributeValue, ComponentIR, ComponentNode, ElementNode, TemplateNode};
use crate::validate::{Diagnostic, CMP_UNEXPECTED_ELEMENT};

const MAX_BASE_DEPTH: usize = 64;

struct ResolutionContext<'a> {
    index: &'a TypeIndex,
    namespace: &'a str,
    imports: Vec<String>,
    file_path: &'a str,
    diagnostics: Vec<Diagnostic>,
}

impl ResolutionContext<'_> {
    /// Parameter lookup that also walks the component's bases.
    fn find_param(&self, component: &TypeMetadata, attr_name: &str) -> Option<MemberMetadata> {
        let mut current = Some(component);
        let mut depth = 0;
        while let Some(ty) = current {
            if let Some(param) = ty.param(attr_name).or_else(|| ty.param_ignore_case(attr_name)) {
                return Some(param.clone());
            }
            depth += 1;
            if depth > MAX_BASE_DEPTH {
                break;
            }
            current = ty.base.as_ref().and_then(|b| self.index.get(b));
        }
        None
    }
}

/// Resolve component tags in `ir` in place. Returns the `CMP0012` warnings raised.
pub fn resolve_components(
    ir: &mut ComponentIR,
    index: &TypeIndex,
    default_imports: &[String],
) -> Vec<Diagnostic> {
    let mut imports = ir.declarations.uses.clone();
    imports.extend(default_imports.iter().cloned());

    let mut ctx = ResolutionContext {
        index,
        namespace: &ir.namespace,
        imports,
        file_path: &ir.path,
        diagnostics: Vec::new(),
    };
    let nodes = std::mem::take(&mut ir.nodes);
    let resolved = resolve_nodes(nodes, &mut ctx);
    let diagnostics = ctx.diagnostics;
    ir.nodes = resolved;
    diagnostics
}

fn resolve_nodes(nodes: Vec<TemplateNode>, ctx: &mut ResolutionContext) -> Vec<TemplateNode> {
    let mut resolved = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            TemplateNode::Component(comp) => {
                resolved.push(resolve_component_node(comp, ctx));
            }
            TemplateNode::Element(mut elem) => {
                elem.children = resolve_nodes(elem.children, ctx);
                resolved.push(TemplateNode::Element(elem));
            }
            _ => resolved.push(node),
        }
    }
    resolved
}

fn resolve_component_node(mut node: ComponentNode, ctx: &mut ResolutionContext) -> TemplateNode {
    let Some(component) = ctx
        .index
        .resolve(&node.name, ctx.namespace, &ctx.imports)
        .filter(|ty| ty.is_component())
    else {
        ctx.diagnostics.push(Diagnostic::warning(
            CMP_UNEXPECTED_ELEMENT,
            format!(
                "found markup element with unexpected name '{}'; if this is intended to be a component, add a 'use' declaration for its namespace",
                node.name
            ),
            ctx.file_path,
            node.location,
        ));
        // Children of an unknown tag still render.
        return TemplateNode::Element(ElementNode {
            tag: node.name,
            attributes: node.attributes,
            children: resolve_nodes(node.children, ctx),
        });
    };

    for attr in &mut node.attributes {
        let Some(param) = ctx.find_param(component, &attr.name) else {
            continue;
        };
        attr.name = param.name;

        // Static text for an int or bool parameter is written as a literal.
        if let AttributeValue::Static(text) = &attr.value {
            let literal = match param.ty.as_str() {
                "int" => text.trim().parse::<i64>().ok().map(|n| n.to_string()),
                "bool" => match text.trim() {
                    "true" | "false" => Some(text.trim().to_string()),
                    _ => None,
                },
                _ => None,
            };
            if let Some(literal) = literal {
                attr.value = AttributeValue::Dynamic(literal);
            }
        }
    }

    if !node.children.is_empty() {
        tracing::debug!(
            component = %node.name,
            file = %ctx.file_path,
            "child content of a component is not rendered"
        );
    }

    node.name = component.full_name();
    node.children = Vec::new();
    TemplateNode::Component(node)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::TypeKind;
    use crate::parse::parse_component;
    use crate::validate::SourceSpan;

    fn index() -> TypeIndex {
        let mut index = TypeIndex::default();
        index.insert(TypeMetadata {
            namespace: "Lib.Widgets".to_string(),
            name: "Counter".to_string(),
            kind: TypeKind::Component,
            base: None,
            params: vec![
                MemberMetadata {
                    name: "StartValue".to_string(),
                    ty: "int".to_string(),
                    default: None,
                },
                MemberMetadata {
                    name: "Label".to_string(),
                    ty: "string".to_string(),
                    default: None,
                },
            ],
            fields: vec![],
        });
        index
    }

    fn parse(src: &str) -> ComponentIR {
        let mut diags = Vec::new();
        let ir = parse_component("Home.cmp", src, "App", &mut diags).unwrap();
        assert!(diags.is_empty(), "{:?}", diags);
        ir
    }

    #[test]
    fn test_resolves_through_use_and_maps_param_casing() {
        let mut ir = parse(
            "<script>use Lib.Widgets;</script><div><Counter StartValue=\"5\" Label=\"x\" extra=\"1\" /></div>",
        );
        let diags = resolve_components(&mut ir, &index(), &[]);
        assert!(diags.is_empty());

        let TemplateNode::Element(div) = &ir.nodes[0] else {
            panic!("expected element");
        };
        let TemplateNode::Component(counter) = &div.children[0] else {
            panic!("expected component");
        };
        assert_eq!(counter.name, "Lib.Widgets.Counter");
        assert_eq!(counter.attributes[0].name, "StartValue");
        assert_eq!(counter.attributes[0].value, AttributeValue::Dynamic("5".to_string()));
        assert_eq!(counter.attributes[1].value, AttributeValue::Static("x".to_string()));
        assert_eq!(counter.attributes[2].name, "extra");
    }

    #[test]
    fn test_default_imports_apply() {
        let mut ir = parse("<Counter />");
        let diags = resolve_components(&mut ir, &index(), &["Lib.Widgets".to_string()]);
        assert!(diags.is_empty());
        assert!(matches!(&ir.nodes[0], TemplateNode::Component(_)));
    }

    #[test]
    fn test_unknown_component_becomes_element_with_warning() {
        let mut ir = parse("<p>hi</p>\n<Missing><b>kept</b></Missing>");
        let diags = resolve_components(&mut ir, &index(), &[]);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, CMP_UNEXPECTED_ELEMENT);
        assert_eq!(diags[0].file_path, "Home.cmp");
        assert_eq!(diags[0].span, SourceSpan::new(2, 1));
        assert!(!diags[0].is_error());

        match &ir.nodes[1] {
            TemplateNode::Element(el) => {
                assert_eq!(el.tag, "Missing");
                assert_eq!(el.children.len(), 1);
            }
            other => panic!("expected element, got {:?}", other),
        }
    }
}
