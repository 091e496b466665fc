//! Reference Cache
//!
//! The set of platform binaries the compiler links against, plus a type index
//! built from their images. Entries are only ever appended; a binary whose
//! content hash is already present is skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::image::{identity, qualify, ModuleImage, TypeMetadata};

#[derive(Debug, Clone)]
pub struct Reference {
    pub name: String,
    pub identity: String,
    pub image: Arc<ModuleImage>,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    references: Vec<Reference>,
    identities: HashSet<String>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an already-validated image. Returns false if the same bytes were added before.
    pub fn push(&mut self, bytes: &[u8], image: ModuleImage) -> bool {
        let id = identity(bytes);
        if !self.identities.insert(id.clone()) {
            return false;
        }
        self.references.push(Reference {
            name: image.name.clone(),
            identity: id,
            image: Arc::new(image),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.references.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.references.iter().map(|r| r.name.clone()).collect()
    }

    pub fn contains_identity(&self, id: &str) -> bool {
        self.identities.contains(id)
    }

    pub fn type_index(&self) -> TypeIndex {
        let mut index = TypeIndex::default();
        for reference in &self.references {
            for ty in &reference.image.types {
                index.insert(ty.clone());
            }
        }
        index
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPE INDEX
// ═══════════════════════════════════════════════════════════════════════════════

/// Lookup table from full type names to metadata, with namespace-aware resolution.
#[derive(Debug, Clone, Default)]
pub struct TypeIndex {
    types: HashMap<String, TypeMetadata>,
    namespaces: HashSet<String>,
}

impl TypeIndex {
    /// Insert a type. The first declaration of a full name wins; returns false on a duplicate.
    pub fn insert(&mut self, ty: TypeMetadata) -> bool {
        let full_name = ty.full_name();
        if self.types.contains_key(&full_name) {
            return false;
        }
        let mut ns = ty.namespace.as_str();
        while !ns.is_empty() {
            self.namespaces.insert(ns.to_string());
            ns = match ns.rfind('.') {
                Some(dot) => &ns[..dot],
                None => "",
            };
        }
        self.types.insert(full_name, ty);
        true
    }

    /// Overwrite the metadata of an already-declared type.
    pub fn replace(&mut self, ty: TypeMetadata) {
        if let Some(slot) = self.types.get_mut(&ty.full_name()) {
            *slot = ty;
        }
    }

    pub fn get(&self, full_name: &str) -> Option<&TypeMetadata> {
        self.types.get(full_name)
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Resolve `name` as seen from `namespace` with the given imports.
    ///
    /// Order: the enclosing namespace and its parents (innermost first, ending with
    /// the global namespace), then each import in declaration order.
    pub fn resolve(&self, name: &str, namespace: &str, imports: &[String]) -> Option<&TypeMetadata> {
        let mut ns = namespace;
        loop {
            if let Some(ty) = self.types.get(&qualify(ns, name)) {
                return Some(ty);
            }
            if ns.is_empty() {
                break;
            }
            ns = match ns.rfind('.') {
                Some(dot) => &ns[..dot],
                None => "",
            };
        }

        imports
            .iter()
            .find_map(|import| self.types.get(&qualify(import, name)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::TypeKind;

    fn ty(namespace: &str, name: &str) -> TypeMetadata {
        TypeMetadata {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind: TypeKind::Component,
            base: None,
            params: vec![],
            fields: vec![],
        }
    }

    #[test]
    fn test_push_skips_identical_binaries() {
        let image = ModuleImage::new("Lib");
        let bytes = image.to_bytes().unwrap();
        let mut set = ReferenceSet::new();
        assert!(set.push(&bytes, image.clone()));
        assert!(!set.push(&bytes, image));
        assert_eq!(set.len(), 1);
        assert!(set.contains_identity(&identity(&bytes)));
    }

    #[test]
    fn test_resolve_order() {
        let mut index = TypeIndex::default();
        index.insert(ty("App.Pages", "Card"));
        index.insert(ty("App", "Card"));
        index.insert(ty("Lib.Widgets", "Button"));

        let imports = vec!["Lib.Widgets".to_string()];
        assert_eq!(
            index.resolve("Card", "App.Pages", &imports).unwrap().full_name(),
            "App.Pages.Card"
        );
        assert_eq!(
            index.resolve("Card", "App.Other", &imports).unwrap().full_name(),
            "App.Card"
        );
        assert_eq!(
            index.resolve("Button", "App", &imports).unwrap().full_name(),
            "Lib.Widgets.Button"
        );
        assert!(index.resolve("Button", "App", &[]).is_none());
        assert!(index.resolve("Lib.Widgets.Button", "App", &[]).is_some());
    }

    #[test]
    fn test_namespaces_include_parents() {
        let mut index = TypeIndex::default();
        index.insert(ty("Lib.Widgets.Forms", "Input"));
        assert!(index.has_namespace("Lib"));
        assert!(index.has_namespace("Lib.Widgets"));
        assert!(index.has_namespace("Lib.Widgets.Forms"));
        assert!(!index.has_namespace("Widgets"));
    }

    #[test]
    fn test_first_declaration_wins() {
        let mut index = TypeIndex::default();
        assert!(index.insert(ty("A", "X")));
        assert!(!index.insert(ty("A", "X")));
        assert_eq!(index.len(), 1);
    }
}
