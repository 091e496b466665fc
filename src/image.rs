//! Binary module images.
//!
//! Layout: `SBMOD\0` magic, u16 LE format version, u32 LE payload length, then a
//! JSON payload. Serialization never embeds timestamps, so emitting the same
//! units twice produces identical bytes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ImageError;

pub const MODULE_MAGIC: &[u8; 6] = b"SBMOD\0";
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = MODULE_MAGIC.len() + 2 + 4;

// ═══════════════════════════════════════════════════════════════════════════════
// IMAGE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeKind {
    Component,
    Record,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Member(Vec<String>),
}

impl Value {
    /// Builtin type name of a literal, `None` for member references.
    pub fn literal_type(&self) -> Option<&'static str> {
        match self {
            Value::Str(_) => Some("string"),
            Value::Int(_) => Some("int"),
            Value::Bool(_) => Some("bool"),
            Value::Member(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberMetadata {
    pub name: String,
    /// `string`, `int`, `bool` or the full name of a declared type.
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMetadata {
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default)]
    pub params: Vec<MemberMetadata>,
    #[serde(default)]
    pub fields: Vec<MemberMetadata>,
}

impl TypeMetadata {
    pub fn full_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }

    pub fn is_component(&self) -> bool {
        self.kind == TypeKind::Component
    }

    pub fn param(&self, name: &str) -> Option<&MemberMetadata> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Markup attribute names arrive case-folded, so params are matched loosely there.
    pub fn param_ignore_case(&self, name: &str) -> Option<&MemberMetadata> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn member(&self, name: &str) -> Option<&MemberMetadata> {
        self.param(name)
            .or_else(|| self.fields.iter().find(|f| f.name == name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RenderOp {
    Open { tag: String },
    Close,
    Attr { name: String, value: Value },
    Text { value: String },
    Expr { path: Vec<String> },
    Child { component: String, sets: Vec<(String, Value)> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderProgram {
    pub component: String,
    pub ops: Vec<RenderOp>,
}

/// A loadable compiled module: exported types plus their render programs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleImage {
    pub name: String,
    /// Logical names of the modules this one depends on directly.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub types: Vec<TypeMetadata>,
    #[serde(default)]
    pub renders: Vec<RenderProgram>,
}

impl ModuleImage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            references: Vec::new(),
            types: Vec::new(),
            renders: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        let payload = serde_json::to_vec(self)?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(MODULE_MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        if bytes.len() < HEADER_LEN || &bytes[..MODULE_MAGIC.len()] != MODULE_MAGIC {
            return Err(ImageError::BadMagic);
        }

        let mut cursor = MODULE_MAGIC.len();
        let version = u16::from_le_bytes([bytes[cursor], bytes[cursor + 1]]);
        if version != FORMAT_VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }
        cursor += 2;

        let len = u32::from_le_bytes([
            bytes[cursor],
            bytes[cursor + 1],
            bytes[cursor + 2],
            bytes[cursor + 3],
        ]) as usize;
        cursor += 4;

        let payload = &bytes[cursor..];
        if payload.len() < len {
            return Err(ImageError::Truncated {
                expected: len,
                found: payload.len(),
            });
        }

        Ok(serde_json::from_slice(&payload[..len])?)
    }
}

/// Hex SHA-256 of a module's bytes; two binaries with the same identity are the same reference.
pub fn identity(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", namespace, name)
    }
}

pub fn is_builtin_type(ty: &str) -> bool {
    matches!(ty, "string" | "int" | "bool")
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModuleImage {
        let mut image = ModuleImage::new("Sandbox.Components");
        image.references.push("Sandbox.Runtime".to_string());
        image.types.push(TypeMetadata {
            namespace: "Sandbox.Components".to_string(),
            name: "Button".to_string(),
            kind: TypeKind::Component,
            base: None,
            params: vec![MemberMetadata {
                name: "Label".to_string(),
                ty: "string".to_string(),
                default: None,
            }],
            fields: vec![],
        });
        image
    }

    #[test]
    fn test_image_bytes_are_stable() {
        let a = sample().to_bytes().unwrap();
        let b = sample().to_bytes().unwrap();
        assert_eq!(a, b);
        assert_eq!(identity(&a), identity(&b));
        assert_eq!(ModuleImage::from_bytes(&a).unwrap(), sample());
    }

    #[test]
    fn test_rejects_bad_magic() {
        assert!(matches!(
            ModuleImage::from_bytes(b"MZ\x90\x00garbage-bytes"),
            Err(ImageError::BadMagic)
        ));
        assert!(matches!(ModuleImage::from_bytes(&[]), Err(ImageError::Empty)));
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(
            ModuleImage::from_bytes(&bytes),
            Err(ImageError::Truncated { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[MODULE_MAGIC.len()] = 9;
        assert!(matches!(
            ModuleImage::from_bytes(&bytes),
            Err(ImageError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_param_lookup_ignores_case() {
        let image = sample();
        let button = &image.types[0];
        assert_eq!(button.full_name(), "Sandbox.Components.Button");
        assert!(button.param("label").is_none());
        assert_eq!(button.param_ignore_case("label").unwrap().name, "Label");
    }
}
