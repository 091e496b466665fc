//! Option values for the compilation session and the package installer.
//!
//! Both structs deserialize from camelCase JSON so a host can hand over its
//! configuration verbatim; every field has a default.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
    /// Namespace that component files live in; folders append segments.
    pub root_namespace: String,
    /// Logical name of the emitted module.
    pub module_name: String,
    /// Imports added to every generated component.
    pub default_imports: Vec<String>,
    /// Root platform binaries fetched by `initialize`.
    pub bootstrap_binaries: Vec<String>,
    /// Base URL the binary source fetches from.
    pub static_base_url: String,
    pub binary_extension: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            root_namespace: "Sandbox.UserComponents".to_string(),
            module_name: "Sandbox.UserComponents".to_string(),
            default_imports: Vec::new(),
            bootstrap_binaries: vec!["Sandbox.Runtime".to_string()],
            static_base_url: "_framework".to_string(),
            binary_extension: "dll".to_string(),
        }
    }
}

impl SessionOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Name of the throwaway module built by the first pass.
    pub fn declaration_module_name(&self) -> String {
        format!("{}.Declarations", self.module_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallerOptions {
    pub registry_url: String,
    /// Platform tag binaries must be built for, e.g. `net5.0`.
    pub target: String,
    pub binary_extension: String,
    pub archive_extension: String,
    /// Static asset extensions kept regardless of platform folder.
    pub static_asset_extensions: Vec<String>,
}

impl Default for InstallerOptions {
    fn default() -> Self {
        Self {
            registry_url: "https://api.nuget.org/v3-flatcontainer".to_string(),
            target: "net5.0".to_string(),
            binary_extension: "dll".to_string(),
            archive_extension: "nupkg".to_string(),
            static_asset_extensions: vec!["js".to_string(), "css".to_string()],
        }
    }
}

impl InstallerOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
