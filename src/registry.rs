//! Package registry access.
//!
//! The registry answers three questions: which versions of a package exist,
//! what a given version depends on, and what its archive contains. The HTTP
//! implementation speaks the flat-container layout with lowercase ids.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RegistryError;
use crate::extract::PlatformTag;
use crate::version::{Version, VersionRange};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageIdentity {
    pub id: String,
    pub version: Version,
}

impl PackageIdentity {
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDependency {
    pub id: String,
    pub range: VersionRange,
}

/// Dependencies that apply to one platform, or to all when `target` is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGroup {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<PackageDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub id: String,
    pub version: Version,
    #[serde(default)]
    pub require_license_acceptance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_url: Option<String>,
    #[serde(default)]
    pub dependency_groups: Vec<DependencyGroup>,
}

impl PackageManifest {
    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(self.id.clone(), self.version.clone())
    }

    /// The group targeting `platform`, else the untargeted group, else nothing.
    pub fn dependencies_for(&self, platform: &PlatformTag) -> &[PackageDependency] {
        let targeted = self.dependency_groups.iter().find(|g| {
            g.target
                .as_deref()
                .is_some_and(|t| PlatformTag::new(t) == *platform)
        });
        targeted
            .or_else(|| self.dependency_groups.iter().find(|g| g.target.is_none()))
            .map(|g| g.dependencies.as_slice())
            .unwrap_or(&[])
    }
}

#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Every published version of `id`. Unknown packages fail with `PackageNotFound`.
    async fn versions(&self, id: &str) -> Result<Vec<Version>, RegistryError>;

    async fn manifest(&self, id: &str, version: &Version) -> Result<PackageManifest, RegistryError>;

    /// Raw archive bytes.
    async fn download(&self, id: &str, version: &Version) -> Result<Vec<u8>, RegistryError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
    archive_extension: String,
}

#[cfg(feature = "http")]
#[derive(Deserialize)]
struct VersionIndex {
    versions: Vec<String>,
}

#[cfg(feature = "http")]
impl HttpRegistry {
    pub fn new(base_url: impl Into<String>, archive_extension: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            archive_extension: archive_extension.into(),
        }
    }

    pub fn from_options(options: &crate::config::InstallerOptions) -> Self {
        Self::new(&options.registry_url, &options.archive_extension)
    }

    fn index_url(&self, id: &str) -> String {
        format!("{}/{}/index.json", self.base_url, id.to_ascii_lowercase())
    }

    fn package_url(&self, id: &str, version: &Version, extension: &str) -> String {
        let id = id.to_ascii_lowercase();
        let version = version.normalized();
        format!(
            "{}/{}/{}/{}.{}.{}",
            self.base_url, id, version, id, version, extension
        )
    }

    async fn get(&self, url: &str, id: &str) -> Result<Vec<u8>, RegistryError> {
        tracing::debug!(%url, "registry request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RegistryError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::PackageNotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(RegistryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| RegistryError::Network {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(body.to_vec())
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl PackageRegistry for HttpRegistry {
    async fn versions(&self, id: &str) -> Result<Vec<Version>, RegistryError> {
        let url = self.index_url(id);
        let body = self.get(&url, id).await?;
        let index: VersionIndex =
            serde_json::from_slice(&body).map_err(|e| RegistryError::InvalidResponse {
                url: url.clone(),
                message: e.to_string(),
            })?;

        // Unparseable entries are skipped rather than failing the whole package.
        let versions = index
            .versions
            .iter()
            .filter_map(|text| match Version::parse(text) {
                Ok(version) => Some(version),
                Err(_) => {
                    tracing::warn!(package = %id, version = %text, "skipping unparseable version");
                    None
                }
            })
            .collect();
        Ok(versions)
    }

    async fn manifest(&self, id: &str, version: &Version) -> Result<PackageManifest, RegistryError> {
        let url = self.package_url(id, version, "json");
        let body = self.get(&url, id).await?;
        serde_json::from_slice(&body).map_err(|e| RegistryError::InvalidResponse {
            url,
            message: e.to_string(),
        })
    }

    async fn download(&self, id: &str, version: &Version) -> Result<Vec<u8>, RegistryError> {
        let url = self.package_url(id, version, &self.archive_extension);
        self.get(&url, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_json() -> &'static str {
        r#"{
            "id": "Widgets.Charts",
            "version": "2.1.0",
            "requireLicenseAcceptance": true,
            "dependencyGroups": [
                { "dependencies": [ { "id": "Core.Any", "range": "1.0.0" } ] },
                { "target": "net5.0", "dependencies": [ { "id": "Core.Net5", "range": "[1.0,2.0)" } ] }
            ]
        }"#
    }

    #[test]
    fn test_manifest_dependency_groups() {
        let manifest: PackageManifest = serde_json::from_str(manifest_json()).unwrap();
        assert!(manifest.require_license_acceptance);
        assert_eq!(manifest.identity().to_string(), "Widgets.Charts 2.1.0");

        let net5 = manifest.dependencies_for(&PlatformTag::new("net50"));
        assert_eq!(net5.len(), 1);
        assert_eq!(net5[0].id, "Core.Net5");

        let other = manifest.dependencies_for(&PlatformTag::new("net6.0"));
        assert_eq!(other[0].id, "Core.Any");
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_flat_container_urls() {
        let registry = HttpRegistry::new("https://feed.test/v3/", "nupkg");
        let version = Version::parse("1.0.0-Beta").unwrap();
        assert_eq!(registry.index_url("My.Pkg"), "https://feed.test/v3/my.pkg/index.json");
        assert_eq!(
            registry.package_url("My.Pkg", &version, "nupkg"),
            "https://feed.test/v3/my.pkg/1.0.0-beta/my.pkg.1.0.0-beta.nupkg"
        );
    }
}
