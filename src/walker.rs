//! Dependency Walker
//!
//! Resolves one package request to its transitive closure, breadth first.
//! Each level's registry lookups run concurrently. The shallowest request for
//! a package decides its version (nearest wins), and within a range the lowest
//! satisfying version is chosen.

use futures::future::try_join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::error::ResolveError;
use crate::extract::PlatformTag;
use crate::registry::{PackageDependency, PackageIdentity, PackageManifest, PackageRegistry};
use crate::version::{Version, VersionRange};

/// One resolved package in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGraphNode {
    pub identity: PackageIdentity,
    pub dependencies: Vec<PackageDependency>,
    /// 0 for the requested package.
    pub depth: usize,
}

/// A request the nearest-wins choice did not satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionConflict {
    pub id: String,
    pub requested: VersionRange,
    pub resolved: Version,
    pub required_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseInfo {
    pub identity: PackageIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkResult {
    /// Resolution order: shallower packages first, siblings in declaration order.
    pub packages_to_install: Vec<DependencyGraphNode>,
    pub license_acceptance: Vec<LicenseInfo>,
    pub conflicts: Vec<VersionConflict>,
}

impl WalkResult {
    pub fn contains(&self, id: &str) -> bool {
        self.packages_to_install
            .iter()
            .any(|n| n.identity.id.eq_ignore_ascii_case(id))
    }
}

#[derive(Debug, Clone)]
struct PendingRequest {
    id: String,
    range: VersionRange,
    /// Ancestors from the root down to the requester.
    path: Vec<String>,
}

impl PendingRequest {
    fn chain(&self) -> Vec<String> {
        let mut chain = self.path.clone();
        chain.push(self.id.clone());
        chain
    }
}

pub struct DependencyWalker<'a> {
    registry: &'a dyn PackageRegistry,
    platform: PlatformTag,
}

impl<'a> DependencyWalker<'a> {
    pub fn new(registry: &'a dyn PackageRegistry, platform: PlatformTag) -> Self {
        Self { registry, platform }
    }

    pub async fn walk(&self, id: &str, range: &VersionRange) -> Result<WalkResult, ResolveError> {
        let mut result = WalkResult::default();
        // Lowercased id -> chosen version, for this attempt only.
        let mut resolved: HashMap<String, Version> = HashMap::new();

        let mut level = vec![PendingRequest {
            id: id.to_string(),
            range: range.clone(),
            path: Vec::new(),
        }];
        let mut depth = 0;

        while !level.is_empty() {
            let mut to_fetch: Vec<PendingRequest> = Vec::new();
            let mut deferred: Vec<PendingRequest> = Vec::new();
            let mut fetching: HashSet<String> = HashSet::new();

            for request in level {
                if request.path.iter().any(|a| a.eq_ignore_ascii_case(&request.id)) {
                    return Err(ResolveError::Cycle {
                        path: request.chain(),
                    });
                }
                let key = request.id.to_ascii_lowercase();
                if resolved.contains_key(&key) || !fetching.insert(key) {
                    deferred.push(request);
                } else {
                    to_fetch.push(request);
                }
            }

            let manifests = try_join_all(to_fetch.iter().map(|request| self.resolve_one(request))).await?;

            let mut next = Vec::new();
            for (request, manifest) in to_fetch.iter().zip(manifests) {
                tracing::debug!(
                    package = %manifest.id,
                    version = %manifest.version,
                    depth,
                    "resolved package"
                );
                resolved.insert(request.id.to_ascii_lowercase(), manifest.version.clone());

                let dependencies = manifest.dependencies_for(&self.platform).to_vec();
                let chain = request.chain();
                next.extend(dependencies.iter().map(|dep| PendingRequest {
                    id: dep.id.clone(),
                    range: dep.range.clone(),
                    path: chain.clone(),
                }));

                if manifest.require_license_acceptance {
                    result.license_acceptance.push(LicenseInfo {
                        identity: manifest.identity(),
                        license_url: manifest.license_url.clone(),
                    });
                }
                result.packages_to_install.push(DependencyGraphNode {
                    identity: manifest.identity(),
                    dependencies,
                    depth,
                });
            }

            for request in deferred {
                let Some(chosen) = resolved.get(&request.id.to_ascii_lowercase()) else {
                    continue;
                };
                if !request.range.satisfies(chosen) {
                    let required_by = request.path.last().cloned().unwrap_or_default();
                    tracing::warn!(
                        package = %request.id,
                        requested = %request.range,
                        resolved = %chosen,
                        required_by = %required_by,
                        "version conflict; keeping nearest resolution"
                    );
                    result.conflicts.push(VersionConflict {
                        id: request.id.clone(),
                        requested: request.range.clone(),
                        resolved: chosen.clone(),
                        required_by,
                    });
                }
            }

            level = next;
            depth += 1;
        }

        tracing::info!(
            package = %id,
            packages = result.packages_to_install.len(),
            conflicts = result.conflicts.len(),
            "dependency walk finished"
        );
        Ok(result)
    }

    async fn resolve_one(&self, request: &PendingRequest) -> Result<PackageManifest, ResolveError> {
        let versions = self.registry.versions(&request.id).await?;
        let Some(version) = request.range.find_lowest(&versions) else {
            return Err(ResolveError::NoMatchingVersion {
                name: request.id.clone(),
                range: request.range.to_string(),
                chain: request.chain(),
            });
        };
        Ok(self.registry.manifest(&request.id, version).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryRegistry;

    fn walker(registry: &MemoryRegistry) -> DependencyWalker<'_> {
        DependencyWalker::new(registry, PlatformTag::new("net5.0"))
    }

    fn range(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    fn ids(result: &WalkResult) -> Vec<String> {
        result
            .packages_to_install
            .iter()
            .map(|n| n.identity.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_picks_lowest_satisfying_version() {
        let registry = MemoryRegistry::new()
            .package("A", "1.0.0", &[("B", ">=1.0.0 <2.0.0")])
            .package("B", "1.0.0", &[])
            .package("B", "1.5.0", &[])
            .package("B", "2.0.0", &[]);

        let result = walker(&registry).walk("A", &range("1.0.0")).await.unwrap();
        assert_eq!(ids(&result), vec!["A 1.0.0", "B 1.0.0"]);
        assert_eq!(result.packages_to_install[1].depth, 1);
    }

    #[tokio::test]
    async fn test_diamond_resolves_shared_dependency_once() {
        let registry = MemoryRegistry::new()
            .package("A", "1.0.0", &[("B", "1.0.0"), ("C", "1.0.0")])
            .package("B", "1.0.0", &[("D", "1.0.0")])
            .package("C", "1.0.0", &[("D", "1.0.0")])
            .package("D", "1.0.0", &[]);

        let result = walker(&registry).walk("A", &range("1.0.0")).await.unwrap();
        assert_eq!(ids(&result), vec!["A 1.0.0", "B 1.0.0", "C 1.0.0", "D 1.0.0"]);
        assert!(result.conflicts.is_empty());
        assert_eq!(registry.manifest_requests("D"), 1);
    }

    #[tokio::test]
    async fn test_nearest_wins_and_records_conflict() {
        let registry = MemoryRegistry::new()
            .package("A", "1.0.0", &[("B", "1.0.0"), ("D", "[1.0.0]")])
            .package("B", "1.0.0", &[("D", "2.0.0")])
            .package("D", "1.0.0", &[])
            .package("D", "2.0.0", &[]);

        let result = walker(&registry).walk("A", &range("1.0.0")).await.unwrap();
        assert_eq!(ids(&result), vec!["A 1.0.0", "B 1.0.0", "D 1.0.0"]);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].id, "D");
        assert_eq!(result.conflicts[0].required_by, "B");
    }

    #[tokio::test]
    async fn test_cycle_is_an_error() {
        let registry = MemoryRegistry::new()
            .package("A", "1.0.0", &[("B", "1.0.0")])
            .package("B", "1.0.0", &[("A", "1.0.0")]);

        let err = walker(&registry).walk("A", &range("1.0.0")).await.unwrap_err();
        match err {
            ResolveError::Cycle { path } => assert_eq!(path, vec!["A", "B", "A"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_names_the_node() {
        let registry = MemoryRegistry::new()
            .package("A", "1.0.0", &[("B", "[3.0.0]")])
            .package("B", "1.0.0", &[]);

        let err = walker(&registry).walk("A", &range("1.0.0")).await.unwrap_err();
        match err {
            ResolveError::NoMatchingVersion { name, chain, .. } => {
                assert_eq!(name, "B");
                assert_eq!(chain, vec!["A", "B"]);
            }
            other => panic!("expected no matching version, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_license_acceptance_is_collected() {
        let registry = MemoryRegistry::new()
            .package("A", "1.0.0", &[("B", "1.0.0")])
            .package("B", "1.0.0", &[])
            .require_license("B", "1.0.0", "https://example.test/license");

        let result = walker(&registry).walk("A", &range("1.0.0")).await.unwrap();
        assert_eq!(result.license_acceptance.len(), 1);
        assert_eq!(result.license_acceptance[0].identity.id, "B");
    }

    #[tokio::test]
    async fn test_platform_specific_group() {
        let registry = MemoryRegistry::new()
            .package_with_groups(
                "A",
                "1.0.0",
                vec![
                    (None, vec![("Generic", "1.0.0")]),
                    (Some("net5.0"), vec![("Net5Only", "1.0.0")]),
                ],
            )
            .package("Generic", "1.0.0", &[])
            .package("Net5Only", "1.0.0", &[]);

        let result = walker(&registry).walk("A", &range("1.0.0")).await.unwrap();
        assert!(result.contains("Net5Only"));
        assert!(!result.contains("Generic"));
    }
}
