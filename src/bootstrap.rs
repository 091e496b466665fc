//! Bootstrap loading of the base reference set.
//!
//! The session starts from a few root platform binaries. Each root's image
//! lists the modules it depends on directly; those are fetched too, so the
//! compiler sees the whole platform surface the roots were built against.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashSet;

use crate::cache::ReferenceSet;
use crate::error::{FetchError, SessionError};
use crate::image::ModuleImage;

/// Fetches platform binaries by logical name.
#[async_trait]
pub trait BinarySource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, FetchError>;
}

/// Build the initial reference set from `roots` and their direct dependencies.
///
/// Every fetch runs concurrently within its round. Any failure aborts the whole
/// load; nothing partial is returned.
pub async fn load_references(
    source: &dyn BinarySource,
    roots: &[String],
) -> Result<ReferenceSet, SessionError> {
    let mut wanted: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for root in roots {
        if seen.insert(root.clone()) {
            wanted.push(root.clone());
        }
    }

    let root_images = fetch_all(source, &wanted).await?;

    let missing: Vec<String> = root_images
        .iter()
        .flat_map(|(_, _, image)| image.references.iter())
        .filter(|name| seen.insert((*name).clone()))
        .cloned()
        .collect();
    tracing::debug!(
        roots = wanted.len(),
        dependencies = missing.len(),
        "fetching bootstrap dependencies"
    );
    let dependency_images = fetch_all(source, &missing).await?;

    let mut loaded: Vec<(String, Vec<u8>, ModuleImage)> = root_images;
    loaded.extend(dependency_images);
    loaded.sort_by(|a, b| a.0.cmp(&b.0));

    let mut set = ReferenceSet::new();
    for (_, bytes, image) in loaded {
        set.push(&bytes, image);
    }
    Ok(set)
}

async fn fetch_all(
    source: &dyn BinarySource,
    names: &[String],
) -> Result<Vec<(String, Vec<u8>, ModuleImage)>, SessionError> {
    let fetches = names.iter().map(|name| async move {
        let bytes = source.fetch(name).await?;
        let image = ModuleImage::from_bytes(&bytes).map_err(|err| {
            SessionError::InvalidBootstrapBinary {
                name: name.clone(),
                source: err,
            }
        })?;
        Ok::<_, SessionError>((name.clone(), bytes, image))
    });
    try_join_all(fetches).await
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP SOURCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Fetches `<base_url>/<name>.<extension>` over HTTP.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpBinarySource {
    client: reqwest::Client,
    base_url: String,
    extension: String,
}

#[cfg(feature = "http")]
impl HttpBinarySource {
    pub fn new(base_url: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            extension: extension.into(),
        }
    }

    pub fn from_options(options: &crate::config::SessionOptions) -> Self {
        Self::new(&options.static_base_url, &options.binary_extension)
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}.{}", self.base_url, name, self.extension)
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl BinarySource for HttpBinarySource {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.url_for(name);
        tracing::debug!(%url, "fetching binary");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(name.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                name: name.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Network {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}
