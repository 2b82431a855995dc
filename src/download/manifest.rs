//! Batch manifests: JSON arrays of `{name, url, type}`

use crate::error::{Error, Result};
use crate::types::ArtifactDescriptor;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Upper bound on a manifest request
pub const MANIFEST_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse a manifest document
///
/// Kinds are not checked here; an unknown `type` is reported when the batch
/// is validated. An empty array is rejected.
pub fn parse_manifest(content: &str) -> Result<Vec<ArtifactDescriptor>> {
    let descriptors: Vec<ArtifactDescriptor> = serde_json::from_str(content)
        .map_err(|e| Error::InvalidManifest(format!("expected an array of {{name, url, type}}: {e}")))?;
    if descriptors.is_empty() {
        return Err(Error::InvalidManifest("manifest lists no artifacts".to_string()));
    }
    Ok(descriptors)
}

/// Fetch and parse a remote manifest
pub async fn fetch_manifest(client: &reqwest::Client, url: &str) -> Result<Vec<ArtifactDescriptor>> {
    let response = client
        .get(url)
        .timeout(MANIFEST_FETCH_TIMEOUT)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(Error::InvalidManifest(format!(
            "HTTP error fetching manifest: {} {}",
            response.status(),
            url
        )));
    }

    let body = response.text().await?;
    let descriptors = parse_manifest(&body)?;
    debug!(url, count = descriptors.len(), "fetched manifest");
    Ok(descriptors)
}

/// Read and parse a manifest file
pub async fn load_manifest_file(path: &Path) -> Result<Vec<ArtifactDescriptor>> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_manifest(&content)
}
