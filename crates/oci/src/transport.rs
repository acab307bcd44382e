//! The seam between bundle transfer logic and the wire protocol.

use anyhow::Result;
use async_trait::async_trait;
use ferry_bundle::{Bundle, RelocationMap};

use crate::{endpoint::RegistryEndpoint, reference::BundleReference};

/// A bundle as stored in a registry.
#[derive(Clone, Debug, Default)]
pub struct StoredBundle {
    /// The bundle document.
    pub bundle: Bundle,
    /// The relocation map stored alongside the bundle; empty if none was.
    pub relocation_map: RelocationMap,
    /// Content digest of the manifest the bundle was fetched from, when the
    /// registry reported one.
    pub digest: Option<String>,
}

/// Moves bundles and images to and from registries.
///
/// Implementations own the wire format entirely. Errors are returned as-is;
/// the caller annotates them with the operation and reference involved.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Fetch the bundle stored at `reference` together with its relocation
    /// map and manifest digest.
    async fn pull(
        &self,
        endpoint: &RegistryEndpoint,
        reference: &BundleReference,
    ) -> Result<StoredBundle>;

    /// Publish `bundle` and its relocation map at `reference`, returning the
    /// content digest of the published manifest.
    async fn push(
        &self,
        endpoint: &RegistryEndpoint,
        reference: &BundleReference,
        bundle: &Bundle,
        relocation_map: Option<&RelocationMap>,
    ) -> Result<String>;

    /// Copy the image at `source` to `destination`, returning the content
    /// digest of the image manifest at the destination.
    async fn copy_image(
        &self,
        endpoint: &RegistryEndpoint,
        source: &BundleReference,
        destination: &BundleReference,
    ) -> Result<String>;

    /// Look up the content digest of the image manifest at `reference`
    /// without copying anything.
    async fn resolve_digest(
        &self,
        endpoint: &RegistryEndpoint,
        reference: &BundleReference,
    ) -> Result<String>;
}

#[async_trait]
impl<T: RegistryTransport + ?Sized> RegistryTransport for std::sync::Arc<T> {
    async fn pull(
        &self,
        endpoint: &RegistryEndpoint,
        reference: &BundleReference,
    ) -> Result<StoredBundle> {
        (**self).pull(endpoint, reference).await
    }

    async fn push(
        &self,
        endpoint: &RegistryEndpoint,
        reference: &BundleReference,
        bundle: &Bundle,
        relocation_map: Option<&RelocationMap>,
    ) -> Result<String> {
        (**self).push(endpoint, reference, bundle, relocation_map).await
    }

    async fn copy_image(
        &self,
        endpoint: &RegistryEndpoint,
        source: &BundleReference,
        destination: &BundleReference,
    ) -> Result<String> {
        (**self).copy_image(endpoint, source, destination).await
    }

    async fn resolve_digest(
        &self,
        endpoint: &RegistryEndpoint,
        reference: &BundleReference,
    ) -> Result<String> {
        (**self).resolve_digest(endpoint, reference).await
    }
}
