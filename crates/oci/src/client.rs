//! Registry transport speaking the OCI distribution protocol.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ferry_bundle::{Bundle, RelocationMap};
use ferry_common::sha256::{content_digest_from_bytes, is_content_digest};
use oci_distribution::{
    client::{ClientConfig, ClientProtocol, Config, ImageLayer},
    manifest::{
        OciImageManifest, OciManifest, IMAGE_MANIFEST_LIST_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE,
        OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
    },
    RegistryOperation,
};
use reqwest::Url;

use crate::{
    endpoint::RegistryEndpoint,
    reference::BundleReference,
    transport::{RegistryTransport, StoredBundle},
};

/// Media type of the config blob holding the bundle document.
pub const CNAB_CONFIG_MEDIA_TYPE: &str = "application/vnd.cnab.config.v1+json";
/// Media type of the layer holding the relocation map.
pub const RELOCATION_MAP_MEDIA_TYPE: &str = "application/vnd.cnab.relocation-map.v1+json";

/// Every manifest an image reference may point at, indexes included.
const ANY_MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_IMAGE_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE,
    IMAGE_MANIFEST_LIST_MEDIA_TYPE,
];

/// Registry transport speaking the OCI distribution protocol.
///
/// A bundle is stored as an OCI image manifest whose config blob is the
/// bundle document and whose single layer is the relocation map.
#[derive(Clone, Debug, Default)]
pub struct OciTransport {
    _private: (),
}

impl OciTransport {
    /// Create a new transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client for talking to the registry of `reference`.
    fn client_for(
        endpoint: &RegistryEndpoint,
        reference: &BundleReference,
    ) -> oci_distribution::Client {
        oci_distribution::Client::new(Self::build_config(endpoint, reference.domain()))
    }

    /// Build the OCI client configuration for `domain`. Transport security is
    /// only relaxed if the endpoint allowlists that exact domain.
    fn build_config(endpoint: &RegistryEndpoint, domain: &str) -> ClientConfig {
        if endpoint.is_insecure(domain) {
            ClientConfig {
                protocol: ClientProtocol::HttpsExcept(vec![domain.to_owned()]),
                accept_invalid_certificates: true,
                ..Default::default()
            }
        } else {
            ClientConfig {
                protocol: ClientProtocol::Https,
                ..Default::default()
            }
        }
    }
}

#[async_trait]
impl RegistryTransport for OciTransport {
    async fn pull(
        &self,
        endpoint: &RegistryEndpoint,
        reference: &BundleReference,
    ) -> Result<StoredBundle> {
        let client = Self::client_for(endpoint, reference);
        let auth = endpoint.auth_for(reference);

        let (manifest, digest) = client
            .pull_image_manifest(reference.as_oci(), &auth)
            .await
            .context("cannot pull bundle manifest")?;
        tracing::debug!("Pulled manifest {digest} for {reference}");

        if manifest.config.media_type != CNAB_CONFIG_MEDIA_TYPE {
            bail!(
                "{reference} is not a bundle: config has media type {}, expected {CNAB_CONFIG_MEDIA_TYPE}",
                manifest.config.media_type
            );
        }

        let mut cfg_bytes = Vec::new();
        client
            .pull_blob(reference.as_oci(), &manifest.config, &mut cfg_bytes)
            .await
            .context("cannot pull bundle config")?;
        let bundle = Bundle::from_json(&cfg_bytes).context("cannot parse bundle document")?;

        let mut relocation_map = RelocationMap::new();
        for layer in &manifest.layers {
            if layer.media_type != RELOCATION_MAP_MEDIA_TYPE {
                tracing::debug!("Skipping layer {} ({})", layer.digest, layer.media_type);
                continue;
            }
            let mut bytes = Vec::new();
            client
                .pull_blob(reference.as_oci(), layer, &mut bytes)
                .await
                .context("cannot pull relocation map")?;
            relocation_map =
                RelocationMap::from_json(&bytes).context("cannot parse relocation map")?;
        }

        Ok(StoredBundle {
            bundle,
            relocation_map,
            digest: Some(digest),
        })
    }

    async fn push(
        &self,
        endpoint: &RegistryEndpoint,
        reference: &BundleReference,
        bundle: &Bundle,
        relocation_map: Option<&RelocationMap>,
    ) -> Result<String> {
        let client = Self::client_for(endpoint, reference);
        let auth = endpoint.auth_for(reference);

        let oci_config = Config {
            data: bundle.to_json()?,
            media_type: CNAB_CONFIG_MEDIA_TYPE.to_string(),
            annotations: None,
        };
        // The relocation map layer is always written, empty or not, so every
        // bundle manifest has the same shape.
        let empty = RelocationMap::new();
        let layers = vec![ImageLayer::new(
            relocation_map.unwrap_or(&empty).to_json()?,
            RELOCATION_MAP_MEDIA_TYPE.to_string(),
            None,
        )];
        let manifest = OciImageManifest::build(&layers, &oci_config, None);

        let manifest_url = client
            .push(reference.as_oci(), &layers, oci_config, &auth, Some(manifest))
            .await
            .map(|push_response| push_response.manifest_url)
            .context("cannot push bundle")?;
        tracing::info!("Pushed {:?}", manifest_url);

        match digest_from_url(&manifest_url) {
            Some(digest) => Ok(digest),
            None => client
                .fetch_manifest_digest(reference.as_oci(), &auth)
                .await
                .context("cannot determine digest of pushed bundle"),
        }
    }

    async fn copy_image(
        &self,
        endpoint: &RegistryEndpoint,
        source: &BundleReference,
        destination: &BundleReference,
    ) -> Result<String> {
        let source_client = Self::client_for(endpoint, source);
        let source_auth = endpoint.auth_for(source);
        let destination_client = Self::client_for(endpoint, destination);
        let destination_auth = endpoint.auth_for(destination);

        // Manifests are copied byte for byte so the digest pinned in the
        // bundle stays valid at the destination.
        let (bytes, reported_digest) = source_client
            .pull_manifest_raw(source.as_oci(), &source_auth, ANY_MANIFEST_MEDIA_TYPES)
            .await
            .with_context(|| format!("cannot pull image manifest for {source}"))?;
        let digest = match source.digest() {
            Some(pinned) => check_manifest_digest(&bytes, pinned)?,
            None => content_digest_from_bytes(&bytes),
        };
        if digest != reported_digest {
            tracing::debug!("{source} reported digest {reported_digest}, content is {digest}");
        }
        let manifest = parse_manifest(&bytes)?;

        destination_client
            .auth(
                destination.as_oci(),
                &destination_auth,
                RegistryOperation::Push,
            )
            .await
            .with_context(|| format!("cannot authenticate to push {destination}"))?;

        match &manifest {
            OciManifest::Image(image) => {
                copy_blobs(&source_client, source, &destination_client, destination, image).await?;
            }
            OciManifest::ImageIndex(index) => {
                for entry in &index.manifests {
                    let child_source = source.with_digest(&entry.digest);
                    let child_destination = destination.with_digest(&entry.digest);
                    tracing::debug!("Copying platform manifest {child_source}");

                    let (child_bytes, _) = source_client
                        .pull_manifest_raw(child_source.as_oci(), &source_auth, ANY_MANIFEST_MEDIA_TYPES)
                        .await
                        .with_context(|| format!("cannot pull image manifest for {child_source}"))?;
                    check_manifest_digest(&child_bytes, &entry.digest)?;
                    let OciManifest::Image(image) = parse_manifest(&child_bytes)? else {
                        bail!("{source} is an image index nesting another index at {}", entry.digest);
                    };
                    copy_blobs(
                        &source_client,
                        &child_source,
                        &destination_client,
                        &child_destination,
                        &image,
                    )
                    .await?;
                    push_raw_manifest(
                        &destination_client,
                        &child_destination,
                        &OciManifest::Image(image),
                        child_bytes,
                    )
                    .await?;
                }
            }
        }

        push_raw_manifest(&destination_client, destination, &manifest, bytes).await?;
        Ok(digest)
    }

    async fn resolve_digest(
        &self,
        endpoint: &RegistryEndpoint,
        reference: &BundleReference,
    ) -> Result<String> {
        let client = Self::client_for(endpoint, reference);
        let auth = endpoint.auth_for(reference);
        client
            .fetch_manifest_digest(reference.as_oci(), &auth)
            .await
            .with_context(|| format!("cannot determine digest of {reference}"))
    }
}

async fn copy_blobs(
    source_client: &oci_distribution::Client,
    source: &BundleReference,
    destination_client: &oci_distribution::Client,
    destination: &BundleReference,
    manifest: &OciImageManifest,
) -> Result<()> {
    for descriptor in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
        tracing::debug!(
            "Copying blob {} from {} to {}",
            descriptor.digest,
            source,
            destination
        );
        let mut bytes = Vec::new();
        source_client
            .pull_blob(source.as_oci(), descriptor, &mut bytes)
            .await
            .with_context(|| format!("cannot pull blob {}", descriptor.digest))?;
        destination_client
            .push_blob(destination.as_oci(), &bytes, &descriptor.digest)
            .await
            .with_context(|| format!("cannot push blob {}", descriptor.digest))?;
    }
    Ok(())
}

async fn push_raw_manifest(
    client: &oci_distribution::Client,
    destination: &BundleReference,
    manifest: &OciManifest,
    bytes: Vec<u8>,
) -> Result<()> {
    let content_type = manifest
        .content_type()
        .parse()
        .with_context(|| format!("invalid manifest media type {}", manifest.content_type()))?;
    client
        .push_manifest_raw(destination.as_oci(), bytes, content_type)
        .await
        .with_context(|| format!("cannot push image manifest to {destination}"))?;
    Ok(())
}

fn parse_manifest(bytes: &[u8]) -> Result<OciManifest> {
    serde_json::from_slice(bytes).context("cannot parse image manifest")
}

/// Returns the content digest of `bytes`, failing unless it is `expected`.
fn check_manifest_digest(bytes: &[u8], expected: &str) -> Result<String> {
    let actual = content_digest_from_bytes(bytes);
    if actual != expected {
        bail!("manifest digest mismatch: expected {expected}, registry served {actual}");
    }
    Ok(actual)
}

fn digest_from_url(manifest_url: &str) -> Option<String> {
    // The URL is in the form "https://host/v2/refname/manifests/sha256:..."
    let manifest_url = Url::parse(manifest_url).ok()?;
    let segments = manifest_url.path_segments()?;
    let last = segments.last()?;
    is_content_digest(last).then(|| last.to_owned())
}
