use ferry_bundle::{Bundle, RelocationMap};

use crate::{
    endpoint::RegistryEndpoint,
    error::{Error, Operation, Result},
    reference::BundleReference,
    registry::Registry,
    transport::{RegistryTransport, StoredBundle},
};

/// A bundle retrieved from a registry.
#[derive(Clone, Debug, PartialEq)]
pub struct PulledBundle {
    /// The bundle document.
    pub bundle: Bundle,
    /// Where the bundle's images are hosted, if any were relocated.
    pub relocation_map: Option<RelocationMap>,
    /// Content digest of the bundle manifest, when the registry reported one.
    pub digest: Option<String>,
}

impl<T: RegistryTransport> Registry<T> {
    /// Pull the bundle at `reference`, relaxing transport security for its
    /// domain if `insecure` is set.
    ///
    /// The bundle's primary invocation image must carry a content digest;
    /// otherwise the pull fails with [`Error::MissingContentDigest`].
    pub async fn pull_bundle(
        &self,
        reference: &BundleReference,
        insecure: bool,
    ) -> Result<PulledBundle> {
        let endpoint = self.endpoints.create(reference, insecure).await?;
        self.pull_from(&endpoint, reference).await
    }

    pub(crate) async fn pull_from(
        &self,
        endpoint: &RegistryEndpoint,
        reference: &BundleReference,
    ) -> Result<PulledBundle> {
        let insecure = endpoint.is_insecure(reference.domain());
        tracing::debug!("Pulling bundle {reference} (insecure: {insecure})");
        if self.options.verbose {
            let suffix = if insecure { " with --insecure-registry" } else { "" };
            self.say(format_args!("Pulling bundle {reference}{suffix}"));
        }

        let StoredBundle {
            bundle,
            relocation_map,
            digest,
        } = self
            .transport
            .pull(endpoint, reference)
            .await
            .map_err(|e| Error::transport(Operation::Pull, reference, e))?;

        verify_invocation_digest(&bundle, reference)?;

        Ok(PulledBundle {
            bundle,
            relocation_map: relocation_map.into_option(),
            digest,
        })
    }
}

/// An undigested primary image could have been swapped at its source after
/// the bundle was published, so such bundles are never handed to callers.
fn verify_invocation_digest(bundle: &Bundle, reference: &BundleReference) -> Result<()> {
    let invocation = bundle
        .invocation_image()
        .ok_or_else(|| Error::InvalidBundle {
            reference: reference.to_string(),
            reason: "bundle does not declare an invocation image".into(),
        })?;
    match invocation.base.digest() {
        Some(_) => Ok(()),
        None => Err(Error::MissingContentDigest {
            image: invocation.base.image.clone(),
        }),
    }
}
