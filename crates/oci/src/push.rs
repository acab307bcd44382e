use ferry_bundle::{Bundle, RelocationMap};

use crate::{
    endpoint::RegistryEndpoint,
    error::{Error, Operation, Result},
    fixup::{fixup_bundle, CopiedImage},
    reference::BundleReference,
    registry::Registry,
    transport::RegistryTransport,
};

/// The outcome of publishing a bundle.
#[derive(Clone, Debug, PartialEq)]
pub struct PushedBundle {
    /// The bundle as published, with digests describing the relocated images.
    pub bundle: Bundle,
    /// Where the bundle's images are hosted, if any were relocated.
    pub relocation_map: Option<RelocationMap>,
    /// Content digest of the published bundle manifest.
    pub digest: String,
    /// Images copied to the destination by this push.
    pub copied: Vec<CopiedImage>,
}

impl<T: RegistryTransport> Registry<T> {
    /// Push `bundle` to `destination`, first copying every image not yet on
    /// the destination registry and recording the copies in the relocation
    /// map.
    ///
    /// If any image copy fails, the bundle is not published.
    pub async fn push_bundle(
        &self,
        bundle: Bundle,
        destination: &BundleReference,
        relocation_map: Option<RelocationMap>,
        insecure: bool,
    ) -> Result<PushedBundle> {
        let endpoint = self.endpoints.create(destination, insecure).await?;
        self.push_to(&endpoint, bundle, destination, relocation_map)
            .await
    }

    pub(crate) async fn push_to(
        &self,
        endpoint: &RegistryEndpoint,
        mut bundle: Bundle,
        destination: &BundleReference,
        relocation_map: Option<RelocationMap>,
    ) -> Result<PushedBundle> {
        bundle.validate().map_err(|e| Error::InvalidBundle {
            reference: destination.to_string(),
            reason: e.to_string(),
        })?;

        let mut relocation_map = RelocationMap::from_option(relocation_map);
        let summary = fixup_bundle(
            &self.transport,
            endpoint,
            &mut bundle,
            destination,
            &mut relocation_map,
            self.reporter.as_ref(),
            self.options.max_concurrent_copies,
        )
        .await?;
        let relocation_map = relocation_map.into_option();

        let digest = self
            .transport
            .push(endpoint, destination, &bundle, relocation_map.as_ref())
            .await
            .map_err(|e| Error::transport(Operation::Push, destination, e))?;

        tracing::info!("Pushed bundle {destination}@{digest}");
        self.say(format_args!(
            "Bundle tag {destination} pushed successfully, with digest {digest:?}"
        ));

        Ok(PushedBundle {
            bundle,
            relocation_map,
            digest,
            copied: summary.copied,
        })
    }
}
