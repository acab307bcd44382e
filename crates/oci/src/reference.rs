//! Parsing and normalization of registry references

use std::{fmt, str::FromStr};

use oci_distribution::Reference;

use crate::error::{Error, Result};

/// Tag used when a reference names neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

/// A normalized, fully registry-qualified reference to a bundle or image.
///
/// Bare names are qualified with the Docker Hub domain (and the `library/`
/// namespace for single-segment names) and default to the `latest` tag,
/// following the standard container image reference rules.
#[derive(Clone)]
pub struct BundleReference(Reference);

/// Image references embedded in bundles follow the same rules.
pub type ImageReference = BundleReference;

/// Parse `reference` into a normalized [`BundleReference`].
pub fn parse_reference(reference: &str) -> Result<BundleReference> {
    let parsed = reference
        .trim()
        .parse::<Reference>()
        .map_err(|e| Error::InvalidReferenceFormat {
            reference: reference.to_owned(),
            reason: e.to_string(),
        })?;
    Ok(BundleReference(parsed))
}

impl BundleReference {
    /// The registry domain, e.g. `ghcr.io` or `localhost:5000`.
    pub fn domain(&self) -> &str {
        self.0.registry()
    }

    /// The repository path within the registry, e.g. `library/nginx`.
    pub fn repository(&self) -> &str {
        self.0.repository()
    }

    /// The tag, if the reference has one.
    pub fn tag(&self) -> Option<&str> {
        self.0.tag()
    }

    /// The digest, if the reference has one.
    pub fn digest(&self) -> Option<&str> {
        self.0.digest()
    }

    /// The repository path without its final segment; empty for
    /// single-segment repositories.
    pub fn namespace(&self) -> &str {
        self.repository()
            .rsplit_once('/')
            .map(|(namespace, _)| namespace)
            .unwrap_or("")
    }

    /// The final segment of the repository path.
    pub fn name(&self) -> &str {
        self.repository()
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or_else(|| self.repository())
    }

    /// This reference pinned to `digest`, dropping any tag.
    pub fn with_digest(&self, digest: &str) -> Self {
        Self(Reference::with_digest(
            self.domain().to_owned(),
            self.repository().to_owned(),
            digest.to_owned(),
        ))
    }

    /// Returns true if both references live on the same registry.
    pub fn same_domain(&self, other: &BundleReference) -> bool {
        self.domain() == other.domain()
    }

    /// The repository `image` is copied to when relocated next to the bundle
    /// at `self`: same domain and namespace as the bundle, named after the
    /// image, tagged like the source.
    pub fn relocation_target(&self, image: &ImageReference) -> Self {
        let tag = match (image.tag(), image.digest()) {
            (Some(tag), _) => tag.to_owned(),
            // Tags cannot contain ':', so `sha256:abc` becomes `sha256-abc`
            (None, Some(digest)) => digest.replace(':', "-"),
            (None, None) => DEFAULT_TAG.to_owned(),
        };
        Self(Reference::with_tag(
            self.domain().to_owned(),
            self.relocated_repository(image),
            tag,
        ))
    }

    /// The digest-pinned reference recorded in a relocation map once
    /// `image` has been copied next to the bundle at `self`.
    pub fn relocate(&self, image: &ImageReference, digest: &str) -> Self {
        Self(Reference::with_digest(
            self.domain().to_owned(),
            self.relocated_repository(image),
            digest.to_owned(),
        ))
    }

    fn relocated_repository(&self, image: &ImageReference) -> String {
        match self.namespace() {
            "" => image.name().to_owned(),
            namespace => format!("{namespace}/{}", image.name()),
        }
    }

    /// The underlying `oci_distribution` reference.
    pub fn as_oci(&self) -> &Reference {
        &self.0
    }
}

impl FromStr for BundleReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_reference(s)
    }
}

impl fmt::Display for BundleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.whole())
    }
}

impl fmt::Debug for BundleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BundleReference").field(&self.0.whole()).finish()
    }
}

impl PartialEq for BundleReference {
    fn eq(&self, other: &Self) -> bool {
        self.0.whole() == other.0.whole()
    }
}

impl Eq for BundleReference {}

impl From<BundleReference> for Reference {
    fn from(reference: BundleReference) -> Self {
        reference.0
    }
}
