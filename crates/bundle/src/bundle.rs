//! Bundle document (bundle.json) serialization models.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// A String-keyed map with deterministic serialization order.
pub type BundleMap<T> = std::collections::BTreeMap<String, T>;

/// The bundle schema version written by Ferry when none is given.
pub const DEFAULT_SCHEMA_VERSION: &str = "v1.2.0";

/// An application bundle: a set of container images plus metadata.
///
/// Fields Ferry does not interpret (parameters, credentials, outputs, custom
/// extensions and so on) are kept in `extra` so that pulling and pushing a
/// bundle never loses information.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    /// Bundle schema version
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Bundle name
    pub name: String,
    /// Bundle version
    pub version: String,
    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Search keywords
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Bundle maintainers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    /// Images that run the bundle. The first one is the primary image.
    #[serde(default)]
    pub invocation_images: Vec<InvocationImage>,
    /// Images used by the application, keyed by name
    #[serde(default, skip_serializing_if = "BundleMap::is_empty")]
    pub images: BundleMap<Image>,
    /// Every other top-level field, preserved verbatim
    #[serde(flatten)]
    pub extra: BundleMap<Value>,
}

fn default_schema_version() -> String {
    DEFAULT_SCHEMA_VERSION.to_owned()
}

/// A bundle maintainer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    /// Maintainer name
    pub name: String,
    /// Maintainer email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Maintainer URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Fields common to invocation images and application images.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseImage {
    /// Image type, e.g. "docker" or "oci"
    #[serde(default = "default_image_type")]
    pub image_type: String,
    /// Repository reference of the image as published by the bundle author
    pub image: String,
    /// Content digest (`sha256:...`) of the image manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    /// Size of the image manifest in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Media type of the image manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Image labels
    #[serde(default, skip_serializing_if = "BundleMap::is_empty")]
    pub labels: BundleMap<String>,
}

fn default_image_type() -> String {
    "oci".to_owned()
}

impl BaseImage {
    /// Create an image entry for the given repository reference.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image_type: default_image_type(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Returns the content digest if it is present and non-empty.
    pub fn digest(&self) -> Option<&str> {
        self.content_digest.as_deref().filter(|d| !d.is_empty())
    }
}

/// An image that runs the bundle's actions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationImage {
    /// Image fields
    #[serde(flatten)]
    pub base: BaseImage,
}

/// An image used by the application described by the bundle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image fields
    #[serde(flatten)]
    pub base: BaseImage,
    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Identifies one image entry within a bundle.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImageSlot {
    /// Index into `invocationImages`
    Invocation(usize),
    /// Key into `images`
    Named(String),
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSlot::Invocation(index) => write!(f, "invocationImages[{index}]"),
            ImageSlot::Named(name) => write!(f, "images.{name}"),
        }
    }
}

impl Bundle {
    /// Deserializes a [`Bundle`] from the given JSON data.
    pub fn from_json(contents: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(contents)
    }

    /// Serializes the [`Bundle`] into JSON data.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self)
    }

    /// Returns the primary invocation image, if the bundle has one.
    pub fn invocation_image(&self) -> Option<&InvocationImage> {
        self.invocation_images.first()
    }

    /// Checks the structural invariants a bundle must satisfy before it can
    /// be transferred.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidBundle("bundle name is empty".into()));
        }
        if self.invocation_images.is_empty() {
            return Err(Error::InvalidBundle(format!(
                "bundle {:?} does not declare an invocation image",
                self.name
            )));
        }
        if let Some((slot, _)) = self
            .image_slots()
            .into_iter()
            .find(|(_, image)| image.image.trim().is_empty())
        {
            return Err(Error::InvalidBundle(format!("{slot} has an empty image reference")));
        }
        Ok(())
    }

    /// Lists every image in the bundle, invocation images first.
    pub fn image_slots(&self) -> Vec<(ImageSlot, &BaseImage)> {
        let invocation = self
            .invocation_images
            .iter()
            .enumerate()
            .map(|(index, image)| (ImageSlot::Invocation(index), &image.base));
        let named = self
            .images
            .iter()
            .map(|(name, image)| (ImageSlot::Named(name.clone()), &image.base));
        invocation.chain(named).collect()
    }

    /// Returns the image at the given slot.
    pub fn image(&self, slot: &ImageSlot) -> Option<&BaseImage> {
        match slot {
            ImageSlot::Invocation(index) => self.invocation_images.get(*index).map(|i| &i.base),
            ImageSlot::Named(name) => self.images.get(name).map(|i| &i.base),
        }
    }

    /// Returns the image at the given slot for modification.
    pub fn image_mut(&mut self, slot: &ImageSlot) -> Option<&mut BaseImage> {
        match slot {
            ImageSlot::Invocation(index) => {
                self.invocation_images.get_mut(*index).map(|i| &mut i.base)
            }
            ImageSlot::Named(name) => self.images.get_mut(name).map(|i| &mut i.base),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "schemaVersion": "v1.2.0",
            "name": "mybuns",
            "version": "0.1.1",
            "invocationImages": [{
                "imageType": "docker",
                "image": "localhost:5000/mybuns-installer:v0.1.1",
                "contentDigest": "sha256:aaa"
            }],
            "images": {
                "whalesayd": {
                    "image": "carolynvs/whalesayd:v0.1.0",
                    "description": "whalesay as a service"
                }
            },
            "parameters": { "log_level": { "definition": "log_level" } },
            "custom": { "sh.porter": { "manifest": "abc" } }
        })
    }

    #[test]
    fn deserialising_preserves_unknown_fields() {
        let bytes = serde_json::to_vec(&sample()).unwrap();
        let bundle = Bundle::from_json(&bytes).unwrap();

        assert_eq!("mybuns", bundle.name);
        assert_eq!(1, bundle.invocation_images.len());
        assert_eq!(Some("sha256:aaa"), bundle.invocation_images[0].base.digest());
        assert_eq!("oci", bundle.images["whalesayd"].base.image_type);
        assert!(bundle.extra.contains_key("parameters"));
        assert!(bundle.extra.contains_key("custom"));

        let reloaded = Bundle::from_json(&bundle.to_json().unwrap()).unwrap();
        assert_eq!(bundle, reloaded);
    }

    #[test]
    fn empty_digest_is_treated_as_missing() {
        let mut image = BaseImage::new("example.com/app:v1");
        assert_eq!(None, image.digest());
        image.content_digest = Some(String::new());
        assert_eq!(None, image.digest());
    }

    #[test]
    fn validate_requires_an_invocation_image() {
        let bundle = Bundle {
            name: "empty".into(),
            version: "0.1.0".into(),
            ..Default::default()
        };
        let err = bundle.validate().unwrap_err();
        assert!(err.to_string().contains("invocation image"), "{err}");
    }

    #[test]
    fn validate_rejects_empty_image_references() {
        let mut bundle = Bundle::from_json(&serde_json::to_vec(&sample()).unwrap()).unwrap();
        bundle.validate().unwrap();

        bundle.images.get_mut("whalesayd").unwrap().base.image = " ".into();
        let err = bundle.validate().unwrap_err();
        assert!(err.to_string().contains("images.whalesayd"), "{err}");
    }

    #[test]
    fn image_slots_list_invocation_images_first() {
        let mut bundle = Bundle::from_json(&serde_json::to_vec(&sample()).unwrap()).unwrap();
        let slots: Vec<_> = bundle.image_slots().into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            vec![
                ImageSlot::Invocation(0),
                ImageSlot::Named("whalesayd".into())
            ],
            slots
        );

        let slot = ImageSlot::Named("whalesayd".into());
        bundle.image_mut(&slot).unwrap().content_digest = Some("sha256:bbb".into());
        assert_eq!(Some("sha256:bbb"), bundle.image(&slot).unwrap().digest());
        assert!(bundle.image(&ImageSlot::Invocation(3)).is_none());
    }
}
