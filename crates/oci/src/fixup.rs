//! Fixup: relocating a bundle's images next to it before it is pushed.
//!
//! Every image that is not already hosted on the destination registry is
//! copied there, the relocation map records where it went, and the bundle's
//! digest fields are updated to describe the copies. Images already on the
//! destination keep their location, but any missing digest is looked up and
//! pinned. Nothing is written to the bundle or the map unless every lookup
//! and copy succeeds.

use std::collections::BTreeMap;

use ferry_bundle::{bundle::ImageSlot, Bundle, RelocationMap};
use futures::StreamExt;

use crate::{
    endpoint::RegistryEndpoint,
    error::{Error, Result},
    events::{notify, TransferEvent, TransferEventReporter},
    reference::{parse_reference, BundleReference, ImageReference},
    transport::RegistryTransport,
};

/// Number of image copies run at once unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT_COPIES: usize = 4;

/// An image copied to the destination registry during fixup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopiedImage {
    /// The image reference as written in the bundle.
    pub original: String,
    /// Where the image was copied from.
    pub source: String,
    /// The digest-pinned reference of the copy.
    pub relocated: String,
    /// The manifest digest of the copy.
    pub digest: String,
}

/// What a fixup pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FixupSummary {
    /// Images copied to the destination, ordered by original reference.
    pub copied: Vec<CopiedImage>,
    /// Images already hosted on the destination registry.
    pub skipped: Vec<String>,
    /// Skipped images whose digest was looked up on the destination and
    /// written into the bundle.
    pub pinned: Vec<String>,
}

#[derive(Debug, Default)]
struct Plan {
    copies: Vec<PlannedCopy>,
    skipped: Vec<String>,
    unpinned: Vec<UnpinnedImage>,
}

/// An image on the destination registry that the bundle names without a digest.
#[derive(Debug)]
struct UnpinnedImage {
    original: String,
    location: BundleReference,
    slots: Vec<ImageSlot>,
}

#[derive(Debug)]
struct PlannedCopy {
    original: String,
    original_ref: ImageReference,
    slots: Vec<ImageSlot>,
    source: BundleReference,
    target: BundleReference,
}

/// Work out which images need copying to `destination`.
fn plan(
    bundle: &Bundle,
    destination: &BundleReference,
    relocation_map: &RelocationMap,
) -> Result<Plan> {
    let mut copies: BTreeMap<String, PlannedCopy> = BTreeMap::new();
    let mut unpinned: BTreeMap<String, UnpinnedImage> = BTreeMap::new();
    let mut skipped = Vec::new();

    for (slot, image) in bundle.image_slots() {
        if let Some(planned) = copies.get_mut(&image.image) {
            planned.slots.push(slot);
            continue;
        }

        let invalid = |e: Error| Error::Fixup {
            image: image.image.clone(),
            source: e.into(),
        };
        let original_ref = parse_reference(&image.image).map_err(invalid)?;
        let current = parse_reference(relocation_map.lookup(&image.image)).map_err(invalid)?;

        if current.same_domain(destination) {
            tracing::trace!("{} is already hosted at {}", image.image, current);
            if !skipped.contains(&image.image) {
                skipped.push(image.image.clone());
            }
            if image.digest().is_none() {
                unpinned
                    .entry(image.image.clone())
                    .or_insert_with(|| UnpinnedImage {
                        original: image.image.clone(),
                        location: current,
                        slots: Vec::new(),
                    })
                    .slots
                    .push(slot);
            }
            continue;
        }

        // Copy exactly the content the bundle was published with
        let source = match (current.digest(), image.digest()) {
            (None, Some(digest)) => current.with_digest(digest),
            _ => current,
        };
        let target = destination.relocation_target(&original_ref);

        copies.insert(
            image.image.clone(),
            PlannedCopy {
                original: image.image.clone(),
                original_ref,
                slots: vec![slot],
                source,
                target,
            },
        );
    }

    Ok(Plan {
        copies: copies.into_values().collect(),
        skipped,
        unpinned: unpinned.into_values().collect(),
    })
}

/// Relocate the images of `bundle` to the registry of `destination`,
/// recording each copy in `relocation_map`.
///
/// Entries already in `relocation_map` are kept; only images copied by this
/// call are added or overwritten. On error, neither `bundle` nor
/// `relocation_map` is modified.
pub async fn fixup_bundle<T: RegistryTransport + ?Sized>(
    transport: &T,
    endpoint: &RegistryEndpoint,
    bundle: &mut Bundle,
    destination: &BundleReference,
    relocation_map: &mut RelocationMap,
    reporter: &dyn TransferEventReporter,
    max_concurrent_copies: usize,
) -> Result<FixupSummary> {
    let Plan {
        copies: planned,
        skipped,
        unpinned,
    } = plan(bundle, destination, relocation_map)?;
    tracing::debug!(
        "Fixup for {destination}: {} image(s) to copy, {} already in place",
        planned.len(),
        skipped.len()
    );

    let mut pins = Vec::with_capacity(unpinned.len());
    for image in unpinned {
        let digest = match image.location.digest() {
            Some(digest) => digest.to_owned(),
            None => transport
                .resolve_digest(endpoint, &image.location)
                .await
                .map_err(|source| Error::Fixup {
                    image: image.original.clone(),
                    source,
                })?,
        };
        tracing::debug!("Pinned {} to {digest}", image.original);
        pins.push((image, digest));
    }

    let copies = planned.into_iter().map(|copy| async move {
        let target = copy.target.to_string();
        notify(reporter, &TransferEvent::start(&copy.original, &target));
        let result = transport
            .copy_image(endpoint, &copy.source, &copy.target)
            .await;
        notify(
            reporter,
            &TransferEvent::end(&copy.original, &target, result.as_ref().err()),
        );
        match result {
            Ok(digest) => Ok((copy, digest)),
            Err(source) => Err(Error::Fixup {
                image: copy.original,
                source,
            }),
        }
    });

    // Dropping the stream on the first failure cancels the outstanding copies.
    let mut in_flight =
        futures::stream::iter(copies).buffer_unordered(max_concurrent_copies.max(1));
    let mut completed = Vec::new();
    while let Some(result) = in_flight.next().await {
        completed.push(result?);
    }
    completed.sort_by(|(a, _), (b, _)| a.original.cmp(&b.original));

    let mut summary = FixupSummary {
        copied: Vec::with_capacity(completed.len()),
        skipped,
        pinned: Vec::with_capacity(pins.len()),
    };
    for (image, digest) in pins {
        for slot in &image.slots {
            if let Some(slot_image) = bundle.image_mut(slot) {
                slot_image.content_digest = Some(digest.clone());
            }
        }
        summary.pinned.push(image.original);
    }
    for (copy, digest) in completed {
        let relocated = destination.relocate(&copy.original_ref, &digest).to_string();
        for slot in &copy.slots {
            if let Some(image) = bundle.image_mut(slot) {
                image.content_digest = Some(digest.clone());
            }
        }
        if let Some(previous) = relocation_map.insert(copy.original.clone(), relocated.clone()) {
            tracing::debug!("{} moved from {previous} to {relocated}", copy.original);
        }
        summary.copied.push(CopiedImage {
            original: copy.original,
            source: copy.source.to_string(),
            relocated,
            digest,
        });
    }

    Ok(summary)
}

#[cfg(test)]
mod test {
    use super::*;
    use ferry_bundle::bundle::{BaseImage, InvocationImage};

    const DIGEST: &str = "sha256:0a867093096e0ef01ef749b12b6e7a90e4952eda107f89a676eeedce63a8361f";

    fn bundle() -> Bundle {
        let mut installer = BaseImage::new("original.example.com/img:tag");
        installer.content_digest = Some(DIGEST.to_owned());
        let mut bundle = Bundle {
            name: "app".into(),
            version: "1.0.0".into(),
            invocation_images: vec![InvocationImage { base: installer }],
            ..Default::default()
        };
        bundle.images.insert(
            "same".into(),
            ferry_bundle::Image {
                base: BaseImage::new("original.example.com/img:tag"),
                description: None,
            },
        );
        bundle.images.insert(
            "local".into(),
            ferry_bundle::Image {
                base: BaseImage::new("registry-y.example.com/ns/db:v2"),
                description: None,
            },
        );
        bundle
    }

    #[test]
    fn plan_pins_digests_and_deduplicates_images() {
        let destination = parse_reference("registry-y.example.com/ns/app:v1").unwrap();
        let plan = plan(&bundle(), &destination, &RelocationMap::new()).unwrap();

        assert_eq!(1, plan.copies.len());
        let copy = &plan.copies[0];
        assert_eq!("original.example.com/img:tag", copy.original);
        assert_eq!(
            vec![ImageSlot::Invocation(0), ImageSlot::Named("same".into())],
            copy.slots
        );
        assert_eq!(
            format!("original.example.com/img@{DIGEST}"),
            copy.source.to_string()
        );
        assert_eq!(
            "registry-y.example.com/ns/img:tag",
            copy.target.to_string()
        );
        assert_eq!(vec!["registry-y.example.com/ns/db:v2".to_string()], plan.skipped);
    }

    #[test]
    fn plan_pins_undigested_images_left_in_place() {
        let destination = parse_reference("registry-y.example.com/ns/app:v1").unwrap();
        let plan = plan(&bundle(), &destination, &RelocationMap::new()).unwrap();

        assert_eq!(1, plan.unpinned.len());
        let unpinned = &plan.unpinned[0];
        assert_eq!("registry-y.example.com/ns/db:v2", unpinned.original);
        assert_eq!("registry-y.example.com/ns/db:v2", unpinned.location.to_string());
        assert_eq!(vec![ImageSlot::Named("local".into())], unpinned.slots);
    }

    #[test]
    fn plan_copies_from_relocated_location() {
        let destination = parse_reference("registry-z.example.com/ns2/app:v1").unwrap();
        let mut map = RelocationMap::new();
        map.insert(
            "original.example.com/img:tag",
            format!("registry-y.example.com/ns/img@{DIGEST}"),
        );

        let plan = plan(&bundle(), &destination, &map).unwrap();
        let copy = plan
            .copies
            .iter()
            .find(|c| c.original == "original.example.com/img:tag")
            .unwrap();
        assert_eq!(
            format!("registry-y.example.com/ns/img@{DIGEST}"),
            copy.source.to_string()
        );
        assert_eq!(
            "registry-z.example.com/ns2/img:tag",
            copy.target.to_string()
        );
    }

    #[test]
    fn plan_skips_images_already_relocated_to_destination() {
        let destination = parse_reference("registry-y.example.com/ns/app:v1").unwrap();
        let mut map = RelocationMap::new();
        map.insert(
            "original.example.com/img:tag",
            format!("registry-y.example.com/ns/img@{DIGEST}"),
        );

        let plan = plan(&bundle(), &destination, &map).unwrap();
        assert!(plan.copies.is_empty());
        assert_eq!(2, plan.skipped.len());
        // Only the image without a digest anywhere needs looking up.
        let unpinned: Vec<_> = plan.unpinned.iter().map(|u| u.original.as_str()).collect();
        assert_eq!(
            vec!["original.example.com/img:tag", "registry-y.example.com/ns/db:v2"],
            unpinned
        );
    }

    #[test]
    fn plan_rejects_unparseable_images() {
        let mut bundle = bundle();
        bundle.invocation_images[0].base.image = "Not A Reference".into();
        let destination = parse_reference("registry-y.example.com/ns/app:v1").unwrap();

        match plan(&bundle, &destination, &RelocationMap::new()) {
            Err(Error::Fixup { image, .. }) => assert_eq!("Not A Reference", image),
            other => panic!("expected fixup error, got {other:?}"),
        }
    }
}
