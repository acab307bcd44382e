//! This crates contains common code for use in tests. Many methods will panic
//! in the slightest breeze, so DO NOT USE IN NON-TEST CODE.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io::Write,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ferry_bundle::{
    bundle::{BaseImage, InvocationImage},
    Bundle, Image, RelocationMap,
};
use ferry_common::sha256;
use ferry_oci::{
    parse_reference, BundleReference, RegistryEndpoint, RegistryTransport, StoredBundle,
    TransferEvent, TransferEventReporter, TransferPhase,
};

/// A fake content digest derived from `seed`.
pub fn fake_digest(seed: &str) -> String {
    sha256::content_digest_from_bytes(seed)
}

/// A bundle whose invocation image and named images are the given
/// references, each with a content digest derived from its reference.
pub fn test_bundle(invocation_image: &str, images: &[(&str, &str)]) -> Bundle {
    let mut base = BaseImage::new(invocation_image);
    base.content_digest = Some(fake_digest(invocation_image));
    Bundle {
        schema_version: "v1.0.0".into(),
        name: "test-bundle".into(),
        version: "0.1.0".into(),
        invocation_images: vec![InvocationImage { base }],
        images: images
            .iter()
            .map(|(name, image)| {
                let mut base = BaseImage::new(*image);
                base.content_digest = Some(fake_digest(image));
                (
                    name.to_string(),
                    Image {
                        base,
                        description: None,
                    },
                )
            })
            .collect(),
        ..Default::default()
    }
}

#[derive(Default)]
struct State {
    bundles: HashMap<String, StoredBundle>,
    // repository ("domain/path") -> digests and tags present in it
    images: HashMap<String, StoredRepository>,
    offline: BTreeSet<String>,
    failing: BTreeSet<String>,
    copies: Vec<(String, String)>,
    pushes: Vec<String>,
    insecure_seen: Vec<Vec<String>>,
}

#[derive(Default)]
struct StoredRepository {
    digests: BTreeSet<String>,
    tags: BTreeMap<String, String>,
}

/// A registry transport holding everything in memory, shared by every
/// registry domain.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

fn repository_key(reference: &BundleReference) -> String {
    format!("{}/{}", reference.domain(), reference.repository())
}

fn stored(bundle: Bundle, relocation_map: RelocationMap) -> Result<StoredBundle> {
    let mut content = bundle.to_json()?;
    content.extend(relocation_map.to_json()?);
    Ok(StoredBundle {
        bundle,
        relocation_map,
        digest: Some(sha256::content_digest_from_bytes(content)),
    })
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an image at `reference` with a digest derived from the reference.
    pub fn with_image(self, reference: &str) -> Self {
        self.add_image(reference, &fake_digest(reference));
        self
    }

    /// Store every image referenced by `bundle` at its original location.
    pub fn with_bundle_images(self, bundle: &Bundle) -> Self {
        for (_, image) in bundle.image_slots() {
            let digest = image.digest().expect("test images carry digests");
            self.add_image(&image.image, digest);
        }
        self
    }

    /// Store `bundle` at `reference` as if it had been pushed there.
    pub fn with_stored_bundle(
        self,
        reference: &str,
        bundle: Bundle,
        relocation_map: RelocationMap,
    ) -> Self {
        let reference = parse_reference(reference).unwrap();
        let stored = stored(bundle, relocation_map).unwrap();
        self.state
            .lock()
            .unwrap()
            .bundles
            .insert(reference.to_string(), stored);
        self
    }

    pub fn add_image(&self, reference: &str, digest: &str) {
        let reference = parse_reference(reference).unwrap();
        let mut state = self.state.lock().unwrap();
        let repo = state.images.entry(repository_key(&reference)).or_default();
        repo.digests.insert(digest.to_owned());
        if let Some(tag) = reference.tag() {
            repo.tags.insert(tag.to_owned(), digest.to_owned());
        }
    }

    /// Fail every copy whose source lives in `repository` ("domain/path").
    pub fn fail_copies_from(&self, repository: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(repository.to_owned());
    }

    /// Make every request to `domain` fail.
    pub fn take_offline(&self, domain: &str) {
        self.state.lock().unwrap().offline.insert(domain.to_owned());
    }

    /// Returns true if an image with `digest` exists at `reference`'s repository.
    pub fn has_image(&self, reference: &str, digest: &str) -> bool {
        let reference = parse_reference(reference).unwrap();
        self.state
            .lock()
            .unwrap()
            .images
            .get(&repository_key(&reference))
            .map(|repo| repo.digests.contains(digest))
            .unwrap_or(false)
    }

    /// The bundle stored at `reference`, if any.
    pub fn stored_bundle(&self, reference: &str) -> Option<(Bundle, RelocationMap)> {
        let reference = parse_reference(reference).unwrap();
        self.state
            .lock()
            .unwrap()
            .bundles
            .get(&reference.to_string())
            .map(|stored| (stored.bundle.clone(), stored.relocation_map.clone()))
    }

    /// The manifest digest of the bundle stored at `reference`, if any.
    pub fn stored_digest(&self, reference: &str) -> Option<String> {
        let reference = parse_reference(reference).unwrap();
        self.state
            .lock()
            .unwrap()
            .bundles
            .get(&reference.to_string())
            .and_then(|stored| stored.digest.clone())
    }

    /// Every (source, destination) pair copied so far, in order.
    pub fn copies(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().copies.clone()
    }

    pub fn copy_count(&self) -> usize {
        self.state.lock().unwrap().copies.len()
    }

    /// References of every bundle pushed so far, in order.
    pub fn pushes(&self) -> Vec<String> {
        self.state.lock().unwrap().pushes.clone()
    }

    /// The insecure-registry allowlists of the endpoints used for copies.
    pub fn insecure_allowlists(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().insecure_seen.clone()
    }

    fn check_online(state: &State, reference: &BundleReference) -> Result<()> {
        if state.offline.contains(reference.domain()) {
            bail!("dial tcp {}: connection refused", reference.domain());
        }
        Ok(())
    }

    fn resolve(state: &State, reference: &BundleReference) -> Result<String> {
        let repo = state
            .images
            .get(&repository_key(reference))
            .ok_or_else(|| anyhow!("repository {} not found", repository_key(reference)))?;
        let digest = match (reference.digest(), reference.tag()) {
            (Some(digest), _) => repo.digests.get(digest).cloned(),
            (None, Some(tag)) => repo.tags.get(tag).cloned(),
            (None, None) => None,
        };
        digest.ok_or_else(|| anyhow!("manifest unknown: {reference}"))
    }
}

#[async_trait]
impl RegistryTransport for MemoryRegistry {
    async fn pull(
        &self,
        _endpoint: &RegistryEndpoint,
        reference: &BundleReference,
    ) -> Result<StoredBundle> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state, reference)?;
        state
            .bundles
            .get(&reference.to_string())
            .cloned()
            .ok_or_else(|| anyhow!("manifest unknown: {reference}"))
    }

    async fn push(
        &self,
        _endpoint: &RegistryEndpoint,
        reference: &BundleReference,
        bundle: &Bundle,
        relocation_map: Option<&RelocationMap>,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state, reference)?;
        let stored = stored(bundle.clone(), relocation_map.cloned().unwrap_or_default())?;
        let digest = stored.digest.clone().unwrap_or_default();
        state.bundles.insert(reference.to_string(), stored);
        state.pushes.push(reference.to_string());
        Ok(digest)
    }

    async fn copy_image(
        &self,
        endpoint: &RegistryEndpoint,
        source: &BundleReference,
        destination: &BundleReference,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state, source)?;
        Self::check_online(&state, destination)?;
        if state.failing.contains(&repository_key(source)) {
            bail!("unauthorized: access to {} denied", source);
        }
        let digest = Self::resolve(&state, source)?;

        let repo = state.images.entry(repository_key(destination)).or_default();
        repo.digests.insert(digest.clone());
        if let Some(tag) = destination.tag() {
            repo.tags.insert(tag.to_owned(), digest.clone());
        }
        state
            .copies
            .push((source.to_string(), destination.to_string()));
        state.insecure_seen.push(
            endpoint
                .insecure_registries()
                .domains()
                .map(str::to_owned)
                .collect(),
        );
        Ok(digest)
    }

    async fn resolve_digest(
        &self,
        _endpoint: &RegistryEndpoint,
        reference: &BundleReference,
    ) -> Result<String> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state, reference)?;
        Self::resolve(&state, reference)
    }
}

/// Records every transfer event it receives.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<TransferEvent>>>,
    fail: bool,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reporter that records events and then fails on each one.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events of the given phase, as (image, error) pairs sorted by image.
    pub fn phase(&self, phase: TransferPhase) -> Vec<(String, Option<String>)> {
        let mut events: Vec<_> = self
            .events()
            .into_iter()
            .filter(|e| e.phase == phase)
            .map(|e| (e.image, e.error))
            .collect();
        events.sort();
        events
    }

    fn record(&self, event: &TransferEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            bail!("reporter is broken");
        }
        Ok(())
    }
}

impl TransferEventReporter for RecordingReporter {
    fn on_copy_start(&self, event: &TransferEvent) -> Result<()> {
        self.record(event)
    }

    fn on_copy_end(&self, event: &TransferEvent) -> Result<()> {
        self.record(event)
    }
}

/// A cloneable in-memory writer for capturing output.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Installs a test tracing subscriber; safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
