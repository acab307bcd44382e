use ferry_bundle::{Bundle, RelocationMap};
use ferry_oci::{
    auth::Credentials, parse_reference, BundleReference, EndpointFactory, Error, Operation,
    Registry, TransferOptions, TransferPhase,
};
use ferry_testing::{fake_digest, test_bundle, MemoryRegistry, RecordingReporter, SharedBuffer};

const INSTALLER: &str = "original.example.com/installer:1.0";
const WEB: &str = "original.example.com/apps/web:2.0";

fn registry(transport: &MemoryRegistry) -> Registry<MemoryRegistry> {
    ferry_testing::init_tracing();
    Registry::with_transport(transport.clone())
        .with_endpoints(EndpointFactory::with_credentials(Credentials::anonymous()))
}

fn reference(r: &str) -> BundleReference {
    parse_reference(r).unwrap()
}

fn bundle() -> Bundle {
    test_bundle(INSTALLER, &[("web", WEB), ("again", INSTALLER)])
}

#[tokio::test]
async fn pull_returns_bundle_and_relocation_map() {
    let mut map = RelocationMap::new();
    map.insert(INSTALLER, "y.example.com/installer@sha256:abc");
    let transport =
        MemoryRegistry::new().with_stored_bundle("y.example.com/app:1.0", bundle(), map.clone());

    let pulled = registry(&transport)
        .pull_bundle(&reference("y.example.com/app:1.0"), false)
        .await
        .unwrap();

    assert_eq!(bundle(), pulled.bundle);
    assert_eq!(Some(map), pulled.relocation_map);
    assert_eq!(
        transport.stored_digest("y.example.com/app:1.0"),
        pulled.digest
    );
}

#[tokio::test]
async fn pull_reports_the_digest_the_push_returned() {
    let transport = MemoryRegistry::new().with_bundle_images(&bundle());
    let registry = registry(&transport);
    let destination = reference("y.example.com/team/app:1.0");

    let pushed = registry
        .push_bundle(bundle(), &destination, None, false)
        .await
        .unwrap();
    let pulled = registry.pull_bundle(&destination, false).await.unwrap();

    assert_eq!(Some(pushed.digest), pulled.digest);
}

#[tokio::test]
async fn pull_without_relocation_map_returns_none() {
    let transport = MemoryRegistry::new().with_stored_bundle(
        "y.example.com/app:1.0",
        bundle(),
        RelocationMap::new(),
    );

    let pulled = registry(&transport)
        .pull_bundle(&reference("y.example.com/app:1.0"), false)
        .await
        .unwrap();

    assert_eq!(None, pulled.relocation_map);
}

#[tokio::test]
async fn pull_rejects_undigested_invocation_image() {
    let mut bundle = bundle();
    bundle.invocation_images[0].base.content_digest = None;
    let transport = MemoryRegistry::new().with_stored_bundle(
        "y.example.com/app:1.0",
        bundle,
        RelocationMap::new(),
    );

    let err = registry(&transport)
        .pull_bundle(&reference("y.example.com/app:1.0"), false)
        .await
        .unwrap_err();

    assert!(err.is_integrity_failure());
    assert!(
        matches!(&err, Error::MissingContentDigest { image } if image == INSTALLER),
        "unexpected error {err:?}"
    );
    assert!(err.to_string().contains("tampered with"));
}

#[tokio::test]
async fn pull_of_missing_bundle_names_the_reference() {
    let transport = MemoryRegistry::new();

    let err = registry(&transport)
        .pull_bundle(&reference("y.example.com/app:1.0"), false)
        .await
        .unwrap_err();

    match err {
        Error::RegistryTransport {
            operation,
            reference,
            ..
        } => {
            assert_eq!(Operation::Pull, operation);
            assert_eq!("y.example.com/app:1.0", reference);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn push_relocates_images_next_to_the_bundle() {
    let transport = MemoryRegistry::new().with_bundle_images(&bundle());
    let output = SharedBuffer::new();
    let registry = registry(&transport).with_output(output.clone());

    let pushed = registry
        .push_bundle(bundle(), &reference("y.example.com/team/app:1.0"), None, false)
        .await
        .unwrap();

    let map = pushed.relocation_map.expect("images were relocated");
    assert_eq!(2, map.len());
    assert_eq!(
        Some(format!("y.example.com/team/installer@{}", fake_digest(INSTALLER)).as_str()),
        map.get(INSTALLER)
    );
    assert_eq!(
        Some(format!("y.example.com/team/web@{}", fake_digest(WEB)).as_str()),
        map.get(WEB)
    );
    // The image shared by two slots is only copied once
    assert_eq!(2, transport.copy_count());
    assert!(transport.has_image("y.example.com/team/web:2.0", &fake_digest(WEB)));

    let (stored, stored_map) = transport
        .stored_bundle("y.example.com/team/app:1.0")
        .unwrap();
    assert_eq!(pushed.bundle, stored);
    assert_eq!(map, stored_map);
    assert_eq!(
        format!(
            "Bundle tag y.example.com/team/app:1.0 pushed successfully, with digest {:?}\n",
            pushed.digest
        ),
        output.contents()
    );
}

#[tokio::test]
async fn push_pins_images_already_on_the_destination() {
    const LOCAL: &str = "y.example.com/team/installer:1.0";
    let mut bundle = test_bundle(LOCAL, &[("web", WEB)]);
    bundle.invocation_images[0].base.content_digest = None;
    let transport = MemoryRegistry::new().with_image(LOCAL).with_image(WEB);
    let registry = registry(&transport);
    let destination = reference("y.example.com/team/app:1.0");

    let pushed = registry
        .push_bundle(bundle, &destination, None, false)
        .await
        .unwrap();

    assert_eq!(
        Some(fake_digest(LOCAL).as_str()),
        pushed.bundle.invocation_images[0].base.digest()
    );
    // Pinned in place, not relocated
    let map = pushed.relocation_map.unwrap();
    assert_eq!(None, map.get(LOCAL));
    assert_eq!(1, transport.copy_count());

    let pulled = registry.pull_bundle(&destination, false).await.unwrap();
    assert_eq!(pushed.bundle, pulled.bundle);
}

#[tokio::test]
async fn unresolvable_digest_publishes_nothing() {
    const LOCAL: &str = "y.example.com/team/installer:1.0";
    let mut bundle = test_bundle(LOCAL, &[]);
    bundle.invocation_images[0].base.content_digest = None;
    let transport = MemoryRegistry::new();

    let err = registry(&transport)
        .push_bundle(bundle, &reference("y.example.com/team/app:1.0"), None, false)
        .await
        .unwrap_err();

    assert!(
        matches!(&err, Error::Fixup { image, .. } if image == LOCAL),
        "unexpected error {err:?}"
    );
    assert!(transport.pushes().is_empty());
}

#[tokio::test]
async fn push_twice_copies_nothing_the_second_time() {
    let transport = MemoryRegistry::new().with_bundle_images(&bundle());
    let registry = registry(&transport);
    let destination = reference("y.example.com/team/app:1.0");

    let first = registry
        .push_bundle(bundle(), &destination, None, false)
        .await
        .unwrap();
    let second = registry
        .push_bundle(
            first.bundle.clone(),
            &destination,
            first.relocation_map.clone(),
            false,
        )
        .await
        .unwrap();

    assert!(second.copied.is_empty());
    assert_eq!(2, transport.copy_count());
    assert_eq!(first.relocation_map, second.relocation_map);
}

#[tokio::test]
async fn chained_copies_follow_the_relocation_map() {
    let transport = MemoryRegistry::new().with_bundle_images(&bundle());
    let registry = registry(&transport);
    let y = reference("y.example.com/team/app:1.0");
    let z = reference("z.example.com/prod/app:1.0");

    registry.push_bundle(bundle(), &y, None, false).await.unwrap();
    transport.take_offline("original.example.com");

    let copied = registry.copy_bundle(&y, &z, false).await.unwrap();

    let map = copied.relocation_map.unwrap();
    assert_eq!(
        Some(format!("z.example.com/prod/installer@{}", fake_digest(INSTALLER)).as_str()),
        map.get(INSTALLER)
    );
    assert_eq!(
        Some(format!("z.example.com/prod/web@{}", fake_digest(WEB)).as_str()),
        map.get(WEB)
    );
    let sources: Vec<_> = transport.copies()[2..]
        .iter()
        .map(|(source, _)| source.clone())
        .collect();
    assert!(
        sources.iter().all(|s| s.starts_with("y.example.com/")),
        "copied from {sources:?}"
    );
    assert_eq!(
        bundle().images.keys().collect::<Vec<_>>(),
        copied.bundle.images.keys().collect::<Vec<_>>()
    );
    // The publisher's digests survive both hops
    assert_eq!(
        Some(fake_digest(INSTALLER).as_str()),
        copied.bundle.invocation_images[0].base.digest()
    );
    assert_eq!(
        Some(fake_digest(WEB).as_str()),
        copied.bundle.images["web"].base.digest()
    );
}

#[tokio::test]
async fn failed_copy_publishes_nothing() {
    let transport = MemoryRegistry::new().with_bundle_images(&bundle());
    transport.fail_copies_from("original.example.com/apps/web");
    let reporter = RecordingReporter::new();
    let registry = registry(&transport).with_reporter(reporter.clone());

    let err = registry
        .push_bundle(bundle(), &reference("y.example.com/team/app:1.0"), None, false)
        .await
        .unwrap_err();

    match &err {
        Error::Fixup { image, .. } => assert_eq!(WEB, image),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(transport.pushes().is_empty());
    assert!(transport.stored_bundle("y.example.com/team/app:1.0").is_none());

    let failures: Vec<_> = reporter
        .phase(TransferPhase::End)
        .into_iter()
        .filter(|(_, error)| error.is_some())
        .map(|(image, _)| image)
        .collect();
    assert_eq!(vec![WEB.to_owned()], failures);
}

#[tokio::test]
async fn copy_events_bracket_each_copy() {
    let transport = MemoryRegistry::new().with_bundle_images(&bundle());
    let reporter = RecordingReporter::new();
    let registry = registry(&transport)
        .with_reporter(reporter.clone())
        .with_options(TransferOptions {
            max_concurrent_copies: 1,
            verbose: false,
        });

    registry
        .push_bundle(bundle(), &reference("y.example.com/team/app:1.0"), None, false)
        .await
        .unwrap();

    let expected: Vec<(String, Option<String>)> =
        vec![(WEB.to_owned(), None), (INSTALLER.to_owned(), None)];
    assert_eq!(expected, reporter.phase(TransferPhase::Start));
    assert_eq!(expected, reporter.phase(TransferPhase::End));

    // With one copy in flight, each start is followed by its end
    let events = reporter.events();
    for pair in events.chunks(2) {
        assert_eq!(TransferPhase::Start, pair[0].phase);
        assert_eq!(TransferPhase::End, pair[1].phase);
        assert_eq!(pair[0].image, pair[1].image);
    }
}

#[tokio::test]
async fn broken_reporter_does_not_fail_the_push() {
    let transport = MemoryRegistry::new().with_bundle_images(&bundle());
    let reporter = RecordingReporter::failing();
    let registry = registry(&transport).with_reporter(reporter.clone());

    let pushed = registry
        .push_bundle(bundle(), &reference("y.example.com/team/app:1.0"), None, false)
        .await
        .unwrap();

    assert_eq!(2, pushed.copied.len());
    assert_eq!(4, reporter.events().len());
}

#[tokio::test]
async fn insecure_copy_allowlists_source_and_destination() {
    let transport = MemoryRegistry::new()
        .with_bundle_images(&bundle())
        .with_stored_bundle("localhost:5000/app:1.0", bundle(), RelocationMap::new());
    let registry = registry(&transport);

    registry
        .copy_bundle(
            &reference("localhost:5000/app:1.0"),
            &reference("localhost:6000/app:1.0"),
            true,
        )
        .await
        .unwrap();

    assert_eq!(2, transport.insecure_allowlists().len());
    for allowlist in transport.insecure_allowlists() {
        assert_eq!(vec!["localhost:5000", "localhost:6000"], allowlist);
    }
}

#[tokio::test]
async fn verbose_pull_announces_insecure_registries() {
    let transport = MemoryRegistry::new().with_stored_bundle(
        "localhost:5000/app:1.0",
        bundle(),
        RelocationMap::new(),
    );
    let output = SharedBuffer::new();
    let registry = registry(&transport)
        .with_output(output.clone())
        .with_options(TransferOptions {
            verbose: true,
            ..Default::default()
        });

    registry
        .pull_bundle(&reference("localhost:5000/app:1.0"), true)
        .await
        .unwrap();

    assert_eq!(
        "Pulling bundle localhost:5000/app:1.0 with --insecure-registry\n",
        output.contents()
    );
}

#[tokio::test]
async fn invalid_bundle_is_rejected_before_copying() {
    let transport = MemoryRegistry::new().with_bundle_images(&bundle());
    let mut bundle = bundle();
    bundle.invocation_images.clear();

    let err = registry(&transport)
        .push_bundle(bundle, &reference("y.example.com/team/app:1.0"), None, false)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidBundle { .. }), "{err:?}");
    assert_eq!(0, transport.copy_count());
}
