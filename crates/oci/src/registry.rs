use std::{
    fmt,
    io::Write,
    sync::{Arc, Mutex},
};

use crate::{
    client::OciTransport,
    endpoint::{EndpointFactory, InsecureRegistries},
    error::Result,
    events::{NullReporter, TransferEventReporter},
    fixup::DEFAULT_MAX_CONCURRENT_COPIES,
    push::PushedBundle,
    reference::BundleReference,
    transport::RegistryTransport,
};

/// Tuning for bundle transfers.
#[derive(Clone, Debug)]
pub struct TransferOptions {
    /// Maximum number of image copies in flight during fixup.
    pub max_concurrent_copies: usize,
    /// Write progress messages that are otherwise only logged.
    pub verbose: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            max_concurrent_copies: DEFAULT_MAX_CONCURRENT_COPIES,
            verbose: false,
        }
    }
}

/// Pulls, pushes and copies bundles between registries.
pub struct Registry<T = OciTransport> {
    pub(crate) transport: T,
    pub(crate) endpoints: EndpointFactory,
    pub(crate) reporter: Arc<dyn TransferEventReporter>,
    pub(crate) options: TransferOptions,
    output: Mutex<Box<dyn Write + Send>>,
}

impl Registry<OciTransport> {
    /// A registry client speaking the OCI distribution protocol, with
    /// credentials from the default location.
    pub fn new() -> Self {
        Self::with_transport(OciTransport::new())
    }
}

impl Default for Registry<OciTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RegistryTransport> Registry<T> {
    /// A registry client moving bundles with `transport`. Progress output is
    /// discarded until an output sink is set.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            endpoints: EndpointFactory::new(),
            reporter: Arc::new(NullReporter),
            options: TransferOptions::default(),
            output: Mutex::new(Box::new(std::io::sink())),
        }
    }

    /// Use `endpoints` to create registry endpoints.
    pub fn with_endpoints(mut self, endpoints: EndpointFactory) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Report image copies to `reporter`.
    pub fn with_reporter(mut self, reporter: impl TransferEventReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Write progress messages to `output`.
    pub fn with_output(mut self, output: impl Write + Send + 'static) -> Self {
        self.output = Mutex::new(Box::new(output));
        self
    }

    /// Use the given transfer options.
    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    /// Copy the bundle at `source` to `destination`, relocating its images
    /// and carrying its relocation map forward.
    ///
    /// With `insecure`, transport security is relaxed for the source and
    /// destination domains, since fixup reads images from the former.
    pub async fn copy_bundle(
        &self,
        source: &BundleReference,
        destination: &BundleReference,
        insecure: bool,
    ) -> Result<PushedBundle> {
        let pulled = self.pull_bundle(source, insecure).await?;

        let mut allowlist = InsecureRegistries::for_reference(destination, insecure);
        if insecure {
            allowlist = allowlist.with(source.domain());
        }
        let endpoint = self.endpoints.create_with(destination, allowlist).await?;

        self.push_to(&endpoint, pulled.bundle, destination, pulled.relocation_map)
            .await
    }

    /// Write a line to the output sink. The sink is not part of the result,
    /// so write failures are ignored.
    pub(crate) fn say(&self, line: fmt::Arguments) {
        if let Ok(mut out) = self.output.lock() {
            let _ = out.write_fmt(line).and_then(|_| out.write_all(b"\n"));
        }
    }
}
