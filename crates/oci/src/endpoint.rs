//! Per-operation registry endpoints.

use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use oci_distribution::secrets::RegistryAuth;

use crate::{
    auth::Credentials,
    error::{Error, Result},
    reference::BundleReference,
};

/// Registry domains for which transport security validation is relaxed.
///
/// This is always passed explicitly into endpoint construction; there is no
/// process-wide allowlist.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InsecureRegistries(BTreeSet<String>);

impl InsecureRegistries {
    /// An empty allowlist.
    pub fn none() -> Self {
        Self::default()
    }

    /// Allowlists the domain of `reference` if `insecure` is set.
    pub fn for_reference(reference: &BundleReference, insecure: bool) -> Self {
        let allowlist = Self::none();
        if insecure {
            allowlist.with(reference.domain())
        } else {
            allowlist
        }
    }

    /// Adds `domain` to the allowlist.
    pub fn with(mut self, domain: impl Into<String>) -> Self {
        self.0.insert(domain.into());
        self
    }

    /// Returns true if `domain` is allowlisted.
    pub fn contains(&self, domain: &str) -> bool {
        self.0.contains(domain)
    }

    /// Returns true if nothing is allowlisted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The allowlisted domains, in order.
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Transport and authentication context for one pull or push, scoped to the
/// domain of the bundle reference it was created for.
#[derive(Clone, Debug)]
pub struct RegistryEndpoint {
    domain: String,
    insecure: InsecureRegistries,
    credentials: Arc<Credentials>,
}

impl RegistryEndpoint {
    /// Creates an endpoint for `domain` directly from its parts.
    pub fn new(
        domain: impl Into<String>,
        insecure: InsecureRegistries,
        credentials: Arc<Credentials>,
    ) -> Self {
        Self {
            domain: domain.into(),
            insecure,
            credentials,
        }
    }

    /// The registry domain this endpoint serves.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns true if transport security validation is relaxed for `domain`.
    pub fn is_insecure(&self, domain: &str) -> bool {
        self.insecure.contains(domain)
    }

    /// The insecure-registry allowlist this endpoint was created with.
    pub fn insecure_registries(&self) -> &InsecureRegistries {
        &self.insecure
    }

    /// Registry authentication for `reference`.
    pub fn auth_for(&self, reference: &BundleReference) -> RegistryAuth {
        self.credentials
            .registry_auth(reference.as_oci().resolve_registry())
    }
}

#[derive(Clone, Debug, Default)]
enum CredentialSource {
    #[default]
    DefaultFile,
    File(PathBuf),
    Loaded(Arc<Credentials>),
}

/// Builds [`RegistryEndpoint`]s, loading local registry credentials as it does so.
#[derive(Clone, Debug, Default)]
pub struct EndpointFactory {
    credentials: CredentialSource,
}

impl EndpointFactory {
    /// A factory reading credentials from the default location.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory reading credentials from `path`.
    pub fn with_credentials_file(path: impl Into<PathBuf>) -> Self {
        Self {
            credentials: CredentialSource::File(path.into()),
        }
    }

    /// A factory handing out already loaded credentials.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: CredentialSource::Loaded(Arc::new(credentials)),
        }
    }

    /// Create an endpoint for the domain of `reference`, relaxing transport
    /// security for that domain only if `insecure` is set.
    pub async fn create(
        &self,
        reference: &BundleReference,
        insecure: bool,
    ) -> Result<RegistryEndpoint> {
        self.create_with(reference, InsecureRegistries::for_reference(reference, insecure))
            .await
    }

    /// Create an endpoint for the domain of `reference` with an explicit
    /// insecure-registry allowlist.
    pub async fn create_with(
        &self,
        reference: &BundleReference,
        insecure: InsecureRegistries,
    ) -> Result<RegistryEndpoint> {
        let credentials = self.load_credentials().await?;
        tracing::trace!(
            "Created endpoint for {} (insecure registries: {:?})",
            reference.domain(),
            insecure.domains().collect::<Vec<_>>()
        );
        Ok(RegistryEndpoint::new(
            reference.domain(),
            insecure,
            credentials,
        ))
    }

    async fn load_credentials(&self) -> Result<Arc<Credentials>> {
        let credentials = match &self.credentials {
            CredentialSource::DefaultFile => Credentials::load_default().await,
            CredentialSource::File(path) => Credentials::load(path).await,
            CredentialSource::Loaded(credentials) => return Ok(credentials.clone()),
        };
        credentials.map(Arc::new).map_err(Error::Credentials)
    }
}
