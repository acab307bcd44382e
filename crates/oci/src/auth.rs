//! Local registry credentials.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use docker_credential::DockerCredential;
use ferry_common::ui::quoted_path;
use oci_distribution::secrets::RegistryAuth;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the location of the credentials file.
pub const AUTH_FILE_ENV: &str = "FERRY_REGISTRY_AUTH";

const AUTH_FILE: &str = "registry-auth.json";

/// The host Docker Hub image references resolve to.
const DOCKER_HUB_REGISTRY: &str = "index.docker.io";

/// The Ferry registry credentials file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Map between registry server and base64 encoded username:password credential set.
    #[serde(default)]
    pub auths: BTreeMap<String, String>,
}

impl AuthConfig {
    /// Load the authentication configuration from the default location
    /// ($FERRY_REGISTRY_AUTH, or registry-auth.json in the Ferry config dir).
    /// A missing file is an empty configuration; an unreadable one is an error.
    pub async fn load_default() -> Result<Self> {
        Self::load_or_default(&Self::default_path()?).await
    }

    /// Load the authentication configuration from `path`, treating a missing
    /// file as empty.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        match tokio::fs::try_exists(path).await {
            Ok(true) => Self::load(path).await,
            Ok(false) => Ok(Self::default()),
            Err(e) => Err(e)
                .with_context(|| format!("cannot access authentication file {}", quoted_path(path))),
        }
    }

    /// Insert the new credentials into the auths file, with the server as the key and base64
    /// encoded username:password as the value.
    pub fn insert(
        &mut self,
        server: impl AsRef<str>,
        username: impl AsRef<str>,
        password: impl AsRef<str>,
    ) {
        let encoded = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            format!("{}:{}", username.as_ref(), password.as_ref()),
        );
        self.auths.insert(normalize_server(server.as_ref()), encoded);
    }

    /// The credentials file location.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(AUTH_FILE_ENV) {
            return Ok(PathBuf::from(path));
        }
        Ok(ferry_common::config_dir::config_dir()?.join(AUTH_FILE))
    }

    /// Decode every stored credential set.
    fn decode(&self) -> Result<BTreeMap<String, (String, String)>> {
        self.auths
            .iter()
            .map(|(server, encoded)| {
                decode_credential(encoded)
                    .with_context(|| format!("malformed credentials stored for {server}"))
                    .map(|pair| (normalize_server(server), pair))
            })
            .collect()
    }

    async fn load(p: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(&p)
            .await
            .with_context(|| format!("cannot read authentication file {}", quoted_path(p)))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("cannot load authentication file {}", quoted_path(p)))
    }

    /// Save the authentication configuration to `p`.
    pub async fn save(&self, p: &Path) -> Result<()> {
        if let Some(parent_dir) = p.parent() {
            tokio::fs::create_dir_all(parent_dir)
                .await
                .with_context(|| format!("Failed to create config dir {}", parent_dir.display()))?;
        }
        tokio::fs::write(&p, &serde_json::to_vec_pretty(&self)?)
            .await
            .with_context(|| format!("cannot save authentication file {}", quoted_path(p)))
    }
}

/// The key credentials for `server` are stored and looked up under.
///
/// Schemes, trailing slashes and API paths are dropped, and the Docker Hub
/// aliases all map to the registry host image references resolve to.
pub fn normalize_server(server: &str) -> String {
    let server = server.trim();
    let server = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);
    let host = server.split('/').next().unwrap_or(server);
    match host {
        "docker.io" | "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB_REGISTRY.to_owned(),
        _ => host.to_owned(),
    }
}

fn decode_credential(encoded: &str) -> Result<(String, String)> {
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)?;
    let decoded = std::str::from_utf8(&bytes)?;
    let (username, password) = decoded
        .split_once(':')
        .context("expected credentials in the form username:secret")?;
    Ok((username.to_owned(), password.to_owned()))
}

/// Registry credentials available to an endpoint. Read-only once loaded.
#[derive(Clone, Default)]
pub struct Credentials {
    basic: BTreeMap<String, (String, String)>,
    docker_fallback: bool,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secrets
        f.debug_struct("Credentials")
            .field("servers", &self.basic.keys().collect::<Vec<_>>())
            .field("docker_fallback", &self.docker_fallback)
            .finish()
    }
}

impl Credentials {
    /// Load the credentials from the default location, falling back to the
    /// Docker credential store for registries without stored credentials.
    pub async fn load_default() -> Result<Self> {
        Self::load(&AuthConfig::default_path()?).await
    }

    /// Load the credentials from `path`, falling back to the Docker
    /// credential store for registries without stored credentials.
    pub async fn load(path: &Path) -> Result<Self> {
        let config = AuthConfig::load_or_default(path).await?;
        Ok(Self {
            basic: config.decode()?,
            docker_fallback: true,
        })
    }

    /// Credentials that only ever resolve to anonymous access.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Returns true if Ferry's own store holds credentials for `server`.
    pub fn has_stored(&self, server: &str) -> bool {
        self.basic.contains_key(&normalize_server(server))
    }

    /// Construct the registry authentication for `server`.
    pub fn registry_auth(&self, server: &str) -> RegistryAuth {
        let server = normalize_server(server);

        if let Some((username, password)) = self.basic.get(&server) {
            tracing::trace!("Using stored registry credentials for {server}");
            return RegistryAuth::Basic(username.clone(), password.clone());
        }
        if !self.docker_fallback {
            return RegistryAuth::Anonymous;
        }

        match docker_credential::get_credential(&server) {
            Err(e) => {
                tracing::trace!("Cannot retrieve credentials from Docker, attempting to use anonymous auth: {}", e);
                RegistryAuth::Anonymous
            }
            Ok(DockerCredential::UsernamePassword(username, password)) => {
                tracing::trace!("Found Docker credentials");
                RegistryAuth::Basic(username, password)
            }
            Ok(DockerCredential::IdentityToken(_)) => {
                tracing::trace!("Cannot use contents of Docker config, identity token not supported. Using anonymous auth");
                RegistryAuth::Anonymous
            }
        }
    }
}
