use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ferry_common::ui::quoted_path;
use ferry_oci::auth::AuthConfig;
use std::io::Read;

use crate::console;

/// Commands for working with registry credentials.
#[derive(Subcommand, Debug)]
pub enum RegistryCommands {
    /// Log in to a registry.
    Login(Login),
}

impl RegistryCommands {
    pub async fn run(self) -> Result<()> {
        match self {
            RegistryCommands::Login(cmd) => cmd.run().await,
        }
    }
}

#[derive(Parser, Debug)]
pub struct Login {
    /// Username for the registry
    #[clap(long = "username", short = 'u')]
    pub username: Option<String>,

    /// Password for the registry
    #[clap(long = "password", short = 'p')]
    pub password: Option<String>,

    /// Take the password from stdin
    #[clap(
        long = "password-stdin",
        takes_value = false,
        conflicts_with = "password"
    )]
    pub password_stdin: bool,

    #[clap()]
    pub server: String,
}

impl Login {
    pub async fn run(self) -> Result<()> {
        let username = match self.username {
            Some(u) => u,
            None => loop {
                let result = dialoguer::Input::<String>::new()
                    .with_prompt("Username")
                    .interact_text()?;
                if !result.trim().is_empty() {
                    break result;
                }
            },
        };

        // --password-stdin wins over --password, which wins over prompting.
        let password = if self.password_stdin {
            let mut buf = String::new();
            std::io::stdin().lock().read_to_string(&mut buf)?;
            buf.trim_end_matches(['\r', '\n']).to_owned()
        } else {
            match self.password {
                Some(p) => p,
                None => rpassword::prompt_password("Password: ")?,
            }
        };

        let path = AuthConfig::default_path()?;
        store_credentials(&path, &self.server, &username, &password).await?;

        console::step(
            "Saved",
            format_args!(
                "credentials for {username} on registry {} to {}",
                self.server,
                quoted_path(&path)
            ),
        );
        Ok(())
    }
}

/// Credentials are stored as given; the registry is not contacted.
async fn store_credentials(
    path: &std::path::Path,
    server: &str,
    username: &str,
    password: &str,
) -> Result<()> {
    let mut auth = AuthConfig::load_or_default(path).await?;
    auth.insert(server, username, password);
    auth.save(path)
        .await
        .context("cannot save registry credentials")
}
