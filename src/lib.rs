pub mod commands;
pub mod console;
pub mod opts;
mod reporter;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{bundle::BundleCommands, registry::RegistryCommands};
use opts::GlobalOptions;

pub use reporter::ConsoleReporter;

/// Move application bundles and their images between OCI registries.
#[derive(Parser, Debug)]
#[clap(name = "ferry", version)]
pub struct FerryApp {
    #[clap(flatten)]
    pub options: GlobalOptions,

    #[clap(subcommand)]
    pub command: FerryCommands,
}

#[derive(Subcommand, Debug)]
pub enum FerryCommands {
    /// Pull, push, copy and inspect bundles.
    #[clap(subcommand)]
    Bundle(BundleCommands),
    /// Manage registry credentials.
    #[clap(subcommand)]
    Registry(RegistryCommands),
}

impl FerryApp {
    pub async fn run(self) -> Result<()> {
        match self.command {
            FerryCommands::Bundle(cmd) => cmd.run(&self.options).await,
            FerryCommands::Registry(cmd) => cmd.run().await,
        }
    }
}
