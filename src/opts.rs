use clap::Args;
use ferry_oci::{fixup::DEFAULT_MAX_CONCURRENT_COPIES, Registry, TransferOptions};

use crate::reporter::ConsoleReporter;

pub const INSECURE_OPT: &str = "INSECURE";
pub const BUNDLE_FILE_OPT: &str = "BUNDLE_FILE";
pub const RELOCATION_MAP_OPT: &str = "RELOCATION_MAP";
pub const MAX_CONCURRENT_COPIES_OPT: &str = "MAX_CONCURRENT_COPIES";
pub const MAX_CONCURRENT_COPIES_ENV: &str = "FERRY_MAX_CONCURRENT_COPIES";
pub const DEFAULT_BUNDLE_FILE: &str = "bundle.json";

/// Options shared by every command.
#[derive(Args, Clone, Debug)]
pub struct GlobalOptions {
    /// Maximum number of images copied at the same time while pushing
    #[clap(
        name = MAX_CONCURRENT_COPIES_OPT,
        long = "max-concurrent-copies",
        env = MAX_CONCURRENT_COPIES_ENV,
        default_value_t = DEFAULT_MAX_CONCURRENT_COPIES,
        global = true,
    )]
    pub max_concurrent_copies: usize,

    /// Print progress messages
    #[clap(long = "verbose", short = 'v', takes_value = false, global = true)]
    pub verbose: bool,
}

impl GlobalOptions {
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            max_concurrent_copies: self.max_concurrent_copies.max(1),
            verbose: self.verbose,
        }
    }

    /// A registry client reporting progress to the terminal.
    pub fn registry(&self) -> Registry {
        Registry::new()
            .with_options(self.transfer_options())
            .with_reporter(ConsoleReporter)
            .with_output(std::io::stdout())
    }
}
