use std::io::IsTerminal;

use clap::Parser;
use ferry_cli::{console, FerryApp};

#[tokio::main]
async fn main() {
    if let Err(err) = _main().await {
        console::error(format_args!("{err}"));
        print_error_chain(&err);
        if is_integrity_failure(&err) {
            console::warn(format_args!(
                "the bundle was rejected because its invocation image cannot be verified. \
                 Ask its publisher to push it again with a content digest"
            ));
        }
        std::process::exit(1)
    }
}

async fn _main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    FerryApp::parse().run().await
}

fn is_integrity_failure(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<ferry_oci::Error>())
        .any(ferry_oci::Error::is_integrity_failure)
}

fn print_error_chain(err: &anyhow::Error) {
    if let Some(cause) = err.source() {
        let is_multiple = cause.source().is_some();
        eprintln!("\nCaused by:");
        for (i, err) in err.chain().skip(1).enumerate() {
            if is_multiple {
                eprintln!("{i:>4}: {}", err)
            } else {
                eprintln!("      {}", err)
            }
        }
    }
}
