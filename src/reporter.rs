use anyhow::Result;
use ferry_oci::{TransferEvent, TransferEventReporter};

use crate::console;

/// Reports image copies as status lines on the terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleReporter;

impl TransferEventReporter for ConsoleReporter {
    fn on_copy_start(&self, event: &TransferEvent) -> Result<()> {
        console::step(
            "Copying",
            format_args!("{} to {}", event.image, event.destination),
        );
        Ok(())
    }

    fn on_copy_end(&self, event: &TransferEvent) -> Result<()> {
        match &event.error {
            None => console::step("Copied", format_args!("{}", event.image)),
            Some(err) => console::warn(format_args!(
                "Failed to copy image {}: {err}",
                event.image
            )),
        }
        Ok(())
    }
}
