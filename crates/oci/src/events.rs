//! Image copy progress events.

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};

/// Whether an image copy is beginning or has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferPhase {
    /// The copy is about to start.
    Start,
    /// The copy has finished, successfully or not.
    End,
}

/// Progress of a single image copy during fixup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferEvent {
    /// The image being copied, as written in the bundle.
    pub image: String,
    /// Where the image is being copied to.
    pub destination: String,
    /// Start or end of the copy.
    pub phase: TransferPhase,
    /// The failure, for end events of copies that failed.
    pub error: Option<String>,
}

impl TransferEvent {
    pub(crate) fn start(image: &str, destination: &str) -> Self {
        Self {
            image: image.to_owned(),
            destination: destination.to_owned(),
            phase: TransferPhase::Start,
            error: None,
        }
    }

    pub(crate) fn end(image: &str, destination: &str, error: Option<&anyhow::Error>) -> Self {
        Self {
            image: image.to_owned(),
            destination: destination.to_owned(),
            phase: TransferPhase::End,
            error: error.map(|e| format!("{e:#}")),
        }
    }
}

/// Observes image copies made while fixing up a bundle.
///
/// Events from concurrent copies may interleave. Reporting is purely
/// observational: errors returned from a reporter are logged and otherwise
/// ignored, and never affect the transfer.
pub trait TransferEventReporter: Send + Sync {
    /// Called before an image copy starts.
    fn on_copy_start(&self, event: &TransferEvent) -> Result<()>;

    /// Called after an image copy finishes; `event.error` is set on failure.
    fn on_copy_end(&self, event: &TransferEvent) -> Result<()>;
}

/// Deliver `event` to `reporter`, discarding any reporting failure.
pub(crate) fn notify(reporter: &dyn TransferEventReporter, event: &TransferEvent) {
    let result = match event.phase {
        TransferPhase::Start => reporter.on_copy_start(event),
        TransferPhase::End => reporter.on_copy_end(event),
    };
    if let Err(e) = result {
        tracing::debug!("Ignoring transfer event reporter failure for {}: {e:#}", event.image);
    }
}

/// A reporter that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullReporter;

impl TransferEventReporter for NullReporter {
    fn on_copy_start(&self, _event: &TransferEvent) -> Result<()> {
        Ok(())
    }

    fn on_copy_end(&self, _event: &TransferEvent) -> Result<()> {
        Ok(())
    }
}

/// A reporter writing one human-readable line per event.
pub struct WriterReporter<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> WriterReporter<W> {
    /// Creates a reporter writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn line(&self, line: std::fmt::Arguments) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("reporter output lock poisoned"))?;
        out.write_fmt(line)?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write + Send> TransferEventReporter for WriterReporter<W> {
    fn on_copy_start(&self, event: &TransferEvent) -> Result<()> {
        self.line(format_args!("Starting to copy image {}...", event.image))
    }

    fn on_copy_end(&self, event: &TransferEvent) -> Result<()> {
        match &event.error {
            Some(error) => self.line(format_args!(
                "Failed to copy image {}: {}",
                event.image, error
            )),
            None => self.line(format_args!("Completed image {} copy", event.image)),
        }
    }
}

impl<T: TransferEventReporter + ?Sized> TransferEventReporter for Arc<T> {
    fn on_copy_start(&self, event: &TransferEvent) -> Result<()> {
        (**self).on_copy_start(event)
    }

    fn on_copy_end(&self, event: &TransferEvent) -> Result<()> {
        (**self).on_copy_end(event)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct FailingReporter;

    impl TransferEventReporter for FailingReporter {
        fn on_copy_start(&self, _event: &TransferEvent) -> Result<()> {
            Err(anyhow!("terminal went away"))
        }

        fn on_copy_end(&self, _event: &TransferEvent) -> Result<()> {
            Err(anyhow!("terminal went away"))
        }
    }

    #[test]
    fn writer_reporter_formats_events() {
        let reporter = WriterReporter::new(Vec::new());
        let image = "docker.io/library/nginx:1.25";
        let destination = "example.com/ns/nginx:1.25";

        notify(&reporter, &TransferEvent::start(image, destination));
        notify(&reporter, &TransferEvent::end(image, destination, None));
        let failure = anyhow!("unauthorized");
        notify(
            &reporter,
            &TransferEvent::end(image, destination, Some(&failure)),
        );

        let output = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(
            "Starting to copy image docker.io/library/nginx:1.25...\n\
             Completed image docker.io/library/nginx:1.25 copy\n\
             Failed to copy image docker.io/library/nginx:1.25: unauthorized\n",
            output
        );
    }

    #[test]
    fn reporter_failures_are_ignored() {
        // Must not panic or propagate
        notify(&FailingReporter, &TransferEvent::start("a", "b"));
        notify(&FailingReporter, &TransferEvent::end("a", "b", None));
    }
}
