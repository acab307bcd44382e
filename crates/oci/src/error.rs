//! Errors raised by bundle transfers

use std::fmt;

/// The registry operation an error occurred during.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Pulling a bundle
    Pull,
    /// Pushing a bundle
    Push,
    /// Copying an image
    Copy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Pull => "pull",
            Operation::Push => "push",
            Operation::Copy => "copy",
        })
    }
}

/// Bundle transfer errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The reference does not match `[REGISTRY/]NAME[:TAG|@DIGEST]`.
    #[error("invalid reference format {reference:?}, expected REGISTRY/name:tag: {reason}")]
    InvalidReferenceFormat {
        /// The rejected input
        reference: String,
        /// Why it was rejected
        reason: String,
    },

    /// The primary image of a pulled bundle has no content digest, so it
    /// could have been replaced after the bundle was published.
    #[error("unable to verify that the pulled image {image} is the invocation image referenced by the bundle because the bundle does not specify a content digest. This could allow for the invocation image to be replaced or tampered with")]
    MissingContentDigest {
        /// The primary image reference
        image: String,
    },

    /// The bundle document is malformed.
    #[error("invalid bundle at {reference}: {reason}")]
    InvalidBundle {
        /// Where the bundle came from or was going to
        reference: String,
        /// What is wrong with it
        reason: String,
    },

    /// The registry transport failed.
    #[error("{}", transport_message(*operation, reference))]
    RegistryTransport {
        /// The operation being attempted
        operation: Operation,
        /// The reference involved
        reference: String,
        /// The underlying failure
        #[source]
        source: anyhow::Error,
    },

    /// An image could not be copied or rewritten while preparing a push.
    /// Nothing was published.
    #[error("error preparing the bundle before pushing: failed to relocate image {image}")]
    Fixup {
        /// The image that failed
        image: String,
        /// The underlying failure
        #[source]
        source: anyhow::Error,
    },

    /// The local credential store could not be read.
    #[error("unable to load registry credentials")]
    Credentials(#[source] anyhow::Error),
}

fn transport_message(operation: Operation, reference: &str) -> String {
    match operation {
        Operation::Pull => format!("unable to pull remote bundle {reference}"),
        Operation::Push => format!("error pushing the bundle to {reference}"),
        Operation::Copy => format!("unable to copy image {reference}"),
    }
}

impl Error {
    pub(crate) fn transport(
        operation: Operation,
        reference: impl fmt::Display,
        source: anyhow::Error,
    ) -> Self {
        Self::RegistryTransport {
            operation,
            reference: reference.to_string(),
            source,
        }
    }

    /// Returns true for rejections that indicate the bundle may have been
    /// tampered with, as opposed to ordinary transfer failures.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Error::MissingContentDigest { .. })
    }
}

/// Type alias for a [`Result`]s with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
