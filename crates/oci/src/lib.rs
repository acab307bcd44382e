//! OCI registries integration.
//!
//! Bundles are stored as OCI artifacts: the bundle document is the artifact
//! config and the relocation map, when there is one, is its single layer.
#![deny(missing_docs)]

pub mod auth;
pub mod client;
pub mod endpoint;
mod error;
pub mod events;
pub mod fixup;
mod pull;
mod push;
pub mod reference;
mod registry;
pub mod transport;

pub use client::OciTransport;
pub use endpoint::{EndpointFactory, InsecureRegistries, RegistryEndpoint};
pub use error::{Error, Operation, Result};
pub use events::{
    NullReporter, TransferEvent, TransferEventReporter, TransferPhase, WriterReporter,
};
pub use fixup::{CopiedImage, FixupSummary};
pub use pull::PulledBundle;
pub use push::PushedBundle;
pub use reference::{parse_reference, BundleReference, ImageReference};
pub use registry::{Registry, TransferOptions};
pub use transport::{RegistryTransport, StoredBundle};
