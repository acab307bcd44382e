//! Ferry bundle interfaces
//!
//! This crate contains the application bundle model shared by the registry
//! transfer crates: the bundle document itself and the relocation map that
//! travels with it between registries.

#![deny(missing_docs)]

pub mod bundle;
pub mod relocation;

pub use bundle::{Bundle, Image, InvocationImage};
pub use relocation::RelocationMap;

/// Type alias for a [`Result`]s with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by methods in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error indicating failed JSON (de)serialization.
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// The bundle document is structurally invalid.
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),
}
