//! Ferry common modules

#![deny(missing_docs)]

// Keep this crate small: no code in the root module, no dependencies on
// other Ferry crates, and only helpers with at least two dependents.

pub mod config_dir;
pub mod sha256;
pub mod ui;
