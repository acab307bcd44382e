//! Commands for the Ferry CLI.

/// Commands for moving bundles between registries.
pub mod bundle;
/// Commands for working with registry credentials.
pub mod registry;
