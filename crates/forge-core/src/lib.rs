//! Core library for the Forge build/test orchestrator
//!
//! This crate contains the shared logic for manifest loading, engine URI
//! resolution, the MCP-over-stdio client adapter, workspace provisioning,
//! the on-disk artifact/report store, the build planner, and the test-stage
//! coordinator. The `forge` binary crate is a thin CLI shell around it.

pub mod config;
pub mod engine;
pub mod errors;
pub mod io;
pub mod logging;
pub mod observability;
pub mod planner;
mod semver_utils;
pub mod store;
pub mod teststage;
pub mod workspace;

// Re-export IndexMap for use by dependent crates (preserves insertion order for ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = version();
        assert!(!version.is_empty());
        assert!(version.contains('.'));
    }
}
