//! CLI command dispatch. Each submodule wraps one `forge_core` entry point
//! and renders its result; none of them contain orchestration logic.

mod build;
mod context;
mod render;
mod version;

use crate::cli::{Cli, Command};
use anyhow::Result;

/// Own version used both as the default version for in-namespace engines
/// and as the `--version` compatibility baseline (`spec.md` §4.1).
pub const OWN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the parsed CLI to completion, returning the process exit code.
pub async fn dispatch(cli: Cli) -> Result<i32> {
    if cli.mcp {
        eprintln!(
            "forge --mcp: the human-facing MCP server is a thin wrapper outside this \
             orchestrator's core (spec.md §1) and is not implemented here."
        );
        return Ok(1);
    }

    match cli.command {
        Some(Command::Build { name }) => build::run(name).await,
        Some(Command::Test { stage, action }) => test::run(stage, action).await,
        Some(Command::TestAll) => test::run_all().await,
        Some(Command::Version) => version::run(),
        None => {
            eprintln!("no command given; run `forge --help` for usage");
            Ok(1)
        }
    }
}
