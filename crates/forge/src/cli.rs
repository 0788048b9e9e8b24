//! Command-line surface for the Forge build/test orchestrator.
//!
//! This is a thin adapter over `forge_core`: it loads the manifest,
//! constructs the directory/version context the dispatcher needs, calls
//! into `forge_core::{planner, teststage, store}`, and renders the result
//! in the requested format. No orchestration logic lives here (`spec.md`
//! §1 places the CLI out of scope for behavioral correctness).

use clap::{Parser, Subcommand, ValueEnum};

/// The default namespace short engine names expand into
/// (`go://<name>` → `go://<DEFAULT_NAMESPACE>/<name>`), per `spec.md` §4.1.
pub const DEFAULT_NAMESPACE: &str = "example.com/forge/cmd";

#[derive(Parser, Debug)]
#[command(
    name = "forge",
    version,
    about = "Build-and-test orchestrator that delegates to MCP engine subprocesses"
)]
pub struct Cli {
    /// Run as an MCP server instead of dispatching a subcommand. Out of
    /// scope for this core (`spec.md` §1) — the adapter-level wrapper that
    /// would implement it is not part of this crate, so this flag only
    /// exists to keep the documented CLI surface (`spec.md` §6) complete.
    #[arg(long)]
    pub mcp: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build one artifact by name, or every declared artifact if omitted.
    Build {
        /// Artifact name from `manifest.build[].name`.
        name: Option<String>,
    },

    /// Operate on a declared test stage.
    Test {
        /// Stage name from `manifest.test[].name`.
        stage: String,

        #[command(subcommand)]
        action: TestAction,
    },

    /// Build everything, then run every declared test stage in order.
    #[command(name = "test-all")]
    TestAll,

    /// Print the orchestrator's version.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum TestAction {
    /// Provision a test environment for this stage.
    Create {
        #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Print a stored test environment or report by id.
    Get {
        id: String,
        #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Tear down a test environment, or remove a stored report.
    Delete { id: String },

    /// List stored test environments and reports for this stage.
    List {
        #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Run the stage's test suite, auto-creating an environment if needed.
    Run {
        /// An existing test environment id. Auto-created when omitted.
        id: Option<String>,
        #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

/// Rendering format for CLI output, matching `spec.md` §6's `-o json|yaml`
/// surface plus the default human-readable table.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl From<OutputFormat> for forge_core::io::OutputFormat {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Table => forge_core::io::OutputFormat::Text,
            OutputFormat::Json => forge_core::io::OutputFormat::Json,
            OutputFormat::Yaml => forge_core::io::OutputFormat::Yaml,
        }
    }
}
