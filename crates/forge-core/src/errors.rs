//! Error types and handling
//!
//! This module provides domain-specific error types for every failure kind
//! named in the orchestrator's error design: URI resolution, the MCP
//! transport, the artifact/report store, the build planner, and the
//! test-stage coordinator each raise a [`ForgeError`] variant rather than an
//! opaque string.

use thiserror::Error;

/// Domain errors for the Forge orchestrator core.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// The manifest file could not be found, read, or parsed.
    #[error("manifest error: {message}")]
    Manifest {
        /// Human-readable description of what went wrong.
        message: String,
    },

    /// A manifest field failed validation (e.g. an empty engine list).
    #[error("manifest validation error: {message}")]
    ManifestValidation {
        /// Human-readable description of the validation failure.
        message: String,
    },

    /// An engine URI used a scheme other than `go://` or `alias://`.
    #[error("unknown engine URI scheme in `{uri}`")]
    UnknownScheme {
        /// The offending URI.
        uri: String,
    },

    /// An engine URI could not be parsed at all.
    #[error("malformed engine URI `{uri}`: {reason}")]
    UriMalformed {
        /// The offending URI.
        uri: String,
        /// Why parsing failed.
        reason: String,
    },

    /// An `alias://` URI referenced an alias absent from `manifest.engines`.
    #[error("alias not found: `{alias}`")]
    AliasNotFound {
        /// The alias name that could not be resolved.
        alias: String,
    },

    /// An alias was declared with an empty sub-engine list.
    #[error("alias `{alias}` has no engines")]
    AliasHasNoEngines {
        /// The alias name.
        alias: String,
    },

    /// Resolving an alias chain revisited an alias already on the path.
    #[error("circular alias reference involving `{alias}`")]
    AliasCycle {
        /// The alias where the cycle was detected.
        alias: String,
    },

    /// A multi-engine alias sentinel was fed back into the single-engine
    /// resolver instead of being routed to the multi-engine orchestrator.
    #[error(
        "unresolvable multi-engine alias `{alias}`: route it through the multi-engine orchestrator"
    )]
    MultiEngineSentinel {
        /// The alias name.
        alias: String,
    },

    /// Installing a missing `go://` engine via the toolchain failed.
    #[error("failed to install engine `{name}`: {message}")]
    EngineInstall {
        /// The engine short name.
        name: String,
        /// Underlying failure description.
        message: String,
    },

    /// The engine child process could not be spawned.
    #[error("failed to spawn engine `{command}`: {source}")]
    Spawn {
        /// The command that failed to spawn.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The MCP session transport failed (e.g. the child exited before
    /// replying).
    #[error("MCP transport error with engine `{command}`: {message}")]
    Transport {
        /// The command backing the engine.
        command: String,
        /// Description of the transport failure.
        message: String,
    },

    /// A tool call returned `isError: true`.
    #[error("tool error from `{tool}`: {message}")]
    ToolError {
        /// The tool name that was called.
        tool: String,
        /// The engine-provided error message.
        message: String,
    },

    /// A tool result could not be decoded into the expected shape.
    #[error("result schema mismatch calling `{tool}` on `{engine}`: {message}")]
    SchemaMismatch {
        /// The tool name that was called.
        tool: String,
        /// The engine URI/command that returned the result.
        engine: String,
        /// Description of the mismatch.
        message: String,
    },

    /// The artifact/report store file exists but could not be parsed.
    #[error("failed to read artifact store at {path}: {message}")]
    StoreRead {
        /// Path to the store file.
        path: String,
        /// Underlying parse/IO error description.
        message: String,
    },

    /// The artifact/report store could not be written to disk.
    #[error("failed to write artifact store at {path}: {message}")]
    StoreWrite {
        /// Path to the store file.
        path: String,
        /// Underlying IO error description.
        message: String,
    },

    /// A requested artifact name matched nothing in the manifest.
    #[error("no artifact found matching name `{name}`")]
    NoArtifactFound {
        /// The requested artifact name.
        name: String,
    },

    /// A step in a multi-engine pipeline failed; the pipeline aborts but
    /// artifacts already produced by earlier steps remain persisted.
    #[error("pipeline step {step} (`{engine}`) failed: {message}")]
    PipelineStep {
        /// Zero-based index of the failing step.
        step: usize,
        /// The engine URI for the failing step.
        engine: String,
        /// Underlying failure description.
        message: String,
    },

    /// A test stage failed to create, run, or delete its environment.
    #[error("test stage `{stage}` failed: {message}")]
    StageFailure {
        /// The stage name.
        stage: String,
        /// Description of the failure.
        message: String,
    },

    /// A metadata or file key could not be encoded into an environment
    /// variable name unambiguously (more than one `.` separator).
    #[error(
        "ambiguous dotted key `{key}`: expected exactly one `.` separating sub-engine and logical name"
    )]
    AmbiguousKey {
        /// The offending key.
        key: String,
    },

    /// Generic I/O failure not covered by a more specific variant.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results with [`ForgeError`].
pub type Result<T> = std::result::Result<T, ForgeError>;
