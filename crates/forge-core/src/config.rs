//! Manifest loading and parsing
//!
//! This module handles `forge.yaml` parsing: discovery of the manifest file
//! in a workspace, typed parsing of the fields the orchestrator inspects
//! (`build`, `test`, `engines`, `artifactStorePath`), and pass-through of
//! every opaque `spec` bag as a `serde_json::Value` map so new engine
//! arguments never require a manifest schema change.
//!
//! ## Manifest Resolution Workflow
//!
//! 1. Discover `forge.yaml` (or an explicit `--config` path) in the
//!    workspace root.
//! 2. Parse it into strongly typed [`Manifest`], [`BuildSpec`], [`TestSpec`],
//!    and [`EngineConfig`] structs.
//! 3. Validate known invariants eagerly (non-empty engine lists, a `type`
//!    recognized by [`EngineType`]); forward everything else untouched.

use crate::errors::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Default on-disk location of the artifact/report store, relative to the
/// workspace root. Configurable via `manifest.artifactStorePath` — see
/// `spec.md` §9 (the source's two historical spellings are resolved by
/// making this the one built-in default and never guessing another).
pub const DEFAULT_ARTIFACT_STORE_PATH: &str = ".forge/artifacts.yaml";

/// Location of a discovered (or not-yet-existing) manifest file.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestLocation {
    /// Path to the manifest file.
    path: PathBuf,
    /// Whether the file exists on disk.
    exists: bool,
}

impl ManifestLocation {
    /// Construct a location, probing the filesystem for existence.
    pub fn new(path: PathBuf) -> Self {
        let exists = path.exists();
        Self { path, exists }
    }

    /// Path to the manifest file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the manifest file exists.
    pub fn exists(&self) -> bool {
        self.exists
    }
}

/// Top-level `forge.yaml` document.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Human-readable project name.
    #[serde(default)]
    pub name: Option<String>,

    /// Path to the artifact/report store, relative to the workspace root.
    #[serde(default = "default_artifact_store_path")]
    pub artifact_store_path: String,

    /// Build artifact declarations.
    #[serde(default)]
    pub build: Vec<BuildSpec>,

    /// Test stage declarations.
    #[serde(default)]
    pub test: Vec<TestSpec>,

    /// Named engine aliases.
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
}

fn default_artifact_store_path() -> String {
    DEFAULT_ARTIFACT_STORE_PATH.to_string()
}

/// One build artifact declaration (`manifest.build[]`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BuildSpec {
    /// Artifact name, unique within a single `build` invocation's scope.
    pub name: String,
    /// Source path passed to the engine.
    pub src: String,
    /// Destination path passed to the engine.
    pub dest: String,
    /// Engine URI (`go://...` or `alias://...`) responsible for this artifact.
    pub engine: String,
    /// Opaque argument bag merged into the MCP call. The parser validates
    /// only the typed fields above; everything under `spec` is forwarded
    /// unchanged.
    #[serde(default)]
    pub spec: HashMap<String, Value>,
}

/// One test stage declaration (`manifest.test[]`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TestSpec {
    /// Stage name.
    pub name: String,
    /// Testenv engine URI, or empty/`noop` if this stage has no environment
    /// and the runner produces a report directly.
    #[serde(default)]
    pub testenv: String,
    /// Runner engine URI.
    pub runner: String,
    /// Opaque argument bag merged into the `run` call.
    #[serde(default)]
    pub spec: HashMap<String, Value>,
}

/// Discriminates which slot of [`EngineConfig`] a manifest entry fills.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EngineType {
    /// A builder alias, resolved from `build[].engine`.
    Builder,
    /// A testenv alias, resolved from `test[].testenv`.
    Testenv,
    /// A test-runner alias, resolved from `test[].runner`.
    #[serde(rename = "test-runner")]
    TestRunner,
}

/// Per-step configuration carried by a builder/test-runner/testenv entry.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineStepSpec {
    /// Override for the resolved command.
    #[serde(default)]
    pub command: Option<String>,
    /// Additional argv entries.
    #[serde(default)]
    pub args: Vec<String>,
    /// Additional environment variables for the child process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Path to a `.env`-style file to load into the child's environment.
    #[serde(default)]
    pub env_file: Option<String>,
    /// Working directory override for the child process.
    #[serde(default)]
    pub work_dir: Option<String>,
}

/// One entry in a builder/test-runner/testenv pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EngineStep {
    /// Engine URI for this step.
    pub engine: String,
    /// Per-step configuration overlay.
    #[serde(default)]
    pub spec: EngineStepSpec,
}

/// A named, manifest-local indirection over one or more engine URIs
/// (`manifest.engines[]`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    /// The alias name referenced as `alias://<alias>`.
    pub alias: String,
    /// Which slot this alias fills.
    #[serde(rename = "type")]
    pub kind: EngineType,
    /// Builder pipeline steps (when `kind == Builder`).
    #[serde(default)]
    pub builder: Vec<EngineStep>,
    /// Test-runner pipeline steps (when `kind == TestRunner`), also
    /// accepted under the manifest's `testRunner` spelling.
    #[serde(default, alias = "testRunner")]
    pub test_runner: Vec<EngineStep>,
    /// Testenv sub-engine list (when `kind == Testenv`).
    #[serde(default)]
    pub testenv: Vec<EngineStep>,
}

impl EngineConfig {
    /// The ordered step list relevant to this alias's `kind`, regardless of
    /// which manifest key it was declared under.
    pub fn steps(&self) -> &[EngineStep] {
        match self.kind {
            EngineType::Builder => &self.builder,
            EngineType::TestRunner => &self.test_runner,
            EngineType::Testenv => &self.testenv,
        }
    }

    /// `true` when this alias has more than one sub-engine and therefore
    /// resolves to a multi-engine sentinel rather than a plain rename.
    pub fn is_multi_engine(&self) -> bool {
        self.steps().len() > 1
    }
}

/// Loads and validates `forge.yaml` manifests.
pub struct ManifestLoader;

impl ManifestLoader {
    /// Discover `forge.yaml` in a workspace root.
    ///
    /// The returned location may point at a non-existent file; callers
    /// decide whether that is fatal (the CLI surface treats a missing
    /// manifest as fatal; library callers may want a fallback).
    #[instrument(skip_all, fields(workspace = %workspace.display()))]
    pub fn discover(workspace: &Path) -> Result<ManifestLocation> {
        if !workspace.exists() {
            return Err(ForgeError::Manifest {
                message: format!("workspace does not exist: {}", workspace.display()),
            });
        }

        let candidate = workspace.join("forge.yaml");
        debug!("checking for manifest at {}", candidate.display());
        Ok(ManifestLocation::new(candidate))
    }

    /// Load and parse a manifest from an explicit path.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Manifest> {
        let timed_span = crate::observability::TimedSpan::new(crate::observability::manifest_load_span(
            &path.display().to_string(),
        ));

        let raw = std::fs::read_to_string(path).map_err(|e| ForgeError::Manifest {
            message: format!("failed to read {}: {e}", path.display()),
        })?;

        let manifest: Manifest =
            serde_yaml::from_str(&raw).map_err(|e| ForgeError::Manifest {
                message: format!("failed to parse {}: {e}", path.display()),
            })?;

        Self::validate(&manifest)?;
        timed_span.complete();
        Ok(manifest)
    }

    /// Eagerly validate the invariants the dispatcher relies on: every
    /// alias has at least one engine, and builder/testenv/test-runner
    /// entries are only populated for the matching `type`.
    fn validate(manifest: &Manifest) -> Result<()> {
        for engine in &manifest.engines {
            if engine.steps().is_empty() {
                return Err(ForgeError::ManifestValidation {
                    message: format!(
                        "alias `{}` of type `{:?}` declares no engines",
                        engine.alias, engine.kind
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_manifest() {
        let yaml = r#"
name: demo
build:
  - name: app
    src: ./cmd/app
    dest: ./build/bin
    engine: go://build-go
"#;
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("demo"));
        assert_eq!(manifest.artifact_store_path, DEFAULT_ARTIFACT_STORE_PATH);
        assert_eq!(manifest.build.len(), 1);
        assert_eq!(manifest.build[0].engine, "go://build-go");
    }

    #[test]
    fn default_store_path_matches_spec() {
        let yaml = "build: []\n";
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.artifact_store_path, ".forge/artifacts.yaml");
    }

    #[test]
    fn custom_store_path_is_honored() {
        let yaml = "artifactStorePath: custom/store.yaml\n";
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.artifact_store_path, "custom/store.yaml");
    }

    #[test]
    fn engine_step_spec_accepts_camel_case_manifest_keys() {
        let yaml = r#"
alias: rename
type: builder
builder:
  - engine: go://build-go
    spec:
      command: /usr/local/bin/build-go
      args: ["-race"]
      envFile: .env.build
      workDir: ./cmd/app
"#;
        let engine: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        let step = &engine.builder[0];
        assert_eq!(step.spec.command.as_deref(), Some("/usr/local/bin/build-go"));
        assert_eq!(step.spec.env_file.as_deref(), Some(".env.build"));
        assert_eq!(step.spec.work_dir.as_deref(), Some("./cmd/app"));
    }

    #[test]
    fn multi_engine_alias_is_detected() {
        let yaml = r#"
alias: multi
type: builder
builder:
  - engine: go://step-one
  - engine: go://step-two
"#;
        let engine: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(engine.is_multi_engine());
    }

    #[test]
    fn single_engine_alias_is_not_multi() {
        let yaml = r#"
alias: rename
type: builder
builder:
  - engine: go://build-go
"#;
        let engine: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(!engine.is_multi_engine());
    }

    #[test]
    fn empty_alias_fails_validation() {
        let yaml = r#"
name: demo
engines:
  - alias: broken
    type: builder
"#;
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        assert!(ManifestLoader::validate(&manifest).is_err());
    }

    #[test]
    fn opaque_spec_bag_round_trips() {
        let yaml = r#"
name: app
src: ./cmd/app
dest: ./build/bin
engine: go://build-go
spec:
  platform: linux/amd64
  flags:
    - -race
"#;
        let spec: BuildSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            spec.spec.get("platform").and_then(|v| v.as_str()),
            Some("linux/amd64")
        );
        assert!(spec.spec.get("flags").unwrap().is_array());
    }
}
