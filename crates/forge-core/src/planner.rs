//! Build planner & multi-engine orchestrator (`spec.md` §4.4).
//!
//! From a manifest: filter build specs by name, group by engine URI,
//! provision a workspace, inject the standard directory triple plus each
//! spec's opaque bag, choose `build` vs `buildBatch`, and sequence
//! multi-engine builder pipelines. The planner never talks to
//! [`crate::engine::McpClient`] directly — it goes through
//! [`crate::engine::call_tool`], the uniform capability surface every
//! engine is dispatched against.

use crate::config::{BuildSpec, EngineConfig, Manifest};
use crate::engine::{self, EngineKind, ResolvedEngine, UriResolver};
use crate::errors::{ForgeError, Result};
use crate::observability::{build_dispatch_span, TimedSpan};
use crate::store::{Artifact, Store};
use crate::workspace::{self, Workspace};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, instrument, warn};

/// Outcome of dispatching one engine-keyed partition.
#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    /// The (possibly alias) engine URI the partition was grouped under.
    pub engine: String,
    /// Number of artifacts this partition contributed to the store.
    pub artifacts: usize,
    /// Set when the partition failed. Per `spec.md` §7 a partition failure
    /// does not abort sibling partitions.
    pub error: Option<String>,
}

/// Summary of a `build` invocation across every partition it touched.
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// Total artifacts upserted into the store across all partitions.
    pub upserted: usize,
    /// Per-partition outcome, in the order partitions were first seen.
    pub partitions: Vec<PartitionOutcome>,
}

impl BuildSummary {
    /// `true` iff every partition (and every pipeline within it) succeeded.
    pub fn success(&self) -> bool {
        self.partitions.iter().all(|p| p.error.is_none())
    }
}

/// Run the build planner: filter by `artifact_name` (all specs when `None`),
/// partition by engine, dispatch each partition, and flush the store once.
#[instrument(skip(manifest, store), fields(artifact_name))]
pub async fn run_build(
    manifest: &Manifest,
    root_dir: &Path,
    artifact_name: Option<&str>,
    store_path: &Path,
    default_namespace: &str,
    own_version: &str,
    store: &mut Store,
) -> Result<BuildSummary> {
    let specs: Vec<&BuildSpec> = manifest
        .build
        .iter()
        .filter(|s| match artifact_name {
            Some(n) => s.name == n,
            None => true,
        })
        .collect();

    if specs.is_empty() {
        return match artifact_name {
            // A specific artifact was requested and not found.
            Some(name) => Err(ForgeError::NoArtifactFound {
                name: name.to_string(),
            }),
            // Build-everything against a manifest with zero `build:` entries
            // is a no-op, not an error.
            None => Ok(BuildSummary::default()),
        };
    }

    let ws = workspace::provision(root_dir)?;
    let resolver = UriResolver::new(manifest, default_namespace, own_version);

    let mut partitions: IndexMap<String, Vec<&BuildSpec>> = IndexMap::new();
    for spec in specs {
        partitions.entry(spec.engine.clone()).or_default().push(spec);
    }

    info!("build planner: {} partition(s)", partitions.len());

    let mut summary = BuildSummary::default();

    for (engine_uri, group) in &partitions {
        let outcome = dispatch_partition(manifest, &resolver, engine_uri, group, &ws, store).await;
        summary.upserted += outcome.artifacts;
        summary.partitions.push(outcome);
    }

    store.write(store_path)?;
    Ok(summary)
}

async fn dispatch_partition(
    manifest: &Manifest,
    resolver: &UriResolver<'_>,
    engine_uri: &str,
    group: &[&BuildSpec],
    ws: &Workspace,
    store: &mut Store,
) -> PartitionOutcome {
    let names: Vec<&str> = group.iter().map(|s| s.name.as_str()).collect();
    let timed_span = TimedSpan::new(build_dispatch_span(&names.join(","), engine_uri));

    let resolved = match resolver.resolve(engine_uri).await {
        Ok(r) => r,
        Err(e) => {
            warn!("partition `{engine_uri}` failed to resolve: {e}");
            timed_span.complete();
            return PartitionOutcome {
                engine: engine_uri.to_string(),
                artifacts: 0,
                error: Some(e.to_string()),
            };
        }
    };

    let (artifacts, error) = match resolved.kind {
        EngineKind::Mcp => dispatch_single_engine(engine_uri, group, &resolved, ws).await,
        EngineKind::Alias => dispatch_multi_engine(manifest, resolver, &resolved, group, ws).await,
    };

    for artifact in &artifacts {
        store.upsert_artifact(artifact.clone());
    }

    timed_span.complete();
    PartitionOutcome {
        engine: engine_uri.to_string(),
        artifacts: artifacts.len(),
        error,
    }
}

/// Build the standard MCP argument bag for one spec: the directory triple,
/// the spec's own typed fields, and its opaque `spec` bag merged in.
fn base_bag(spec: &BuildSpec, ws: &Workspace) -> Map<String, Value> {
    let mut bag = Map::new();
    bag.insert("name".to_string(), Value::String(spec.name.clone()));
    bag.insert("src".to_string(), Value::String(spec.src.clone()));
    bag.insert("dest".to_string(), Value::String(spec.dest.clone()));
    bag.insert("engine".to_string(), Value::String(spec.engine.clone()));
    bag.insert(
        "tmpDir".to_string(),
        Value::String(ws.tmp_dir.display().to_string()),
    );
    bag.insert(
        "buildDir".to_string(),
        Value::String(ws.build_dir.display().to_string()),
    );
    bag.insert(
        "rootDir".to_string(),
        Value::String(ws.root_dir.display().to_string()),
    );
    for (key, value) in &spec.spec {
        bag.insert(key.clone(), value.clone());
    }
    bag
}

/// Decode a `build`/`buildBatch` result into zero or more artifacts. A
/// result that is neither a single object nor an array is a schema
/// mismatch: warn and skip rather than aborting the partition (`spec.md`
/// §7). Within an array, individual elements that fail to decode are
/// skipped the same way; their siblings still land in the store.
fn parse_artifacts(value: Value) -> Vec<Artifact> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<Artifact>(item) {
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    warn!("skipping artifact with schema mismatch: {e}");
                    None
                }
            })
            .collect(),
        other => match serde_json::from_value::<Artifact>(other) {
            Ok(artifact) => vec![artifact],
            Err(e) => {
                warn!("skipping build result with schema mismatch: {e}");
                Vec::new()
            }
        },
    }
}

/// Dispatch a partition resolved to a directly-callable engine: `build` for
/// a single spec, `buildBatch` for two or more (`spec.md` §4.4).
async fn dispatch_single_engine(
    engine_uri: &str,
    specs: &[&BuildSpec],
    resolved: &ResolvedEngine,
    ws: &Workspace,
) -> (Vec<Artifact>, Option<String>) {
    let mut bags: Vec<Value> = specs
        .iter()
        .map(|spec| {
            let mut bag = base_bag(spec, ws);
            engine::apply_overlay_to_bag(&mut bag, &resolved.overlay);
            Value::Object(bag)
        })
        .collect();

    let result = if let [only] = bags.as_mut_slice() {
        info!("dispatching `build` to {engine_uri}");
        let bag = only.take();
        engine::call_tool(resolved, engine_uri, "build", bag, &HashMap::new()).await
    } else {
        info!("dispatching `buildBatch` ({} specs) to {engine_uri}", bags.len());
        let mut batch = Map::new();
        batch.insert("specs".to_string(), Value::Array(bags));
        engine::call_tool(resolved, engine_uri, "buildBatch", Value::Object(batch), &HashMap::new()).await
    };

    match result {
        Ok(value) => (parse_artifacts(value), None),
        Err(e) => (Vec::new(), Some(e.to_string())),
    }
}

/// Dispatch a partition that resolved to a multi-engine alias sentinel: run
/// the pipeline once per spec in the partition, since each pipeline step
/// operates on a single logical artifact at a time (`spec.md` §4.4).
async fn dispatch_multi_engine(
    manifest: &Manifest,
    resolver: &UriResolver<'_>,
    resolved: &ResolvedEngine,
    specs: &[&BuildSpec],
    ws: &Workspace,
) -> (Vec<Artifact>, Option<String>) {
    let alias = &resolved.command;
    let config = match manifest.engines.iter().find(|e| &e.alias == alias) {
        Some(c) => c,
        None => {
            return (
                Vec::new(),
                Some(format!("alias `{alias}` vanished between resolution and dispatch")),
            )
        }
    };

    let mut all_artifacts = Vec::new();
    let mut first_error = None;

    for spec in specs {
        let (artifacts, error) = run_pipeline(alias, spec, config, resolver, ws).await;
        all_artifacts.extend(artifacts);
        if error.is_some() && first_error.is_none() {
            first_error = error;
        }
    }

    (all_artifacts, first_error)
}

/// Run one multi-engine builder pipeline to completion (or failure) for a
/// single spec, threading each step's artifacts into the next step's
/// `previousArtifacts` field. Already-produced artifacts are returned even
/// on failure, so the caller can still persist partial progress.
async fn run_pipeline(
    alias: &str,
    spec: &BuildSpec,
    config: &EngineConfig,
    resolver: &UriResolver<'_>,
    ws: &Workspace,
) -> (Vec<Artifact>, Option<String>) {
    let mut previous: Vec<Artifact> = Vec::new();

    for (idx, step) in config.steps().iter().enumerate() {
        let mut resolved = match resolver.resolve_concrete(&step.engine).await {
            Ok(r) => r,
            Err(e) => {
                return (
                    previous,
                    Some(
                        ForgeError::PipelineStep {
                            step: idx,
                            engine: step.engine.clone(),
                            message: e.to_string(),
                        }
                        .to_string(),
                    ),
                )
            }
        };
        if step.spec != Default::default() {
            resolved.overlay = step.spec.clone();
        }

        let mut bag = base_bag(spec, ws);
        engine::apply_overlay_to_bag(&mut bag, &resolved.overlay);
        bag.insert(
            "previousArtifacts".to_string(),
            serde_json::to_value(&previous).unwrap_or(Value::Array(Vec::new())),
        );

        let label = format!("{alias}[{idx}]={}", step.engine);
        info!("pipeline step {idx} of alias `{alias}`: {}", step.engine);
        let result = engine::call_tool(&resolved, &label, "build", Value::Object(bag), &HashMap::new()).await;

        match result {
            Ok(value) => previous = parse_artifacts(value),
            Err(e) => {
                return (
                    previous,
                    Some(
                        ForgeError::PipelineStep {
                            step: idx,
                            engine: step.engine.clone(),
                            message: e.to_string(),
                        }
                        .to_string(),
                    ),
                )
            }
        }
    }

    (previous, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestSpec;
    use serde_json::json;
    use std::collections::HashMap as Map2;

    fn spec(name: &str, engine: &str) -> BuildSpec {
        BuildSpec {
            name: name.to_string(),
            src: "./src".to_string(),
            dest: "./dest".to_string(),
            engine: engine.to_string(),
            spec: Map2::new(),
        }
    }

    #[test]
    fn base_bag_carries_standard_keys_and_opaque_spec() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace::provision(dir.path()).unwrap();
        let mut s = spec("app", "go://build-go");
        s.spec.insert("platform".to_string(), json!("linux/amd64"));

        let bag = base_bag(&s, &ws);
        assert_eq!(bag.get("name").unwrap(), "app");
        assert_eq!(bag.get("platform").unwrap(), "linux/amd64");
        assert!(bag.contains_key("tmpDir"));
        assert!(bag.contains_key("buildDir"));
        assert!(bag.contains_key("rootDir"));
    }

    #[test]
    fn parse_artifacts_accepts_single_object() {
        let value = json!({
            "name": "app",
            "type": "binary",
            "location": "build/bin/app",
            "timestamp": "2026-07-28T00:00:00Z"
        });
        let artifacts = parse_artifacts(value);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "app");
    }

    #[test]
    fn parse_artifacts_accepts_array_and_skips_bad_elements() {
        let value = json!([
            {"name": "a", "type": "binary", "location": "x", "timestamp": "2026-07-28T00:00:00Z"},
            {"not": "an artifact"}
        ]);
        let artifacts = parse_artifacts(value);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "a");
    }

    #[tokio::test]
    async fn no_matching_artifact_name_is_an_error() {
        let manifest = Manifest {
            build: vec![spec("app", "go://build-go")],
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::default();
        let err = run_build(
            &manifest,
            dir.path(),
            Some("nonexistent"),
            &dir.path().join("artifacts.yaml"),
            "example.com/forge/cmd",
            "1.0.0",
            &mut store,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ForgeError::NoArtifactFound { .. }));
    }

    #[tokio::test]
    async fn build_everything_against_an_empty_build_list_is_a_no_op() {
        let manifest = Manifest::default();
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::default();
        let summary = run_build(
            &manifest,
            dir.path(),
            None,
            &dir.path().join("artifacts.yaml"),
            "example.com/forge/cmd",
            "1.0.0",
            &mut store,
        )
        .await
        .unwrap();
        assert_eq!(summary.upserted, 0);
        assert!(summary.partitions.is_empty());
        assert!(summary.success());
    }

    #[tokio::test]
    async fn unresolvable_engine_records_a_partition_error_without_aborting_others() {
        let manifest = Manifest {
            build: vec![
                spec("a", "go://definitely-nonexistent-engine-binary-a"),
                spec("b", "go://definitely-nonexistent-engine-binary-b"),
            ],
            test: Vec::<TestSpec>::new(),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::default();
        let summary = run_build(
            &manifest,
            dir.path(),
            None,
            &dir.path().join("artifacts.yaml"),
            "example.com/forge/cmd",
            "1.0.0",
            &mut store,
        )
        .await
        .unwrap();

        assert_eq!(summary.partitions.len(), 2);
        assert!(!summary.success());
        assert_eq!(summary.upserted, 0);
    }
}
