//! Test-stage coordinator (`spec.md` §4.5).
//!
//! For one declared stage: create a test environment via its testenv
//! engine, forward the environment's files and metadata to the runner
//! engine through well-known `FORGE_*` environment variables, call `run`,
//! persist the resulting report, and tear the environment down again. Like
//! the build planner, every engine call goes through
//! [`crate::engine::call_tool`] rather than touching [`crate::engine::McpClient`]
//! directly.

use crate::config::{Manifest, TestSpec};
use crate::engine::{self, UriResolver};
use crate::errors::{ForgeError, Result};
use crate::observability::{test_all_span, test_create_span, test_delete_span, test_run_span, TimedSpan};
use crate::planner;
use crate::store::{
    Coverage, Store, TestEnvironment, TestEnvironmentStatus, TestReport, TestReportStatus, TestStats,
};
use crate::workspace;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A stage whose `testenv` is empty or `noop` — it produces reports
/// directly from `run` and has nothing for `create`/`delete` to manage.
fn is_noop_testenv(testenv: &str) -> bool {
    testenv.is_empty() || testenv == "noop"
}

fn find_stage<'a>(manifest: &'a Manifest, stage: &str) -> Result<&'a TestSpec> {
    manifest
        .test
        .iter()
        .find(|t| t.name == stage)
        .ok_or_else(|| ForgeError::StageFailure {
            stage: stage.to_string(),
            message: "no such stage declared in the manifest".to_string(),
        })
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Wire shape of a `testenv.create` result. The engine reports `testID`
/// (capital ID, per `spec.md` §3/§6), distinct from the store's own
/// snake_case `id` field.
#[derive(Debug, Deserialize)]
struct RawTestEnvironment {
    #[serde(rename = "testID")]
    test_id: String,
    #[serde(rename = "tmpDir")]
    tmp_dir: String,
    #[serde(default)]
    files: HashMap<String, String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// `testenv.create` (`spec.md` §4.5 "Create"). Fails fast for stages with no
/// testenv — those stages produce reports directly via `run`.
#[instrument(skip(manifest, store), fields(stage))]
pub async fn create(
    manifest: &Manifest,
    stage: &str,
    default_namespace: &str,
    own_version: &str,
    store: &mut Store,
) -> Result<TestEnvironment> {
    let timed_span = TimedSpan::new(test_create_span(stage));

    let test_spec = find_stage(manifest, stage)?;
    if is_noop_testenv(&test_spec.testenv) {
        timed_span.complete();
        return Err(ForgeError::StageFailure {
            stage: stage.to_string(),
            message: "stage has no testenv; its runner produces reports directly via `run`".to_string(),
        });
    }

    let resolver = UriResolver::new(manifest, default_namespace, own_version);
    let resolved = resolver.resolve_concrete(&test_spec.testenv).await?;

    let mut args = Map::new();
    args.insert("stage".to_string(), Value::String(stage.to_string()));

    info!("creating test environment for stage `{stage}` via {}", test_spec.testenv);
    let result = engine::call_tool(&resolved, &test_spec.testenv, "create", Value::Object(args), &HashMap::new())
        .await
        .map_err(|e| ForgeError::StageFailure {
            stage: stage.to_string(),
            message: e.to_string(),
        })?;

    let raw: RawTestEnvironment =
        serde_json::from_value(result).map_err(|e| ForgeError::SchemaMismatch {
            tool: "create".to_string(),
            engine: test_spec.testenv.clone(),
            message: e.to_string(),
        })?;

    let timestamp = now();
    let env = TestEnvironment {
        id: raw.test_id,
        stage: stage.to_string(),
        status: TestEnvironmentStatus::Created,
        tmp_dir: raw.tmp_dir,
        files: raw.files,
        metadata: raw.metadata,
        created_at: timestamp.clone(),
        updated_at: timestamp,
        extra: Default::default(),
    };

    store.upsert_test_environment(env.clone());
    timed_span.complete();
    Ok(env)
}

/// Split a dotted key (`<sub-engine>.<logical-name>`) into its two
/// components and upper-snake-case each one for use in an environment
/// variable name. Rejects keys with more or fewer than one `.` separator,
/// per the lossy-encoding open question in `spec.md` §9.
fn split_dotted_key(key: &str) -> Result<(String, String)> {
    let mut parts = key.split('.');
    let (Some(sub_engine), Some(logical), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ForgeError::AmbiguousKey { key: key.to_string() });
    };
    Ok((shout_case(sub_engine), shout_case(logical)))
}

fn shout_case(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Build the `FORGE_*` environment variables the runner child process sees:
/// one `FORGE_ARTIFACT_<SUBENGINE>_<LOGICAL>` per file (resolved to an
/// absolute path under the environment's `tmp_dir`), one
/// `FORGE_METADATA_<SUBENGINE>_<KEY>` per metadata entry, plus
/// `FORGE_TESTENV_TMPDIR`.
fn runner_env(env: &TestEnvironment) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    vars.insert("FORGE_TESTENV_TMPDIR".to_string(), env.tmp_dir.clone());

    for (key, relative_path) in &env.files {
        let (sub, logical) = split_dotted_key(key)?;
        let absolute = Path::new(&env.tmp_dir).join(relative_path);
        vars.insert(
            format!("FORGE_ARTIFACT_{sub}_{logical}"),
            absolute.to_string_lossy().into_owned(),
        );
    }

    for (key, value) in &env.metadata {
        let (sub, logical) = split_dotted_key(key)?;
        vars.insert(format!("FORGE_METADATA_{sub}_{logical}"), value.clone());
    }

    Ok(vars)
}

/// Wire shape of a `runner.run` result.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTestReport {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    test_stats: TestStats,
    #[serde(default)]
    coverage: Option<Coverage>,
    #[serde(default)]
    artifact_files: Vec<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Outcome of a `run` invocation: the persisted report plus, when this
/// stage has a testenv, the id of the environment it ran against (created
/// fresh if the caller did not pass one in).
pub struct RunOutcome {
    /// The report persisted into the store.
    pub report: TestReport,
    /// The environment this report was run against, if the stage has one.
    pub environment_id: Option<String>,
}

/// `runner.run` (`spec.md` §4.5 "Run"). Auto-creates a testenv when `id` is
/// `None` and the stage declares a non-noop testenv.
#[instrument(skip(manifest, store), fields(stage))]
pub async fn run(
    manifest: &Manifest,
    stage: &str,
    id: Option<&str>,
    root_dir: &Path,
    default_namespace: &str,
    own_version: &str,
    store: &mut Store,
) -> Result<RunOutcome> {
    let timed_span = TimedSpan::new(test_run_span(stage));

    let test_spec = find_stage(manifest, stage)?;

    let environment = if !is_noop_testenv(&test_spec.testenv) {
        let env = match id {
            Some(existing) => store
                .get_test_environment(existing)
                .cloned()
                .ok_or_else(|| ForgeError::StageFailure {
                    stage: stage.to_string(),
                    message: format!("no test environment with id `{existing}`"),
                })?,
            None => create(manifest, stage, default_namespace, own_version, store).await?,
        };
        Some(env)
    } else {
        None
    };

    let resolver = UriResolver::new(manifest, default_namespace, own_version);
    let resolved = resolver.resolve_concrete(&test_spec.runner).await?;

    let ws = workspace::provision(root_dir)?;
    let report_id = Uuid::new_v4().to_string();
    let timestamp = now();

    let mut bag = Map::new();
    bag.insert("id".to_string(), Value::String(report_id.clone()));
    bag.insert("stage".to_string(), Value::String(stage.to_string()));
    bag.insert(
        "name".to_string(),
        Value::String(format!("{stage}-{timestamp}")),
    );
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
    for (key, value) in &test_spec.spec {
        bag.insert(key.clone(), value.clone());
    }
    engine::apply_overlay_to_bag(&mut bag, &resolved.overlay);

    let extra_env = match &environment {
        Some(env) => runner_env(env)?,
        None => HashMap::new(),
    };

    info!("running stage `{stage}` via {}", test_spec.runner);
    let result = engine::call_tool(&resolved, &test_spec.runner, "run", Value::Object(bag), &extra_env).await;

    let result = match result {
        Ok(value) => value,
        Err(e) => {
            if let Some(mut env) = environment.clone() {
                env.status = TestEnvironmentStatus::Failed;
                env.updated_at = now();
                store.upsert_test_environment(env);
            }
            return Err(ForgeError::StageFailure {
                stage: stage.to_string(),
                message: e.to_string(),
            });
        }
    };

    let raw: RawTestReport = serde_json::from_value(result).map_err(|e| ForgeError::SchemaMismatch {
        tool: "run".to_string(),
        engine: test_spec.runner.clone(),
        message: e.to_string(),
    })?;

    let status = match raw.status.as_deref() {
        Some("passed") => TestReportStatus::Passed,
        Some("failed") => TestReportStatus::Failed,
        _ if raw.test_stats.failed == 0 && raw.error_message.is_none() => TestReportStatus::Passed,
        _ => TestReportStatus::Failed,
    };

    let report = TestReport {
        id: report_id,
        stage: stage.to_string(),
        status,
        start_time: raw.start_time.unwrap_or(timestamp.clone()),
        duration: raw.duration,
        test_stats: raw.test_stats,
        coverage: raw.coverage,
        artifact_files: raw.artifact_files,
        error_message: raw.error_message,
        extra: Default::default(),
    };

    store.upsert_test_report(report.clone());

    let environment_id = if let Some(mut env) = environment {
        env.status = match status {
            TestReportStatus::Passed => TestEnvironmentStatus::Passed,
            TestReportStatus::Failed => TestEnvironmentStatus::Failed,
        };
        env.updated_at = now();
        store.upsert_test_environment(env.clone());
        Some(env.id)
    } else {
        None
    };

    timed_span.complete();
    Ok(RunOutcome { report, environment_id })
}

/// `delete <id>` (`spec.md` §4.5 "Delete"). Dispatches on whether `id`
/// names a report or an environment, since the CLI surface does not
/// distinguish the two id spaces up front.
#[instrument(skip(manifest, store), fields(id))]
pub async fn delete(
    manifest: &Manifest,
    id: &str,
    default_namespace: &str,
    own_version: &str,
    store: &mut Store,
) -> Result<()> {
    let timed_span = TimedSpan::new(test_delete_span(id));

    if let Some((_, deletion)) = store.delete_test_report(id) {
        if deletion.partially_deleted() {
            warn!("report `{id}` deleted, but some artifact files could not be removed");
        }
        timed_span.complete();
        return Ok(());
    }

    let env = store
        .get_test_environment(id)
        .cloned()
        .ok_or_else(|| ForgeError::StageFailure {
            stage: String::new(),
            message: format!("no test report or environment with id `{id}`"),
        })?;

    let test_spec = find_stage(manifest, &env.stage)?;
    let resolver = UriResolver::new(manifest, default_namespace, own_version);
    let resolved = resolver.resolve_concrete(&test_spec.testenv).await?;

    let mut args = Map::new();
    args.insert("testID".to_string(), Value::String(id.to_string()));
    engine::call_tool(&resolved, &test_spec.testenv, "delete", Value::Object(args), &HashMap::new())
        .await
        .map_err(|e| ForgeError::StageFailure {
            stage: env.stage.clone(),
            message: e.to_string(),
        })?;

    if let Err(e) = std::fs::remove_dir_all(&env.tmp_dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove tmpDir {} for environment `{id}`: {e}", env.tmp_dir);
        }
    }

    store.delete_test_environment(id);
    timed_span.complete();
    Ok(())
}

/// Summary of a `test-all` run: every stage attempted regardless of earlier
/// failures, with an aggregate pass/fail count.
#[derive(Debug, Clone, Default)]
pub struct TestAllSummary {
    /// Stage names that passed.
    pub passed: Vec<String>,
    /// Stage names that failed, paired with the failure message.
    pub failed: Vec<(String, String)>,
}

impl TestAllSummary {
    /// `true` iff every declared stage passed.
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Build everything, then run every declared stage in order, cleaning up
/// each stage's environment afterward regardless of outcome. Stage
/// failures do not short-circuit later stages (`spec.md` §4.5 "Test-all").
#[instrument(skip(manifest, store))]
pub async fn test_all(
    manifest: &Manifest,
    root_dir: &Path,
    store_path: &Path,
    default_namespace: &str,
    own_version: &str,
    store: &mut Store,
) -> Result<TestAllSummary> {
    let timed_span = TimedSpan::new(test_all_span(manifest.test.len()));

    planner::run_build(manifest, root_dir, None, store_path, default_namespace, own_version, store).await?;

    let mut summary = TestAllSummary::default();

    for test_spec in &manifest.test {
        let outcome = run(
            manifest,
            &test_spec.name,
            None,
            root_dir,
            default_namespace,
            own_version,
            store,
        )
        .await;

        match outcome {
            Ok(run_outcome) => {
                let passed = matches!(run_outcome.report.status, TestReportStatus::Passed);
                if passed {
                    summary.passed.push(test_spec.name.clone());
                } else {
                    summary
                        .failed
                        .push((test_spec.name.clone(), "test report recorded a failure".to_string()));
                }
                if let Some(env_id) = run_outcome.environment_id {
                    if let Err(e) = delete(manifest, &env_id, default_namespace, own_version, store).await {
                        warn!("failed to clean up environment `{env_id}` after stage `{}`: {e}", test_spec.name);
                    }
                }
            }
            Err(e) => {
                warn!("stage `{}` failed: {e}", test_spec.name);
                summary.failed.push((test_spec.name.clone(), e.to_string()));
            }
        }

        store.write(store_path)?;
    }

    timed_span.complete();
    Ok(summary)
}
