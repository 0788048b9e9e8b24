//! Artifact / report store
//!
//! A single on-disk YAML document holding three lists — artifacts, test
//! environments, and test reports — persisted with read-or-create and
//! atomic-write semantics (`spec.md` §3, §4.3). The store is owned by the
//! orchestrator for the duration of one command; there is no cross-process
//! locking (concurrent invocations racing on the same file are out of
//! scope, per `spec.md` §5).

use crate::errors::{ForgeError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Unknown on-disk fields, kept so a document written by a newer (or
/// differently-versioned) engine round-trips without losing data it added
/// (`spec.md` §4.3: "Unknown fields in the on-disk document are preserved
/// on round-trip").
type Extra = IndexMap<String, serde_yaml::Value>;

/// Schema version tag written to the on-disk document.
const STORE_VERSION: &str = "1";

/// A build output produced by a build engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    /// Artifact name. Unique within the store per `(name, type)`.
    pub name: String,
    /// Artifact type, e.g. `binary`, `generated`, `image`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Filesystem path or URI where the artifact lives.
    pub location: String,
    /// RFC3339 UTC timestamp of when this record was produced.
    pub timestamp: String,
    /// Content hash or VCS ref, when the engine provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Unknown fields, preserved across read/write round-trips.
    #[serde(flatten, default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra: Extra,
}

impl Artifact {
    /// The `(name, type)` identity this artifact is upserted by.
    fn key(&self) -> (&str, &str) {
        (&self.name, &self.kind)
    }
}

/// Lifecycle status of a [`TestEnvironment`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestEnvironmentStatus {
    /// Created by `testenv.create`, not yet exercised.
    Created,
    /// The most recent run against this environment passed.
    Passed,
    /// The most recent run against this environment failed.
    Failed,
    /// Torn down by `testenv.delete`.
    Deleted,
}

/// A provisioned test environment, produced by a testenv engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestEnvironment {
    /// UUIDv4 identity.
    pub id: String,
    /// The stage this environment belongs to.
    pub stage: String,
    /// Current lifecycle status.
    pub status: TestEnvironmentStatus,
    /// Absolute scratch directory owned by this environment.
    pub tmp_dir: String,
    /// Logical-name to `tmpDir`-relative path mapping.
    #[serde(default)]
    pub files: HashMap<String, String>,
    /// Engine-namespaced metadata (e.g. `testenv-kind.clusterName`).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// RFC3339 UTC creation timestamp.
    pub created_at: String,
    /// RFC3339 UTC last-update timestamp.
    pub updated_at: String,
    /// Unknown fields, preserved across read/write round-trips.
    #[serde(flatten, default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra: Extra,
}

/// Outcome of a test suite run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestReportStatus {
    /// The run passed.
    Passed,
    /// The run failed.
    Failed,
}

/// Aggregate pass/fail counts for a test run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestStats {
    /// Total tests executed.
    pub total: u64,
    /// Tests that passed.
    pub passed: u64,
    /// Tests that failed.
    pub failed: u64,
    /// Tests skipped.
    pub skipped: u64,
}

/// Coverage summary attached to a test report, if the runner produced one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Coverage {
    /// Coverage percentage, 0.0-100.0.
    pub percentage: f64,
    /// Path to the coverage report file.
    pub file_path: String,
}

/// A test report, produced by a runner engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    /// UUIDv4 identity.
    pub id: String,
    /// The stage this report belongs to.
    pub stage: String,
    /// Pass/fail outcome.
    pub status: TestReportStatus,
    /// RFC3339 UTC start timestamp.
    pub start_time: String,
    /// Wall-clock duration in seconds.
    pub duration: f64,
    /// Aggregate test statistics.
    pub test_stats: TestStats,
    /// Optional coverage summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<Coverage>,
    /// Absolute paths to files the runner wants retained alongside the
    /// report (logs, coverage data, screenshots).
    #[serde(default)]
    pub artifact_files: Vec<String>,
    /// Error message when the run itself could not complete, as opposed to
    /// individual test failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Unknown fields, preserved across read/write round-trips.
    #[serde(flatten, default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra: Extra,
}

/// Result of deleting a [`TestReport`]'s artifact files: which were
/// removed, which failed, and which were already absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportDeletion {
    /// Files successfully removed.
    pub deleted: Vec<String>,
    /// Files that could not be removed, paired with an error description.
    pub failed: Vec<(String, String)>,
    /// Files that were already absent before deletion was attempted.
    pub already_absent: Vec<String>,
}

impl ReportDeletion {
    /// `true` when at least one file failed to delete.
    pub fn partially_deleted(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// The on-disk document: three lists plus a schema version tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    /// Schema version of this document.
    #[serde(default = "default_version")]
    pub version: String,
    /// Build artifacts.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Test environments.
    #[serde(default)]
    pub test_environments: Vec<TestEnvironment>,
    /// Test reports.
    #[serde(default)]
    pub test_reports: Vec<TestReport>,
    /// Unknown top-level fields, preserved across read/write round-trips.
    #[serde(flatten, default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra: Extra,
}

fn default_version() -> String {
    STORE_VERSION.to_string()
}

impl Store {
    /// Read the store from `path`, or return an empty in-memory store if
    /// the file does not exist. A file that exists but fails to parse is a
    /// fatal error (stale state should never be silently discarded).
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn read_or_create(path: &Path) -> Result<Store> {
        if !path.exists() {
            debug!("no store at {}, starting empty", path.display());
            return Ok(Store {
                version: STORE_VERSION.to_string(),
                ..Default::default()
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|e| ForgeError::StoreRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_yaml::from_str(&raw).map_err(|e| ForgeError::StoreRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Write the store to `path` via temp-file + rename, creating parent
    /// directories as needed.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ForgeError::StoreWrite {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        }

        let serialized = serde_yaml::to_string(self).map_err(|e| ForgeError::StoreWrite {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path = parent.join(format!(
            ".{}.tmp-{}",
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("store"),
            uuid::Uuid::new_v4()
        ));

        std::fs::write(&tmp_path, serialized).map_err(|e| ForgeError::StoreWrite {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        std::fs::rename(&tmp_path, path).map_err(|e| ForgeError::StoreWrite {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        debug!("wrote store with {} artifacts", self.artifacts.len());
        Ok(())
    }

    /// Insert or replace an artifact by `(name, type)` identity.
    pub fn upsert_artifact(&mut self, artifact: Artifact) {
        let key = (artifact.name.clone(), artifact.kind.clone());
        match self
            .artifacts
            .iter()
            .position(|a| a.key() == (key.0.as_str(), key.1.as_str()))
        {
            Some(idx) => self.artifacts[idx] = artifact,
            None => self.artifacts.push(artifact),
        }
    }

    /// Insert or replace a test environment by `id`.
    pub fn upsert_test_environment(&mut self, env: TestEnvironment) {
        match self
            .test_environments
            .iter()
            .position(|e| e.id == env.id)
        {
            Some(idx) => self.test_environments[idx] = env,
            None => self.test_environments.push(env),
        }
    }

    /// Insert or replace a test report by `id`.
    pub fn upsert_test_report(&mut self, report: TestReport) {
        match self.test_reports.iter().position(|r| r.id == report.id) {
            Some(idx) => self.test_reports[idx] = report,
            None => self.test_reports.push(report),
        }
    }

    /// Look up a test environment by id.
    pub fn get_test_environment(&self, id: &str) -> Option<&TestEnvironment> {
        self.test_environments.iter().find(|e| e.id == id)
    }

    /// Look up a test report by id.
    pub fn get_test_report(&self, id: &str) -> Option<&TestReport> {
        self.test_reports.iter().find(|r| r.id == id)
    }

    /// Remove a test environment record by id. Does not touch its
    /// `tmp_dir` on disk — callers that need the directory removed do so
    /// explicitly (the test-stage coordinator does, after a successful
    /// `testenv.delete` call).
    pub fn delete_test_environment(&mut self, id: &str) -> Option<TestEnvironment> {
        let idx = self.test_environments.iter().position(|e| e.id == id)?;
        Some(self.test_environments.remove(idx))
    }

    /// Remove a test report record and best-effort delete each of its
    /// `artifact_files`.
    #[instrument(skip(self))]
    pub fn delete_test_report(&mut self, id: &str) -> Option<(TestReport, ReportDeletion)> {
        let idx = self.test_reports.iter().position(|r| r.id == id)?;
        let report = self.test_reports.remove(idx);

        let mut deletion = ReportDeletion::default();
        for file in &report.artifact_files {
            let path = PathBuf::from(file);
            if !path.exists() {
                deletion.already_absent.push(file.clone());
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => deletion.deleted.push(file.clone()),
                Err(e) => {
                    warn!("failed to remove artifact file {file}: {e}");
                    deletion.failed.push((file.clone(), e.to_string()));
                }
            }
        }

        Some((report, deletion))
    }

    /// List test environments, optionally filtered by stage (empty string
    /// = no filter), sorted by `created_at` descending.
    pub fn list_test_environments(&self, stage: &str) -> Vec<&TestEnvironment> {
        let mut envs: Vec<&TestEnvironment> = self
            .test_environments
            .iter()
            .filter(|e| stage.is_empty() || e.stage == stage)
            .collect();
        envs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        envs
    }

    /// List test reports, optionally filtered by stage, sorted by
    /// `start_time` descending.
    pub fn list_test_reports(&self, stage: &str) -> Vec<&TestReport> {
        let mut reports: Vec<&TestReport> = self
            .test_reports
            .iter()
            .filter(|r| stage.is_empty() || r.stage == stage)
            .collect();
        reports.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifact(name: &str, kind: &str, location: &str) -> Artifact {
        Artifact {
            name: name.to_string(),
            kind: kind.to_string(),
            location: location.to_string(),
            timestamp: "2026-07-28T00:00:00Z".to_string(),
            version: None,
            extra: Extra::new(),
        }
    }

    #[test]
    fn read_or_create_returns_empty_store_when_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("artifacts.yaml");
        let store = Store::read_or_create(&path).unwrap();
        assert!(store.artifacts.is_empty());
    }

    #[test]
    fn read_or_create_fails_on_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("artifacts.yaml");
        std::fs::write(&path, "not: [valid, yaml: structure").unwrap();
        assert!(Store::read_or_create(&path).is_err());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("artifacts.yaml");

        let mut store = Store::default();
        store.upsert_artifact(artifact("app", "binary", "build/bin/app"));
        store.write(&path).unwrap();

        let reloaded = Store::read_or_create(&path).unwrap();
        assert_eq!(reloaded.artifacts.len(), 1);
        assert_eq!(reloaded.artifacts[0].name, "app");
    }

    #[test]
    fn unknown_fields_survive_a_read_modify_write_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("artifacts.yaml");

        std::fs::write(
            &path,
            "version: \"1\"\n\
             artifacts:\n\
             \x20\x20- name: app\n\
             \x20\x20\x20\x20type: binary\n\
             \x20\x20\x20\x20location: build/bin/app\n\
             \x20\x20\x20\x20timestamp: \"2026-07-28T00:00:00Z\"\n\
             \x20\x20\x20\x20builtBy: a-future-engine-field\n\
             testEnvironments: []\n\
             testReports: []\n\
             retentionPolicyVersion: 2\n",
        )
        .unwrap();

        let mut store = Store::read_or_create(&path).unwrap();
        assert_eq!(
            store.extra.get("retentionPolicyVersion"),
            Some(&serde_yaml::Value::Number(2i64.into()))
        );
        assert_eq!(
            store.artifacts[0].extra.get("builtBy").and_then(|v| v.as_str()),
            Some("a-future-engine-field")
        );

        store.upsert_artifact(artifact("other", "binary", "build/bin/other"));
        store.write(&path).unwrap();

        let reloaded = Store::read_or_create(&path).unwrap();
        assert_eq!(
            reloaded.extra.get("retentionPolicyVersion"),
            Some(&serde_yaml::Value::Number(2i64.into()))
        );
        assert_eq!(
            reloaded.artifacts[0].extra.get("builtBy").and_then(|v| v.as_str()),
            Some("a-future-engine-field")
        );
        assert_eq!(reloaded.artifacts.len(), 2);
    }

    #[test]
    fn upsert_replaces_by_name_and_type() {
        let mut store = Store::default();
        store.upsert_artifact(artifact("app", "binary", "build/bin/app-v1"));
        store.upsert_artifact(artifact("app", "binary", "build/bin/app-v2"));

        assert_eq!(store.artifacts.len(), 1);
        assert_eq!(store.artifacts[0].location, "build/bin/app-v2");
    }

    #[test]
    fn upsert_keeps_distinct_types_separate() {
        let mut store = Store::default();
        store.upsert_artifact(artifact("app", "binary", "build/bin/app"));
        store.upsert_artifact(artifact("app", "image", "registry/app:latest"));

        assert_eq!(store.artifacts.len(), 2);
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut store = Store::default();
        let a = artifact("app", "binary", "build/bin/app");
        store.upsert_artifact(a.clone());
        store.upsert_artifact(a.clone());
        assert_eq!(store.artifacts.len(), 1);
        assert_eq!(store.artifacts[0], a);
    }

    #[test]
    fn delete_test_report_removes_record_and_files() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("log.txt");
        std::fs::write(&present, "log").unwrap();
        let absent = dir.path().join("missing.txt");

        let mut store = Store::default();
        store.upsert_test_report(TestReport {
            id: "r1".to_string(),
            stage: "integration".to_string(),
            status: TestReportStatus::Passed,
            start_time: "2026-07-28T00:00:00Z".to_string(),
            duration: 1.0,
            test_stats: TestStats::default(),
            coverage: None,
            artifact_files: vec![
                present.to_string_lossy().to_string(),
                absent.to_string_lossy().to_string(),
            ],
            error_message: None,
            extra: Extra::new(),
        });

        let (_, deletion) = store.delete_test_report("r1").unwrap();
        assert!(store.get_test_report("r1").is_none());
        assert_eq!(deletion.deleted.len(), 1);
        assert_eq!(deletion.already_absent.len(), 1);
        assert!(!deletion.partially_deleted());
        assert!(!present.exists());
    }

    #[test]
    fn list_test_reports_filters_by_stage_and_sorts_descending() {
        let mut store = Store::default();
        for (id, stage, start) in [
            ("r1", "unit", "2026-07-28T00:00:00Z"),
            ("r2", "integration", "2026-07-28T01:00:00Z"),
            ("r3", "integration", "2026-07-28T02:00:00Z"),
        ] {
            store.upsert_test_report(TestReport {
                id: id.to_string(),
                stage: stage.to_string(),
                status: TestReportStatus::Passed,
                start_time: start.to_string(),
                duration: 1.0,
                test_stats: TestStats::default(),
                coverage: None,
                artifact_files: vec![],
                error_message: None,
                extra: Extra::new(),
            });
        }

        let filtered = store.list_test_reports("integration");
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].id, "r3");
        assert_eq!(filtered[1].id, "r2");

        assert_eq!(store.list_test_reports("").len(), 3);
    }
}
