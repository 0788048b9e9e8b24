//! Engine URI parsing and resolution (`spec.md` §4.1).
//!
//! Two schemes are accepted: `go://<token>[@<version>]` and
//! `alias://<name>`. Everything else is [`ForgeError::UnknownScheme`].

use crate::config::{EngineStepSpec, EngineType, Manifest};
use crate::errors::{ForgeError, Result};
use crate::semver_utils;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, instrument, warn};

/// Which half of the dispatcher a [`ResolvedEngine`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// A concrete engine the MCP client can spawn directly.
    Mcp,
    /// A multi-engine alias sentinel the caller must route to the
    /// multi-engine orchestrator rather than dispatch directly.
    Alias,
}

/// The outcome of resolving an engine URI.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEngine {
    /// Whether this is directly dispatchable or a multi-engine sentinel.
    pub kind: EngineKind,
    /// For `Mcp`: the executable to spawn. For `Alias`: the alias name.
    pub command: String,
    /// Argv to pass to the executable (empty for `Alias`).
    pub argv: Vec<String>,
    /// Per-step overrides carried by the alias entry this URI was resolved
    /// through (`command`/`args`/`env`/`envFile`/`workDir`), empty when the
    /// URI was a bare `go://` reference with no alias indirection.
    pub overlay: EngineStepSpec,
}

/// Hard-coded rewrite table for deprecated engine URIs (`spec.md` §9: kept
/// in code rather than the manifest, the simpler of the two compatible
/// choices — see DESIGN.md).
fn deprecated_rewrite(uri: &str) -> Option<&'static str> {
    match uri {
        "go://build-container" => Some("go://container-build"),
        "go://test-cluster" => Some("go://testenv-kind"),
        _ => None,
    }
}

/// Resolves engine URIs against a manifest's `engines` table and the
/// orchestrator's own default namespace/version.
pub struct UriResolver<'a> {
    manifest: &'a Manifest,
    default_namespace: String,
    own_version: String,
}

impl<'a> UriResolver<'a> {
    /// Build a resolver. `default_namespace` is the configured engine
    /// namespace short names expand into (e.g. a module path like
    /// `example.com/forge/cmd`); `own_version` is the orchestrator's own
    /// version, used both as the default version for in-namespace engines
    /// and as the compatibility baseline for the `--version` check.
    pub fn new(manifest: &'a Manifest, default_namespace: impl Into<String>, own_version: impl Into<String>) -> Self {
        Self {
            manifest,
            default_namespace: default_namespace.into(),
            own_version: own_version.into(),
        }
    }

    /// Resolve a URI, possibly returning a multi-engine [`EngineKind::Alias`]
    /// sentinel that the caller must route to the multi-engine
    /// orchestrator instead of dispatching directly.
    #[instrument(skip(self), fields(uri))]
    pub async fn resolve(&self, uri: &str) -> Result<ResolvedEngine> {
        let timed_span = crate::observability::TimedSpan::new(crate::observability::engine_resolve_span(uri));
        let mut visited = HashSet::new();
        let result = self.resolve_inner(uri, &mut visited).await;
        timed_span.complete();
        result
    }

    /// Resolve a URI and reject multi-engine sentinels. Used by the
    /// single-engine dispatch path and by pipeline step resolution, both of
    /// which require a directly dispatchable engine.
    #[instrument(skip(self), fields(uri))]
    pub async fn resolve_concrete(&self, uri: &str) -> Result<ResolvedEngine> {
        let resolved = self.resolve(uri).await?;
        if resolved.kind == EngineKind::Alias {
            return Err(ForgeError::MultiEngineSentinel {
                alias: resolved.command,
            });
        }
        Ok(resolved)
    }

    async fn resolve_inner(
        &self,
        uri: &str,
        visited: &mut HashSet<String>,
    ) -> Result<ResolvedEngine> {
        let uri = match deprecated_rewrite(uri) {
            Some(rewritten) => {
                warn!("engine URI `{uri}` is deprecated, using `{rewritten}` instead");
                rewritten
            }
            None => uri,
        };

        if let Some(token) = uri.strip_prefix("go://") {
            return self.resolve_go(token).await;
        }

        if let Some(alias) = uri.strip_prefix("alias://") {
            if !visited.insert(alias.to_string()) {
                return Err(ForgeError::AliasCycle {
                    alias: alias.to_string(),
                });
            }
            return self.resolve_alias(alias, visited).await;
        }

        Err(ForgeError::UnknownScheme {
            uri: uri.to_string(),
        })
    }

    async fn resolve_alias(
        &self,
        alias: &str,
        visited: &mut HashSet<String>,
    ) -> Result<ResolvedEngine> {
        let config = self
            .manifest
            .engines
            .iter()
            .find(|e| e.alias == alias)
            .ok_or_else(|| ForgeError::AliasNotFound {
                alias: alias.to_string(),
            })?;

        let steps = config.steps();
        if steps.is_empty() {
            return Err(ForgeError::AliasHasNoEngines {
                alias: alias.to_string(),
            });
        }

        match config.kind {
            EngineType::Testenv => {
                debug!("testenv alias `{alias}` resolves to canonical go://testenv");
                self.resolve_inner("go://testenv", visited).await
            }
            EngineType::Builder | EngineType::TestRunner if steps.len() == 1 => {
                let mut resolved = self.resolve_inner(&steps[0].engine, visited).await?;
                resolved.overlay = steps[0].spec.clone();
                Ok(resolved)
            }
            EngineType::Builder | EngineType::TestRunner => {
                debug!(
                    "alias `{alias}` has {} engines, returning multi-engine sentinel",
                    steps.len()
                );
                Ok(ResolvedEngine {
                    kind: EngineKind::Alias,
                    command: alias.to_string(),
                    argv: Vec::new(),
                    overlay: EngineStepSpec::default(),
                })
            }
        }
    }

    async fn resolve_go(&self, token: &str) -> Result<ResolvedEngine> {
        let (path_part, version) = match token.rsplit_once('@') {
            Some((path, version)) => (path, Some(version.to_string())),
            None => (token, None),
        };

        if path_part.is_empty() {
            return Err(ForgeError::UriMalformed {
                uri: format!("go://{token}"),
                reason: "empty engine name".to_string(),
            });
        }

        let in_default_namespace = !path_part.contains('/');
        let full_module_path = if in_default_namespace {
            format!("{}/{}", self.default_namespace, path_part)
        } else {
            path_part.to_string()
        };

        let version = version.unwrap_or_else(|| {
            if in_default_namespace {
                self.own_version.clone()
            } else {
                "latest".to_string()
            }
        });

        let name = path_part
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(path_part);

        let command = self.locate_or_install(name, &full_module_path, &version).await?;
        self.check_version_compat(&command, &version).await;

        Ok(ResolvedEngine {
            kind: EngineKind::Mcp,
            command,
            argv: Vec::new(),
            overlay: EngineStepSpec::default(),
        })
    }

    /// Resolution order: local `./build/bin/<name>`, then `PATH`, then an
    /// install step followed by a retry of the `PATH` lookup.
    async fn locate_or_install(
        &self,
        name: &str,
        full_module_path: &str,
        version: &str,
    ) -> Result<String> {
        let local_path = Path::new("./build/bin").join(name);
        if local_path.exists() {
            debug!("resolved engine `{name}` to local path {}", local_path.display());
            return Ok(local_path.to_string_lossy().into_owned());
        }

        if let Some(found) = find_on_path(name) {
            debug!("resolved engine `{name}` to {found} on PATH");
            return Ok(found);
        }

        debug!("engine `{name}` not found locally or on PATH, installing");
        install_engine(name, full_module_path, version).await?;

        find_on_path(name).ok_or_else(|| ForgeError::EngineInstall {
            name: name.to_string(),
            message: "engine still not discoverable on PATH after install".to_string(),
        })
    }

    /// Best-effort `--version`/`-v` self-identification check. A mismatch
    /// only warns; development builds (`dev`, `(devel)`) are skipped
    /// entirely, per `spec.md` §4.1.
    async fn check_version_compat(&self, command: &str, expected: &str) {
        if expected == "latest" {
            return;
        }

        let output = tokio::process::Command::new(command)
            .arg("--version")
            .output()
            .await;

        let reported = match output {
            Ok(out) if out.status.success() => {
                String::from_utf8_lossy(&out.stdout).trim().to_string()
            }
            _ => return,
        };

        if reported.contains("dev") || reported.contains("(devel)") {
            return;
        }

        if let (Some(a), Some(b)) = (
            semver_utils::parse_version(&reported),
            semver_utils::parse_version(expected),
        ) {
            if (a.major, a.minor) != (b.major, b.minor) {
                warn!(
                    "engine `{command}` reports version `{reported}` which does not match expected major.minor `{expected}`"
                );
            }
        }
    }
}

/// Search `$PATH` for an executable named `name`, returning its absolute
/// path if found.
fn find_on_path(name: &str) -> Option<String> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate.to_string_lossy().into_owned());
        }
    }
    None
}

/// Invoke the language toolchain to fetch and build a missing engine.
async fn install_engine(name: &str, full_module_path: &str, version: &str) -> Result<()> {
    let target = format!("{full_module_path}@{version}");
    let status = tokio::process::Command::new("go")
        .args(["install", &target])
        .status()
        .await
        .map_err(|e| ForgeError::EngineInstall {
            name: name.to_string(),
            message: format!("failed to invoke install toolchain: {e}"),
        })?;

    if !status.success() {
        return Err(ForgeError::EngineInstall {
            name: name.to_string(),
            message: format!("install of `{target}` exited with {status}"),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, EngineStep, EngineStepSpec};

    fn manifest_with_engines(engines: Vec<EngineConfig>) -> Manifest {
        Manifest {
            engines,
            ..Default::default()
        }
    }

    fn step(engine: &str) -> EngineStep {
        EngineStep {
            engine: engine.to_string(),
            spec: EngineStepSpec::default(),
        }
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let manifest = Manifest::default();
        let resolver = UriResolver::new(&manifest, "example.com/forge/cmd", "1.4.0");
        let err = resolver.resolve("ftp://nope").await.unwrap_err();
        assert!(matches!(err, ForgeError::UnknownScheme { .. }));
    }

    #[tokio::test]
    async fn alias_not_found_is_rejected() {
        let manifest = Manifest::default();
        let resolver = UriResolver::new(&manifest, "example.com/forge/cmd", "1.4.0");
        let err = resolver.resolve("alias://missing").await.unwrap_err();
        assert!(matches!(err, ForgeError::AliasNotFound { .. }));
    }

    #[tokio::test]
    async fn alias_with_no_engines_is_rejected() {
        let manifest = manifest_with_engines(vec![EngineConfig {
            alias: "broken".to_string(),
            kind: EngineType::Builder,
            builder: vec![],
            test_runner: vec![],
            testenv: vec![],
        }]);
        let resolver = UriResolver::new(&manifest, "example.com/forge/cmd", "1.4.0");
        let err = resolver.resolve("alias://broken").await.unwrap_err();
        assert!(matches!(err, ForgeError::AliasHasNoEngines { .. }));
    }

    #[tokio::test]
    async fn single_engine_alias_is_a_transparent_rename() {
        // Single-entry aliases resolve as far as the underlying go:// URI,
        // which then goes through the normal lookup (and will fail to
        // locate a nonexistent binary) — what we assert here is that the
        // alias indirection itself is transparent, not the final outcome.
        let manifest = manifest_with_engines(vec![EngineConfig {
            alias: "rename".to_string(),
            kind: EngineType::Builder,
            builder: vec![step("go://definitely-nonexistent-engine-binary")],
            test_runner: vec![],
            testenv: vec![],
        }]);
        let resolver = UriResolver::new(&manifest, "example.com/forge/cmd", "1.4.0");
        let result = resolver.resolve("alias://rename").await;
        // Either resolves (if such a binary happens to exist on PATH,
        // astronomically unlikely in test environments) or fails trying to
        // install it — in both cases we must not see an AliasHasNoEngines
        // or MultiEngineSentinel error, confirming the rename was transparent.
        if let Err(e) = result {
            assert!(!matches!(e, ForgeError::MultiEngineSentinel { .. }));
        }
    }

    #[tokio::test]
    async fn multi_engine_alias_returns_sentinel_not_error() {
        let manifest = manifest_with_engines(vec![EngineConfig {
            alias: "multi".to_string(),
            kind: EngineType::Builder,
            builder: vec![step("go://a"), step("go://b")],
            test_runner: vec![],
            testenv: vec![],
        }]);
        let resolver = UriResolver::new(&manifest, "example.com/forge/cmd", "1.4.0");
        let resolved = resolver.resolve("alias://multi").await.unwrap();
        assert_eq!(resolved.kind, EngineKind::Alias);
        assert_eq!(resolved.command, "multi");
    }

    #[tokio::test]
    async fn resolve_concrete_rejects_multi_engine_sentinel() {
        let manifest = manifest_with_engines(vec![EngineConfig {
            alias: "multi".to_string(),
            kind: EngineType::Builder,
            builder: vec![step("go://a"), step("go://b")],
            test_runner: vec![],
            testenv: vec![],
        }]);
        let resolver = UriResolver::new(&manifest, "example.com/forge/cmd", "1.4.0");
        let err = resolver.resolve_concrete("alias://multi").await.unwrap_err();
        assert!(matches!(err, ForgeError::MultiEngineSentinel { .. }));
    }

    #[tokio::test]
    async fn self_referential_alias_is_a_cycle() {
        let manifest = manifest_with_engines(vec![EngineConfig {
            alias: "loopy".to_string(),
            kind: EngineType::Builder,
            builder: vec![step("alias://loopy")],
            test_runner: vec![],
            testenv: vec![],
        }]);
        let resolver = UriResolver::new(&manifest, "example.com/forge/cmd", "1.4.0");
        let err = resolver.resolve("alias://loopy").await.unwrap_err();
        assert!(matches!(err, ForgeError::AliasCycle { .. }));
    }

    #[tokio::test]
    async fn deprecated_uri_is_rewritten() {
        let manifest = Manifest::default();
        let resolver = UriResolver::new(&manifest, "example.com/forge/cmd", "1.4.0");
        // The rewritten target (`go://container-build`) still goes through
        // normal go:// resolution and will fail to locate a binary in a
        // test sandbox; what matters is it is not rejected as an unknown
        // scheme or malformed URI, proving the rewrite happened.
        let result = resolver.resolve("go://build-container").await;
        if let Err(e) = result {
            assert!(!matches!(
                e,
                ForgeError::UnknownScheme { .. } | ForgeError::UriMalformed { .. }
            ));
        }
    }
}
