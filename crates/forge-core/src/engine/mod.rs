//! Engine dispatch: URI parsing/resolution and the MCP client adapter.
//!
//! An "engine" is any subprocess that speaks MCP over stdio and exposes a
//! subset of the tool surface in `spec.md` §6 (`build`, `buildBatch`,
//! `create`, `run`, `delete`, `list`, `get`). This module never talks to a
//! concrete engine implementation directly — everything downstream
//! operates against [`mcp::McpClient`], a thin capability wrapper, per the
//! "child-process polymorphism" design note in `spec.md` §9.

pub mod mcp;
pub mod uri;

pub use mcp::McpClient;
pub use uri::{EngineKind, ResolvedEngine, UriResolver};

use crate::config::EngineStepSpec;
use crate::errors::{ForgeError, Result};
use crate::observability::{engine_spawn_span, TimedSpan};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

/// Compute the command and argv a [`ResolvedEngine`] should be spawned with,
/// honoring a `command` override and extra `args` carried by its overlay.
pub fn effective_spawn(resolved: &ResolvedEngine) -> (String, Vec<String>) {
    let command = resolved
        .overlay
        .command
        .clone()
        .unwrap_or_else(|| resolved.command.clone());
    let mut argv = resolved.argv.clone();
    argv.extend(resolved.overlay.args.clone());
    (command, argv)
}

/// Parse a simple `.env`-style file (`KEY=VALUE` per line, `#` comments and
/// blank lines ignored) into a map of child-process environment additions.
pub fn load_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let raw = std::fs::read_to_string(path).map_err(ForgeError::Io)?;
    let mut env = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            env.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(env)
}

/// Resolve the full environment an overlay contributes: its `envFile`
/// (loaded first, so explicit `env` entries take precedence) merged with its
/// literal `env` map.
pub fn overlay_env(overlay: &EngineStepSpec) -> Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    if let Some(file) = &overlay.env_file {
        env.extend(load_env_file(Path::new(file))?);
    }
    env.extend(overlay.env.clone());
    Ok(env)
}

/// Insert an alias overlay's builder-spec fields (`command`, `args`, `env`,
/// `envFile`, `workDir`) into an MCP argument bag, per `spec.md` §4.4 step 4.
/// A no-op for a default (non-alias-routed) overlay.
pub fn apply_overlay_to_bag(bag: &mut Map<String, Value>, overlay: &EngineStepSpec) {
    if overlay == &EngineStepSpec::default() {
        return;
    }
    if let Some(command) = &overlay.command {
        bag.insert("command".to_string(), Value::String(command.clone()));
    }
    if !overlay.args.is_empty() {
        bag.insert(
            "args".to_string(),
            Value::Array(overlay.args.iter().cloned().map(Value::String).collect()),
        );
    }
    if !overlay.env.is_empty() {
        bag.insert(
            "env".to_string(),
            Value::Object(
                overlay
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
    }
    if let Some(env_file) = &overlay.env_file {
        bag.insert("envFile".to_string(), Value::String(env_file.clone()));
    }
    if let Some(work_dir) = &overlay.work_dir {
        bag.insert("workDir".to_string(), Value::String(work_dir.clone()));
    }
}

/// Spawn a resolved engine, call one tool, and shut it down. The single
/// entry point the planner and test-stage coordinator use to reach an
/// engine — neither calls [`McpClient`] directly (`spec.md` §9
/// "child-process polymorphism").
pub async fn call_tool(
    resolved: &ResolvedEngine,
    label: &str,
    tool: &str,
    arguments: Value,
    extra_env: &HashMap<String, String>,
) -> Result<Value> {
    let (command, argv) = effective_spawn(resolved);
    let mut env = overlay_env(&resolved.overlay)?;
    env.extend(extra_env.clone());
    let work_dir = resolved.overlay.work_dir.as_ref().map(Path::new);

    let timed_span = TimedSpan::new(engine_spawn_span(label, &command));
    let client = McpClient::spawn(label, &command, &argv, &env, work_dir).await?;
    let result = client.call_tool(tool, arguments).await;
    client.shutdown().await;
    timed_span.complete();
    result
}
