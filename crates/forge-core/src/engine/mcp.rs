//! MCP-over-stdio client adapter (`spec.md` §4.2, §6).
//!
//! Every engine is a subprocess speaking the Model Context Protocol over
//! its stdin/stdout. [`McpClient`] hides the handshake and the tool-call
//! envelope behind a small surface the planner and test-stage coordinator
//! call into; neither of those callers ever touches `rmcp` directly.

use crate::errors::{ForgeError, Result};
use rmcp::model::CallToolRequestParam;
use rmcp::service::{RunningService, ServiceExt};
use rmcp::transport::TokioChildProcess;
use rmcp::RoleClient;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// How long to wait for the handshake before giving up on a spawned engine.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for a graceful shutdown before the transport is
/// dropped, forcing the child process down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running connection to one engine subprocess.
pub struct McpClient {
    engine_name: String,
    service: RunningService<RoleClient, ()>,
}

impl McpClient {
    /// Spawn `command argv...` and complete the MCP handshake over its
    /// stdio. `env` is merged on top of the current process environment;
    /// `work_dir`, when set, becomes the child's working directory.
    #[instrument(skip(env), fields(command))]
    pub async fn spawn(
        engine_name: &str,
        command: &str,
        argv: &[String],
        env: &HashMap<String, String>,
        work_dir: Option<&Path>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(argv);
        cmd.arg("--mcp");
        for (key, value) in env {
            cmd.env(key, value);
        }
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }

        let transport = TokioChildProcess::new(cmd).map_err(|source| ForgeError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let service = tokio::time::timeout(HANDSHAKE_TIMEOUT, ().serve(transport))
            .await
            .map_err(|_| ForgeError::Transport {
                command: command.to_string(),
                message: "handshake timed out".to_string(),
            })?
            .map_err(|e| ForgeError::Transport {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        debug!("engine `{engine_name}` connected via {command}");
        Ok(Self {
            engine_name: engine_name.to_string(),
            service,
        })
    }

    /// Invoke one MCP tool and return its result as a [`serde_json::Value`].
    ///
    /// Per `spec.md` §4.2 step 6, the structured result is preferred; raw
    /// text content is never handed back as the result value. `is_error:
    /// true` is surfaced as [`ForgeError::ToolError`], with the message
    /// taken from the first text content block (the one channel the
    /// protocol guarantees for error reporting). No timeout is imposed here
    /// (`spec.md` §5): a tool call runs for as long as the engine takes.
    #[instrument(skip(self, arguments), fields(engine = %self.engine_name, tool))]
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value> {
        let params = CallToolRequestParam {
            name: tool.to_string().into(),
            arguments: arguments.as_object().cloned(),
        };

        let result = self
            .service
            .call_tool(params)
            .await
            .map_err(|e| ForgeError::ToolError {
                tool: tool.to_string(),
                message: e.to_string(),
            })?;

        if result.is_error == Some(true) {
            let message = result
                .content
                .first()
                .and_then(|c| c.as_text())
                .map(|t| t.text.clone())
                .unwrap_or_else(|| "engine reported an error".to_string());
            return Err(ForgeError::ToolError {
                tool: tool.to_string(),
                message,
            });
        }

        Ok(result.structured_content.clone().unwrap_or(Value::Null))
    }

    /// Request a graceful shutdown, falling back to dropping the transport
    /// (which kills the child process) if the engine does not respond
    /// within [`SHUTDOWN_GRACE`].
    #[instrument(skip(self), fields(engine = %self.engine_name))]
    pub async fn shutdown(self) {
        let engine = self.engine_name.clone();
        match tokio::time::timeout(SHUTDOWN_GRACE, self.service.cancel()).await {
            Ok(Ok(())) => debug!("engine `{engine}` shut down cleanly"),
            Ok(Err(e)) => warn!("engine `{engine}` reported an error during shutdown: {e}"),
            Err(_) => warn!(
                "engine `{engine}` did not shut down within {}s, forcing termination",
                SHUTDOWN_GRACE.as_secs()
            ),
        }
    }
}
