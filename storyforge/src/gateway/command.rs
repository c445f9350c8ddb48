use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use storyforge_sdk::{async_trait, AgentGateway, AgentKind, GatewayError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::{AgentCommand, AgentCommands, ConfigError};

/// Lines of agent stderr kept in a failure message
const STDERR_TAIL_LINES: usize = 20;

/// Gateway that runs a configured program per agent kind.
///
/// The request `{"kind", "action", "payload"}` is written to the program's
/// stdin as JSON; its stdout must be a single JSON document (empty stdout is
/// read as `null`). A non-zero exit is a failed invocation.
#[derive(Debug, Clone)]
pub struct CommandGateway {
    commands: AgentCommands,
}

impl CommandGateway {
    pub fn new(commands: AgentCommands) -> Result<Self, ConfigError> {
        commands.require_all()?;
        Ok(Self { commands })
    }

    fn build_command(spec: &AgentCommand) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentGateway for CommandGateway {
    async fn invoke(
        &self,
        kind: AgentKind,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        let spec = self.commands.get(kind).ok_or_else(|| GatewayError::Spawn {
            kind,
            message: "no command configured".to_string(),
        })?;

        let request = json!({ "kind": kind, "action": action, "payload": payload }).to_string();

        tracing::debug!(agent = %kind, action, program = %spec.program.display(), "invoking agent");

        let mut child = Self::build_command(spec)
            .spawn()
            .map_err(|e| GatewayError::Spawn {
                kind,
                message: format!("{}: {}", spec.program.display(), e),
            })?;

        // The request is written while stdout and stderr are drained, so an
        // agent that answers before reading all of its input cannot deadlock.
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(request.as_bytes()).await {
                    // An agent may exit without reading its input
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
                // stdin is closed on drop so the agent sees EOF
            }
            Ok(())
        };
        let exchange = async move { tokio::join!(write, child.wait_with_output()) };

        // The child is killed on drop when the timeout fires
        let (written, output) = match spec.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), exchange)
                .await
                .map_err(|_| GatewayError::Timeout { kind, secs })?,
            None => exchange.await,
        };
        written.map_err(|e| GatewayError::failed(kind, format!("failed to write request: {}", e)))?;
        let output =
            output.map_err(|e| GatewayError::failed(kind, format!("failed to wait for agent: {}", e)))?;

        if !output.status.success() {
            return Err(GatewayError::failed(
                kind,
                format!("{}: {}", output.status, stderr_tail(&output.stderr)),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(stdout).map_err(|e| GatewayError::MalformedResult {
            kind,
            message: e.to_string(),
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
