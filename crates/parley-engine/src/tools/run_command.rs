use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use parley_core::tools::{ExecutionContext, Tool, ToolError, ToolOutput};

use super::{optional_millis, optional_str, required_str, resolve_path, snapshot_output};
use crate::commands::{CommandRequest, CommandSessionManager};

/// Starts a shell command as a tracked session.
pub struct RunCommandTool {
    commands: Arc<CommandSessionManager>,
}

impl RunCommandTool {
    pub fn new(commands: Arc<CommandSessionManager>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Start a shell command. Returns its status and output so far; \
         long-running commands keep running and can be polled with command_status"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["CommandLine"],
            "properties": {
                "CommandLine": {
                    "type": "string",
                    "description": "The command to run with bash -c"
                },
                "Cwd": {
                    "type": "string",
                    "description": "Working directory (defaults to the chat's working directory)"
                },
                "Name": {
                    "type": "string",
                    "description": "Display name used to find the command later"
                },
                "WaitMs": {
                    "type": "integer",
                    "description": "How long to wait for the command to finish before returning"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let command = required_str(&args, "CommandLine")?;
        let cwd = match optional_str(&args, "Cwd")? {
            Some(dir) if !dir.trim().is_empty() => resolve_path(ctx, dir),
            _ => ctx.working_directory.clone(),
        };

        let mut request = CommandRequest::new(command, cwd);
        request.name = optional_str(&args, "Name")?.map(str::to_string);
        request.grace = optional_millis(&args, "WaitMs")?;

        let snapshot = self.commands.start(request).await?;
        snapshot_output(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;

    #[tokio::test]
    async fn runs_in_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();
        let tool = RunCommandTool::new(Arc::new(CommandSessionManager::default()));
        let ctx = context("run_command", dir.path().to_path_buf());

        let out = tool
            .execute(json!({"CommandLine": "ls", "Name": "lister", "WaitMs": 5000}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.response["status"], "completed");
        assert_eq!(out.response["name"], "lister");
        assert!(out.response["output"].as_str().unwrap().contains("marker"));
    }

    #[tokio::test]
    async fn missing_command_line_is_invalid() {
        let tool = RunCommandTool::new(Arc::new(CommandSessionManager::default()));
        let ctx = context("run_command", std::env::temp_dir());
        let err = tool.execute(json!({"Cwd": "/tmp"}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
