use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use parley_core::tools::{ExecutionContext, Tool, ToolError, ToolOutput};

use super::{required_str, snapshot_output};
use crate::commands::{CommandSessionManager, StatusQuery};

/// Long-polls a command session.
pub struct CommandStatusTool {
    commands: Arc<CommandSessionManager>,
}

impl CommandStatusTool {
    pub fn new(commands: Arc<CommandSessionManager>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl Tool for CommandStatusTool {
    fn name(&self) -> &str {
        "command_status"
    }

    fn description(&self) -> &str {
        "Get the status and recent output of a command started with run_command, \
         optionally waiting for it to change first"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["CommandId"],
            "properties": {
                "CommandId": {
                    "type": "string",
                    "description": "Id returned by run_command"
                },
                "WaitDurationSeconds": {
                    "type": "number",
                    "description": "Wait up to this many seconds for new output or exit"
                },
                "OutputCharacterCount": {
                    "type": "integer",
                    "description": "How many trailing characters of output to return"
                }
            }
        })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let query = StatusQuery {
            command_id: required_str(&args, "CommandId")?.to_string(),
            wait_duration_seconds: number(&args, "WaitDurationSeconds", Value::as_f64)?,
            output_character_count: number(&args, "OutputCharacterCount", Value::as_i64)?,
        };
        let snapshot = self.commands.status_snapshot(query).await?;
        snapshot_output(&snapshot)
    }
}

fn number<T>(args: &Value, key: &str, read: fn(&Value) -> Option<T>) -> Result<Option<T>, ToolError> {
    match &args[key] {
        Value::Null => Ok(None),
        v => read(v)
            .map(Some)
            .ok_or_else(|| ToolError::InvalidArguments(format!("{key} must be a number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandRequest;
    use crate::testing::context;
    use std::time::Duration;

    #[tokio::test]
    async fn reports_a_started_command() {
        let commands = Arc::new(CommandSessionManager::default());
        let started = commands
            .start(CommandRequest::new("echo ready", std::env::temp_dir()).with_grace(Duration::from_secs(5)))
            .await
            .unwrap();

        let tool = CommandStatusTool::new(commands);
        let ctx = context("command_status", std::env::temp_dir());
        let out = tool
            .execute(
                json!({"CommandId": started.id.as_str(), "WaitDurationSeconds": 1, "OutputCharacterCount": 3}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.response["status"], "completed");
        assert_eq!(out.response["output"], "dy\n");
    }

    #[tokio::test]
    async fn unknown_id_is_an_error() {
        let tool = CommandStatusTool::new(Arc::new(CommandSessionManager::default()));
        let ctx = context("command_status", std::env::temp_dir());
        let err = tool
            .execute(json!({"CommandId": "cmd_nope"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cmd_nope"));
    }

    #[tokio::test]
    async fn non_numeric_wait_is_invalid() {
        let tool = CommandStatusTool::new(Arc::new(CommandSessionManager::default()));
        let ctx = context("command_status", std::env::temp_dir());
        let err = tool
            .execute(json!({"CommandId": "cmd_x", "WaitDurationSeconds": "soon"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
