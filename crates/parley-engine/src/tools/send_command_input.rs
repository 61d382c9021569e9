use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use parley_core::tools::{ExecutionContext, Tool, ToolError, ToolOutput};

use super::{optional_millis, optional_str, required_str, snapshot_output};
use crate::commands::{parse_command_id, CommandSessionManager, SendInput};

pub struct SendCommandInputTool {
    commands: Arc<CommandSessionManager>,
}

impl SendCommandInputTool {
    pub fn new(commands: Arc<CommandSessionManager>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl Tool for SendCommandInputTool {
    fn name(&self) -> &str {
        "send_command_input"
    }

    fn description(&self) -> &str {
        "Write to the standard input of a running command, or interrupt it"
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
                "Input": {
                    "type": "string",
                    "description": "Text to write; include a trailing newline to submit a line"
                },
                "Terminate": {
                    "type": "boolean",
                    "description": "Send an interrupt (SIGINT) after the input"
                },
                "WaitMs": {
                    "type": "integer",
                    "description": "Wait up to this long for the command to react"
                }
            }
        })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let id = parse_command_id(required_str(&args, "CommandId")?)?;
        let input = SendInput {
            text: optional_str(&args, "Input")?.unwrap_or_default().to_string(),
            terminate: args["Terminate"].as_bool().unwrap_or(false),
            wait: optional_millis(&args, "WaitMs")?,
        };
        if input.text.is_empty() && !input.terminate {
            return Err(ToolError::InvalidArguments(
                "provide Input, Terminate, or both".into(),
            ));
        }

        let snapshot = self.commands.send_input(&id, input).await?;
        snapshot_output(&snapshot)
    }
}
