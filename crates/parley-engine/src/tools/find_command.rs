use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use parley_core::tools::{ExecutionContext, Tool, ToolError, ToolOutput};

use super::{optional_str, optional_u64, snapshot_output};
use crate::commands::CommandSessionManager;

/// Looks a session up by display name or process id.
pub struct FindCommandTool {
    commands: Arc<CommandSessionManager>,
}

impl FindCommandTool {
    pub fn new(commands: Arc<CommandSessionManager>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl Tool for FindCommandTool {
    fn name(&self) -> &str {
        "find_command"
    }

    fn description(&self) -> &str {
        "Find the most recent command with the given name or process id"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "Name": {
                    "type": "string",
                    "description": "Display name given to run_command"
                },
                "Pid": {
                    "type": "integer",
                    "description": "Process id"
                }
            }
        })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let name = optional_str(&args, "Name")?;
        let pid = optional_u64(&args, "Pid")?
            .map(|pid| {
                u32::try_from(pid)
                    .map_err(|_| ToolError::InvalidArguments(format!("Pid out of range: {pid}")))
            })
            .transpose()?;
        if name.is_none() && pid.is_none() {
            return Err(ToolError::InvalidArguments("provide Name or Pid".into()));
        }

        match self.commands.find_by_name_or_pid(name, pid) {
            Some(snapshot) => snapshot_output(&snapshot),
            None => Ok(ToolOutput::json(json!({"found": false}))),
        }
    }
}
