pub mod command_status;
pub mod find_command;
pub mod list_directory;
pub mod run_command;
pub mod send_command_input;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use parley_core::tools::{ExecutionContext, ToolError, ToolOutput};

use crate::commands::{CommandSessionManager, CommandSnapshot};
use crate::registry::ToolRegistry;

/// Create a ToolRegistry with all built-in tools.
pub fn create_default_registry(commands: Arc<CommandSessionManager>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // Filesystem
    registry.register(Arc::new(list_directory::ListDirectoryTool));

    // Command sessions
    registry.register(Arc::new(run_command::RunCommandTool::new(commands.clone())));
    registry.register(Arc::new(command_status::CommandStatusTool::new(commands.clone())));
    registry.register(Arc::new(send_command_input::SendCommandInputTool::new(commands.clone())));
    registry.register(Arc::new(find_command::FindCommandTool::new(commands)));

    registry
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("{key} is required")))
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, ToolError> {
    match &args[key] {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.as_str())),
        _ => Err(ToolError::InvalidArguments(format!("{key} must be a string"))),
    }
}

fn optional_u64(args: &Value, key: &str) -> Result<Option<u64>, ToolError> {
    match &args[key] {
        Value::Null => Ok(None),
        v => v.as_u64().map(Some).ok_or_else(|| {
            ToolError::InvalidArguments(format!("{key} must be a non-negative integer"))
        }),
    }
}

fn optional_millis(args: &Value, key: &str) -> Result<Option<Duration>, ToolError> {
    Ok(optional_u64(args, key)?.map(Duration::from_millis))
}

/// Resolve `raw` against the invocation's working directory.
fn resolve_path(ctx: &ExecutionContext, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        ctx.working_directory.join(path)
    }
}

fn snapshot_output(snapshot: &CommandSnapshot) -> Result<ToolOutput, ToolError> {
    serde_json::to_value(snapshot)
        .map(ToolOutput::json)
        .map_err(|e| ToolError::ExecutionFailed(format!("failed to encode snapshot: {e}")))
}
