use parley_core::tools::ToolError;

/// Failures of command-session operations.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command id: {0}")]
    UnknownId(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommandError {
    pub fn is_unknown_id(&self) -> bool {
        matches!(self, Self::UnknownId(_))
    }
}

/// Command failures surface to the model as tool errors.
impl From<CommandError> for ToolError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::UnknownId(_) | CommandError::BadRequest(_) => {
                ToolError::InvalidArguments(err.to_string())
            }
            CommandError::Io(e) => ToolError::ExecutionFailed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_display() {
        assert_eq!(
            CommandError::UnknownId("cmd_x".into()).to_string(),
            "unknown command id: cmd_x"
        );
        assert!(CommandError::UnknownId("x".into()).is_unknown_id());
        assert!(!CommandError::BadRequest("x".into()).is_unknown_id());
    }

    #[test]
    fn command_errors_map_to_tool_errors() {
        let tool: ToolError = CommandError::UnknownId("cmd_x".into()).into();
        assert!(matches!(tool, ToolError::InvalidArguments(ref m) if m.contains("cmd_x")));
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let tool: ToolError = CommandError::Io(io).into();
        assert!(matches!(tool, ToolError::ExecutionFailed(_)));
    }
}
