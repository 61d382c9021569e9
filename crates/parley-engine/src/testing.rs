//! Tools used by unit tests across the crate.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use parley_core::ids::{ChatId, MessageId, ToolCallId};
use parley_core::messages::Media;
use parley_core::tokens::{TokenUsage, ToolUsageRecord};
use parley_core::tools::{ExecutionContext, Tool, ToolError, ToolOutput};

/// Echoes its arguments and the call site it ran under.
pub struct EchoTool {
    name: String,
    delay: Duration,
}

impl EchoTool {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Echo the arguments back"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ToolOutput::json(json!({
            "echo": args,
            "_tool_call_id": ctx.tool_call_id.as_str(),
            "_chat_id": ctx.chat_id.as_str(),
        })))
    }
}

/// Attaches media and a usage record to an otherwise empty result.
pub struct RenderTool;

#[async_trait]
impl Tool for RenderTool {
    fn name(&self) -> &str {
        "render"
    }
    fn description(&self) -> &str {
        "Render an image"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::json(json!({"status": "ok", "_raw_bytes": 4}))
            .with_media(Media::new("image/png", "iVBORw0KGgo="))
            .with_usage(ToolUsageRecord {
                tool_call_id: None,
                tool_name: "render".into(),
                model: Some("imagen".into()),
                usage: TokenUsage {
                    prompt_tokens: 7,
                    candidate_tokens: 3,
                    ..Default::default()
                },
            }))
    }
}

pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed("disk on fire".into()))
    }
}

pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panic"
    }
    fn description(&self) -> &str {
        "Always panics"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        panic!("tool exploded");
    }
}

pub fn context(tool_name: &str, working_directory: PathBuf) -> ExecutionContext {
    ExecutionContext {
        chat_id: ChatId::new(),
        message_id: MessageId::new(),
        client_id: None,
        tool_call_id: ToolCallId::new(),
        tool_name: tool_name.to_string(),
        working_directory,
    }
}
