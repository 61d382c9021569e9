use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ChatId, ClientId, MessageId, ToolCallId};
use crate::messages::Media;
use crate::tokens::ToolUsageRecord;

/// Per-invocation context handed to every tool call.
///
/// Passed explicitly so concurrent Turns never observe each other's ids.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub client_id: Option<ClientId>,
    /// Backend call id, or a generated one when the backend sent none.
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    pub working_directory: PathBuf,
}

/// What a tool hands back. Keys of `response` starting with `_` are private
/// to the implementation and never reach the model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub response: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ToolUsageRecord>,
}

impl ToolOutput {
    /// Wrap a JSON value. Non-object values land under `result`.
    pub fn json(value: Value) -> Self {
        let response = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".into(), other);
                map
            }
        };
        Self {
            response,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut response = Map::new();
        response.insert("error".into(), Value::String(message.into()));
        Self {
            response,
            ..Default::default()
        }
    }

    pub fn with_media(mut self, media: Media) -> Self {
        self.media.push(media);
        self
    }

    pub fn with_usage(mut self, usage: ToolUsageRecord) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn is_error(&self) -> bool {
        self.response.contains_key("error")
    }

    /// Response with implementation-private fields removed.
    pub fn public_response(&self) -> Value {
        Value::Object(
            self.response
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Tool definition sent to the backend as part of the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("tool '{0}' is not allowed in this chat")]
    NotAllowed(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}
