use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::SessionRequest;
use crate::errors::GatewayError;
use crate::messages::Part;
use crate::stream::ChunkStream;

/// Options controlling generation behavior.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamOptions {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub thinking: ThinkingConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingConfig {
    Disabled,
    /// Backend decides; thought summaries are requested.
    #[default]
    Dynamic,
    Budget { tokens: u32 },
}

/// An LLM backend able to hold a multi-round conversation.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open a session scoped to the request's history, instructions and tools.
    async fn open_session(
        &self,
        request: SessionRequest,
    ) -> Result<Box<dyn BackendSession>, GatewayError>;
}

/// A conversation with the backend. The session remembers what the model
/// produced in earlier rounds; each round only sends the new input.
#[async_trait]
pub trait BackendSession: Send {
    /// Stream one round over `input` (user content or a batch of tool responses).
    async fn stream_round(&mut self, input: Vec<Part>) -> Result<ChunkStream, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_options_defaults() {
        let opts = StreamOptions::default();
        assert!(opts.max_output_tokens.is_none());
        assert!(opts.temperature.is_none());
        assert_eq!(opts.thinking, ThinkingConfig::Dynamic);
    }

    #[test]
    fn thinking_config_serde() {
        let json = serde_json::to_string(&ThinkingConfig::Budget { tokens: 1024 }).unwrap();
        let parsed: ThinkingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ThinkingConfig::Budget { tokens: 1024 });
        assert_eq!(serde_json::to_string(&ThinkingConfig::Disabled).unwrap(), r#""disabled""#);
    }
}
