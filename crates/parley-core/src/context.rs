use crate::messages::Content;
use crate::provider::StreamOptions;
use crate::tools::ToolDefinition;

/// Everything needed to open a backend session for one Turn.
#[derive(Clone, Debug)]
pub struct SessionRequest {
    pub model: String,
    pub history: Vec<Content>,
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub options: StreamOptions,
}

impl SessionRequest {
    /// Create an empty request (useful for testing).
    pub fn empty(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            history: Vec::new(),
            system_instruction: None,
            tools: Vec::new(),
            options: StreamOptions::default(),
        }
    }
}
