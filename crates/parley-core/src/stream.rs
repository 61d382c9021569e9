use std::pin::Pin;

use futures::Stream;

use crate::errors::GatewayError;
use crate::messages::{Media, Part, ToolCall};
use crate::tokens::TokenUsage;

/// One increment of a streamed backend response.
///
/// A chunk may repeat text the backend already sent; consumers merge by prefix.
/// `usage` is a cumulative snapshot for the round, not a delta.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Chunk {
    pub parts: Vec<Part>,
    pub usage: Option<TokenUsage>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, GatewayError>> + Send>>;

impl Chunk {
    pub fn new(parts: Vec<Part>) -> Self {
        Self { parts, usage: None }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![Part::text(text)])
    }

    pub fn thought(text: impl Into<String>) -> Self {
        Self::new(vec![Part::thought(text)])
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self::new(vec![Part::ToolCall(call)])
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Visible text carried by this chunk (thought fragments excluded).
    pub fn visible_text(&self) -> String {
        self.collect_text(false)
    }

    /// Thought text carried by this chunk.
    pub fn thought_text(&self) -> String {
        self.collect_text(true)
    }

    fn collect_text(&self, want_thought: bool) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text, thought, .. } if *thought == want_thought => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.parts.iter().filter_map(|p| match p {
            Part::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    /// Media outside thought framing.
    pub fn visible_media(&self) -> impl Iterator<Item = &Media> {
        self.parts.iter().filter_map(|p| match p {
            Part::Media {
                media,
                thought: false,
            } => Some(media),
            _ => None,
        })
    }

    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(Part::signature)
    }
}
