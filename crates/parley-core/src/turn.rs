use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::{Media, ToolCall};
use crate::tokens::{TokenUsage, ToolUsageRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// The model produced output and requested no tools.
    Thinking,
    /// Tool calls were resolved in this round.
    Worked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Executing,
    Resolved,
}

/// A tool call paired with its eventual result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call: ToolCall,
    pub status: InvocationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ToolUsageRecord>,
}

impl ToolInvocation {
    pub fn pending(call: ToolCall) -> Self {
        Self {
            call,
            status: InvocationStatus::Pending,
            result: None,
            media: Vec::new(),
            usage: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == InvocationStatus::Resolved
    }
}

/// One visible unit of work within a Turn. Never mutated once pushed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position in the Turn.
    pub index: u32,
    pub kind: StepKind,
    /// Visible text streamed since the previous step boundary.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub thought: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocations: Vec<ToolInvocation>,
    /// Narrative text preceded the first tool call of the round.
    #[serde(default)]
    pub text_before_tools: bool,
}

/// Ordered tool and media entries shown while a Turn is in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressPart {
    Call(ToolInvocation),
    Media(Media),
}

/// Partial reply relayed to observers through `on_update`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnProgress {
    pub text: String,
    pub thought: String,
    pub parts: Vec<ProgressPart>,
    pub steps: Vec<Step>,
}

/// Final, immutable result of one Turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyOutcome {
    pub text: String,
    pub thought: String,
    pub steps: Vec<Step>,
    /// Cancellation preempted natural completion.
    pub stopped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub token_usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_usage: Vec<ToolUsageRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
}

impl ReplyOutcome {
    pub fn invocation_count(&self) -> usize {
        self.steps.iter().map(|s| s.invocations.len()).sum()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
