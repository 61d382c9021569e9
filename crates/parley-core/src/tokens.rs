use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// Token counts reported by the backend for one call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub candidate_tokens: u64,
    pub thought_tokens: u64,
    pub tool_use_prompt_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.candidate_tokens + self.thought_tokens + self.tool_use_prompt_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Add another call's counts into this running total.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.candidate_tokens += other.candidate_tokens;
        self.thought_tokens += other.thought_tokens;
        self.tool_use_prompt_tokens += other.tool_use_prompt_tokens;
    }
}

impl AddAssign<&TokenUsage> for TokenUsage {
    fn add_assign(&mut self, rhs: &TokenUsage) {
        self.accumulate(rhs);
    }
}

/// Usage a tool attributes to its own call site (e.g. a nested model call).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUsageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub usage: TokenUsage,
}
