use std::sync::Arc;

use parking_lot::Mutex;

use parley_core::errors::GatewayError;
use parley_core::messages::Part;
use parley_core::stream::Chunk;
use parley_core::tokens::TokenUsage;

use crate::converter::from_wire_part;
use crate::types::StreamChunk;

const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

/// Turns Gemini SSE payloads into [`Chunk`]s.
///
/// Gemini sends text as deltas; the decoder re-emits the round's cumulative
/// text and thought so downstream prefix merging is exact.
pub struct ChunkDecoder {
    text: String,
    thought: String,
    transcript: Option<Arc<Mutex<Vec<Part>>>>,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            thought: String::new(),
            transcript: None,
        }
    }

    /// Also append every decoded model part to `sink`.
    pub fn with_transcript(sink: Arc<Mutex<Vec<Part>>>) -> Self {
        Self {
            transcript: Some(sink),
            ..Self::new()
        }
    }

    /// Decode one `data:` payload. Yields at most one chunk followed by at most one error.
    pub fn decode(&mut self, data: &str) -> Vec<Result<Chunk, GatewayError>> {
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Vec::new();
        }
        let payload: StreamChunk = match serde_json::from_str(data) {
            Ok(p) => p,
            Err(e) => return vec![Err(GatewayError::Decode(e.to_string()))],
        };

        if let Some(err) = payload.error {
            return vec![Err(GatewayError::from_status(err.code, err.message))];
        }
        if let Some(reason) = payload.prompt_feedback.and_then(|f| f.block_reason) {
            return vec![Err(GatewayError::Blocked(reason))];
        }

        let mut out = Vec::new();
        let mut parts = Vec::new();
        let mut text_touched = false;
        let mut thought_touched = false;
        let mut text_sig = None;
        let mut thought_sig = None;
        let mut finish_reason = None;

        if let Some(candidate) = payload.candidates.into_iter().next() {
            finish_reason = candidate.finish_reason;
            let wire_parts = candidate.content.map(|c| c.parts).unwrap_or_default();
            for wire in wire_parts {
                let Some(part) = from_wire_part(wire) else {
                    continue;
                };
                self.record(&part);
                match part {
                    Part::Text {
                        text,
                        thought: true,
                        signature,
                    } => {
                        self.thought.push_str(&text);
                        thought_touched = true;
                        thought_sig = signature.or(thought_sig);
                    }
                    Part::Text {
                        text, signature, ..
                    } => {
                        self.text.push_str(&text);
                        text_touched = true;
                        text_sig = signature.or(text_sig);
                    }
                    other => parts.push(other),
                }
            }
        }

        let mut cumulative = Vec::new();
        if thought_touched {
            cumulative.push(Part::Text {
                text: self.thought.clone(),
                thought: true,
                signature: thought_sig,
            });
        }
        if text_touched {
            cumulative.push(Part::Text {
                text: self.text.clone(),
                thought: false,
                signature: text_sig,
            });
        }
        cumulative.extend(parts);

        let usage = payload.usage_metadata.map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            candidate_tokens: u.candidates_token_count,
            thought_tokens: u.thoughts_token_count,
            tool_use_prompt_tokens: u.tool_use_prompt_token_count,
        });

        if !cumulative.is_empty() || usage.is_some() {
            out.push(Ok(Chunk {
                parts: cumulative,
                usage,
            }));
        }

        if let Some(reason) = finish_reason {
            if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) {
                out.push(Err(GatewayError::Blocked(reason)));
            }
        }

        out
    }

    fn record(&self, part: &Part) {
        let Some(sink) = &self.transcript else {
            return;
        };
        // Unsigned thought text is not replayed to the backend.
        if let Part::Text {
            thought: true,
            signature: None,
            ..
        } = part
        {
            return;
        }
        sink.lock().push(part.clone());
    }
}

/// Extract `data:` payloads from raw SSE text. Multi-line data is joined with `\n`.
pub fn parse_sse_lines(raw: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            match &mut current {
                Some(buf) => {
                    buf.push('\n');
                    buf.push_str(data);
                }
                None => current = Some(data.to_string()),
            }
        } else if line.is_empty() {
            if let Some(data) = current.take() {
                events.push(data);
            }
        }
    }

    if let Some(data) = current {
        events.push(data);
    }

    events
}
