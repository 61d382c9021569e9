//! Conversion between chat history, the backend turn format and Gemini JSON.

use serde_json::Value;

use parley_core::context::SessionRequest;
use parley_core::ids::ToolCallId;
use parley_core::messages::{ChatMessage, Content, Media, Part, Role, ToolCall, ToolResponse};
use parley_core::provider::ThinkingConfig;
use parley_core::turn::Step;

use crate::types::{
    FunctionDeclaration, GenerateRequest, GenerationConfig, WireBlob, WireContent,
    WireFunctionCall, WireFunctionResponse, WirePart, WireThinkingConfig, WireTool,
};

/// Convert persisted chat messages into backend turns.
///
/// An assistant message's tool trace becomes a single synthetic text part;
/// its media follow as separate parts so no part mixes payload kinds.
pub fn normalize_history(messages: &[ChatMessage]) -> Vec<Content> {
    let mut contents = Vec::with_capacity(messages.len());

    for message in messages {
        let mut parts = Vec::new();
        let text = if message.steps.is_empty() {
            message.text.clone()
        } else {
            render_trace(&message.steps, &message.text)
        };
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
        parts.extend(message.media.iter().cloned().map(Part::media));

        if parts.is_empty() {
            continue;
        }
        contents.push(Content {
            role: message.role,
            parts,
        });
    }

    contents
}

/// Flatten a tool trace into narrative text.
fn render_trace(steps: &[Step], final_text: &str) -> String {
    let mut out = String::new();
    let mut covered = 0usize;

    for step in steps {
        // Later steps carry their own paragraph break.
        push_block(&mut out, step.text.trim_start_matches('\n'));
        covered += step.text.len();
        for inv in &step.invocations {
            let result = inv
                .result
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_else(|| "(no result)".to_string());
            push_block(
                &mut out,
                &format!("[tool {} {} -> {}]", inv.call.name, inv.call.arguments, result),
            );
        }
    }

    // Text that never made it into a step (e.g. an appended error line).
    if let Some(rest) = final_text.get(covered..) {
        if !rest.trim().is_empty() && !out.ends_with(rest) {
            push_block(&mut out, rest.trim_start());
        }
    }

    out
}

fn push_block(out: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(block);
}

pub fn to_wire_part(part: &Part) -> WirePart {
    match part {
        Part::Text {
            text,
            thought,
            signature,
        } => WirePart {
            text: Some(text.clone()),
            thought: thought.then_some(true),
            thought_signature: signature.clone(),
            ..Default::default()
        },
        Part::ToolCall(call) => WirePart {
            function_call: Some(WireFunctionCall {
                id: call.id.as_ref().map(|id| id.as_str().to_string()),
                name: call.name.clone(),
                args: call.arguments.clone(),
            }),
            thought_signature: call.signature.clone(),
            ..Default::default()
        },
        Part::ToolResponse(resp) => WirePart {
            function_response: Some(WireFunctionResponse {
                id: resp.id.as_ref().map(|id| id.as_str().to_string()),
                name: resp.name.clone(),
                response: resp.response.clone(),
            }),
            ..Default::default()
        },
        Part::Media { media, thought } => WirePart {
            inline_data: Some(WireBlob {
                mime_type: media.mime_type.clone(),
                data: media.data.clone(),
            }),
            thought: thought.then_some(true),
            thought_signature: media.signature.clone(),
            ..Default::default()
        },
    }
}

/// Decode a wire part. Parts carrying none of the known payloads yield `None`;
/// a bare signature becomes an empty thought text so it is not lost.
pub fn from_wire_part(part: WirePart) -> Option<Part> {
    let thought = part.thought.unwrap_or(false);
    if let Some(fc) = part.function_call {
        let args = if fc.args.is_null() {
            Value::Object(Default::default())
        } else {
            fc.args
        };
        return Some(Part::ToolCall(ToolCall {
            id: fc.id.filter(|id| !id.is_empty()).map(ToolCallId::from_raw),
            name: fc.name,
            arguments: args,
            signature: part.thought_signature,
        }));
    }
    if let Some(fr) = part.function_response {
        return Some(Part::ToolResponse(ToolResponse {
            id: fr.id.map(ToolCallId::from_raw),
            name: fr.name,
            response: fr.response,
        }));
    }
    if let Some(blob) = part.inline_data {
        let mut media = Media::new(blob.mime_type, blob.data);
        media.signature = part.thought_signature;
        return Some(Part::Media { media, thought });
    }
    if let Some(text) = part.text {
        return Some(Part::Text {
            text,
            thought,
            signature: part.thought_signature,
        });
    }
    part.thought_signature.map(|sig| Part::Text {
        text: String::new(),
        thought: true,
        signature: Some(sig),
    })
}

pub fn to_wire_content(content: &Content) -> WireContent {
    WireContent {
        role: Some(
            match content.role {
                Role::User => "user",
                Role::Model => "model",
            }
            .to_string(),
        ),
        parts: content.parts.iter().map(to_wire_part).collect(),
    }
}

/// Build the JSON body for `streamGenerateContent`.
pub fn build_request_body(request: &SessionRequest, contents: &[Content]) -> GenerateRequest {
    let system_instruction = request
        .system_instruction
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(|s| WireContent {
            role: None,
            parts: vec![WirePart {
                text: Some(s.clone()),
                ..Default::default()
            }],
        });

    let declarations: Vec<FunctionDeclaration> = request
        .tools
        .iter()
        .map(|t| FunctionDeclaration {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: sanitize_schema(&t.parameters_schema),
        })
        .collect();
    let tools = if declarations.is_empty() {
        Vec::new()
    } else {
        vec![WireTool {
            function_declarations: declarations,
        }]
    };

    let thinking_config = match request.options.thinking {
        ThinkingConfig::Disabled => None,
        ThinkingConfig::Dynamic => Some(WireThinkingConfig {
            include_thoughts: true,
            thinking_budget: Some(-1),
        }),
        ThinkingConfig::Budget { tokens } => Some(WireThinkingConfig {
            include_thoughts: true,
            thinking_budget: Some(i64::from(tokens)),
        }),
    };

    GenerateRequest {
        contents: contents.iter().map(to_wire_content).collect(),
        system_instruction,
        tools,
        generation_config: GenerationConfig {
            max_output_tokens: request.options.max_output_tokens,
            temperature: request.options.temperature,
            thinking_config,
        },
    }
}

/// Drop JSON-schema keys the Gemini API rejects.
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != "additionalProperties" && k.as_str() != "$schema")
                .map(|(k, v)| (k.clone(), sanitize_schema(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}
