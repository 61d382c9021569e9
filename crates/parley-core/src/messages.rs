use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::ids::{MessageId, ToolCallId};
use crate::turn::Step;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Inline media (image, audio, document) carried as base64.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Media {
    pub mime_type: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Media {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
            signature: None,
        }
    }

    /// SHA-256 over mime type and payload, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.mime_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.data.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Key used to de-duplicate media: the signature when present, else the fingerprint.
    pub fn dedup_key(&self) -> String {
        match &self.signature {
            Some(sig) => format!("sig:{sig}"),
            None => format!("fp:{}", self.fingerprint()),
        }
    }
}

/// A tool call requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ToolCallId>,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Correlation key for calls and responses.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallIdentity {
    Id(ToolCallId),
    Composite { name: String, arguments: String },
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
            signature: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(ToolCallId::from_raw(id));
        self
    }

    pub fn identity(&self) -> CallIdentity {
        match &self.id {
            Some(id) => CallIdentity::Id(id.clone()),
            None => CallIdentity::Composite {
                name: self.name.clone(),
                // serde_json maps are key-sorted, so this is canonical.
                arguments: self.arguments.to_string(),
            },
        }
    }
}

/// The result of a tool call as returned to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ToolCallId>,
    pub name: String,
    pub response: Value,
}

/// One content fragment. Each fragment carries exactly one kind of payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        thought: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolCall(ToolCall),
    ToolResponse(ToolResponse),
    Media {
        media: Media,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        thought: bool,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            thought: false,
            signature: None,
        }
    }

    pub fn thought(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            thought: true,
            signature: None,
        }
    }

    pub fn media(media: Media) -> Self {
        Self::Media {
            media,
            thought: false,
        }
    }

    /// Continuation signature attached to this fragment, if any.
    pub fn signature(&self) -> Option<&str> {
        match self {
            Self::Text { signature, .. } => signature.as_deref(),
            Self::ToolCall(call) => call.signature.as_deref(),
            Self::Media { media, .. } => media.signature.as_deref(),
            Self::ToolResponse(_) => None,
        }
    }
}

/// One turn in the backend's conversation format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }
}

/// A persisted chat message as handed over by the storage collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    /// Tool-call trace recorded for an assistant reply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

impl ChatMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            text: text.into(),
            media: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Model,
            text: text.into(),
            media: Vec::new(),
            steps: Vec::new(),
        }
    }
}

/// The new user content a reply is generated for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserTurn {
    pub message_id: MessageId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
}

impl UserTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message_id: MessageId::new(),
            text: text.into(),
            media: Vec::new(),
        }
    }

    pub fn to_parts(&self) -> Vec<Part> {
        let mut parts = Vec::with_capacity(1 + self.media.len());
        if !self.text.is_empty() {
            parts.push(Part::text(&self.text));
        }
        parts.extend(self.media.iter().cloned().map(Part::media));
        parts
    }
}
