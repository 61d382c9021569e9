use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(ChatId, "chat");
branded_id!(MessageId, "msg");
branded_id!(ClientId, "client");
branded_id!(ToolCallId, "call");
branded_id!(CommandId, "cmd");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        assert!(ChatId::new().as_str().starts_with("chat_"));
        assert!(MessageId::new().as_str().starts_with("msg_"));
        assert!(ClientId::new().as_str().starts_with("client_"));
        assert!(ToolCallId::new().as_str().starts_with("call_"));
        assert!(CommandId::new().as_str().starts_with("cmd_"));
    }

    #[test]
    fn ids_are_unique() {
        let a = CommandId::new();
        let b = CommandId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = ChatId::new();
        let parsed: ChatId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn from_raw_keeps_backend_ids_verbatim() {
        let id = ToolCallId::from_raw("fc_0123");
        assert_eq!(id.as_str(), "fc_0123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""fc_0123""#);
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<CommandId> = (0..100).map(|_| CommandId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
