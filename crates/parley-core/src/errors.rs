use std::time::Duration;

/// Backend failure. The orchestrator never retries; it appends the message
/// to the Turn text and ends the Turn.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("backend rejected credentials: {0}")]
    Unauthorized(String),
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("blocked by safety filter: {0}")]
    Blocked(String),
    #[error("throttled by backend")]
    Throttled { retry_after: Option<Duration> },
    #[error("backend status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("backend overloaded")]
    Overloaded,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("malformed backend payload: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Stable label for log fields.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Rejected(_) => "rejected",
            Self::Blocked(_) => "blocked",
            Self::Throttled { .. } => "throttled",
            Self::Upstream { .. } => "upstream",
            Self::Overloaded => "overloaded",
            Self::Transport(_) => "transport",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Decode(_) => "decode",
        }
    }

    /// Map an HTTP status (or an error `code` embedded in a stream payload).
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            429 => Self::Throttled { retry_after: None },
            503 => Self::Overloaded,
            408 | 504 => Self::StreamInterrupted(format!("deadline exceeded ({status}): {body}")),
            500..=599 => Self::Upstream { status, body },
            400..=499 => Self::Rejected(body),
            _ => Self::Rejected(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_variants() {
        assert!(matches!(
            GatewayError::from_status(403, "forbidden".into()),
            GatewayError::Unauthorized(_)
        ));
        assert!(matches!(
            GatewayError::from_status(429, String::new()),
            GatewayError::Throttled { .. }
        ));
        assert!(matches!(GatewayError::from_status(503, String::new()), GatewayError::Overloaded));
        assert!(matches!(
            GatewayError::from_status(504, String::new()),
            GatewayError::StreamInterrupted(_)
        ));
        assert!(matches!(
            GatewayError::from_status(502, "bad gateway".into()),
            GatewayError::Upstream { status: 502, .. }
        ));
        assert!(matches!(
            GatewayError::from_status(404, "no such model".into()),
            GatewayError::Rejected(_)
        ));
        assert!(matches!(
            GatewayError::from_status(302, String::new()),
            GatewayError::Rejected(ref m) if m.contains("302")
        ));
    }

    #[test]
    fn display_and_kind() {
        assert_eq!(GatewayError::Overloaded.to_string(), "backend overloaded");
        assert_eq!(GatewayError::Overloaded.error_kind(), "overloaded");
        assert_eq!(
            GatewayError::Transport("connection refused".into()).to_string(),
            "transport failure: connection refused"
        );
        assert_eq!(GatewayError::Decode("x".into()).error_kind(), "decode");
    }
}
