use thiserror::Error;

/// The reason a `Chat` call failed, mirrored from the distilled retry policy:
/// `transport` and `rate_limit` are retried up to `max_retries`, the others are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatFailureKind {
    Transport,
    RateLimit,
    InvalidResponse,
    Canceled,
}

impl ChatFailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ChatFailureKind::Transport | ChatFailureKind::RateLimit)
    }
}

impl std::fmt::Display for ChatFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChatFailureKind::Transport => "transport",
            ChatFailureKind::RateLimit => "rate_limit",
            ChatFailureKind::InvalidResponse => "invalid_response",
            ChatFailureKind::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum HistorianError {
    #[error("project locked for {elapsed_secs}s")]
    Locked { elapsed_secs: u64 },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("vcs failure: {0}")]
    Vcs(#[from] git2::Error),

    #[error("chat failure ({kind}): {message}")]
    Chat {
        kind: ChatFailureKind,
        message: String,
    },

    #[error("embed failure: {0}")]
    Embed(String),

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("internal failure: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HistorianError>;
