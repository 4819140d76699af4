use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Error codes vendors put on 400 responses when the prompt outgrew the
/// context window.
const OVERFLOW_CODES: &[&str] = &[
    "context_length_exceeded",
    "max_tokens_exceeded",
    "request_too_large",
];

static OVERFLOW_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)context (length|window|limit)|too many tokens|max.{0,10}token.{0,10}exceed")
        .expect("overflow message pattern")
});

/// Transport-level failure from a provider. Carries the HTTP status where
/// one exists so the fallback chain can classify without string-matching
/// error text (status 0 means the request never reached the server).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("provider returned {status}: {message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },
    #[error("failed to decode stream: {0}")]
    Decode(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    /// HTTP status for failover classification. `Transport` is a network
    /// failure (status 0). Decode errors happen after a 2xx and carry no
    /// status.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Transport(_) => Some(0),
            ProviderError::Api { status, .. } => Some(*status),
            ProviderError::Decode(_) => None,
            ProviderError::Timeout(_) => Some(408),
        }
    }

    /// Context-overflow classification per the loop's recovery contract:
    /// status 413, or status 400 with a known error code or an error
    /// message matching the documented substring list. Classification
    /// looks only at transport metadata, never at response body text.
    pub fn is_context_overflow(&self) -> bool {
        let ProviderError::Api {
            status,
            message,
            code,
        } = self
        else {
            return false;
        };
        match status {
            413 => true,
            400 => {
                code.as_deref()
                    .is_some_and(|c| OVERFLOW_CODES.contains(&c))
                    || OVERFLOW_MESSAGE.is_match(message)
            }
            _ => false,
        }
    }
}

/// Failure from the memory recall seam. Never fatal for a run.
#[derive(Debug, thiserror::Error)]
#[error("memory recall failed: {0}")]
pub struct MemoryError(pub String);

/// Top-level agent failure. The loop converts these into `error`/`done`
/// events rather than raising them to the host.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("run cancelled")]
    Cancelled,
    #[error("session error: {0}")]
    Session(String),
    #[error("context window exhausted after all recovery attempts")]
    OverflowExhausted,
    #[error("subagent error: {0}")]
    Subagent(String),
}
