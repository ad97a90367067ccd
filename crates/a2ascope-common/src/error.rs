use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid agent card: {}", .0.join("; "))]
    InvalidCard(Vec<String>),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("http error: status={status}, body={body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Transport-class failures a user may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Http { .. } | Error::Transport(_)
        )
    }

    /// A readable sentence for chat surfaces. The `Display` form stays
    /// available for debug logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidCard(errors) => match errors.as_slice() {
                [single] => format!("The agent card is invalid: {single}."),
                _ => format!(
                    "The agent card has {} problems: {}.",
                    errors.len(),
                    errors.join("; ")
                ),
            },
            Error::Timeout(after) => format!(
                "The agent did not respond within {} seconds.",
                after.as_secs()
            ),
            Error::Http { status, .. } => {
                format!("The agent responded with HTTP status {status}.")
            }
            Error::Transport(msg) => format!("Could not reach the agent: {msg}."),
            Error::Validation(msg) | Error::Auth(msg) | Error::Protocol(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_card_joins_all_errors() {
        let err = Error::InvalidCard(vec!["name is required".into(), "no endpoints".into()]);
        assert_eq!(
            err.to_string(),
            "invalid agent card: name is required; no endpoints"
        );
        assert!(err.user_message().starts_with("The agent card has 2 problems"));
    }

    #[test]
    fn timeout_is_distinct_and_retryable() {
        let err = Error::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "request timed out after 30s");
        assert_eq!(
            err.user_message(),
            "The agent did not respond within 30 seconds."
        );
        assert!(err.is_retryable());
        assert!(!Error::Validation("bad method".into()).is_retryable());
    }
}
