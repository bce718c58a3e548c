//! # Error Types Module
//!
//! Structured errors for the chat-completion client, the conversation engine
//! and configuration loading. Application edges wrap these in `anyhow`.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by a [`ChatModel`](crate::llm::ChatModel) implementation
#[derive(Debug, Error)]
pub enum ChatError {
    /// Transport-level failure (connection refused, DNS, TLS...)
    #[error("chat request failed: {0}")]
    Request(String),
    /// The API answered with a non-success status
    #[error("chat API returned {status}: {body}")]
    Status { status: u16, body: String },
    /// The API answered but the body is not a usable completion
    #[error("malformed chat response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ChatError::MalformedResponse(err.to_string())
        } else {
            ChatError::Request(err.to_string())
        }
    }
}

/// Errors surfaced by the conversation engine for a single turn
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    /// The chat model did not answer within the configured timeout
    #[error("chat model timed out after {0:?}")]
    Timeout(Duration),
    /// The model kept requesting tools past the per-turn call budget
    #[error("chat model still requesting tools after {0} calls")]
    ToolRoundsExhausted(usize),
    /// Reading services, hours or known lead data for the prompt failed
    #[error("lead store lookup failed: {0}")]
    Lookup(#[source] sqlx::Error),
    /// Writing to the lead store failed
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl EngineError {
    /// Whether a write to the lead store failed
    pub fn is_storage(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

/// Configuration loading errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
