use serde::{Deserialize, Serialize};

use crate::dispatcher::BackendDirective;

/// What the backend made of a typed or spoken command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackendReply {
    /// A browser action to perform.
    Directive(BackendDirective),
    /// Free-text answer to show (and speak) to the user.
    Answer {
        response: String,
    },
}

/// One line of the chat view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    /// Number of session images sent with this turn.
    #[serde(default)]
    pub image_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Error type for backend calls
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),
    #[error("Backend returned HTTP {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Nothing to analyze: {0}")]
    EmptyRequest(String),
    #[error("Image preparation failed: {0}")]
    ImagePreparation(String),
}
