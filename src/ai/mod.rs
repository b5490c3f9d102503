use async_trait::async_trait;

pub mod backend;
pub mod types;
pub use backend::HttpBackend;
pub use types::*;

/// Trait for the remote language/vision backend.
/// The backend does the reasoning; this side only ships prompts and images.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Ask a question about one or more images.
    /// `images` are bare base64 payloads (no data URL prefix).
    async fn analyze(&self, prompt: &str, images: &[String]) -> Result<String, AiError>;

    /// Turn a natural-language command into a directive or an answer.
    async fn interpret(&self, prompt: &str) -> Result<BackendReply, AiError>;

    /// Backend name for logging/display
    fn name(&self) -> &str;
}
