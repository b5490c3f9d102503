use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{AiError, AssistantBackend, BackendReply};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// JSON-over-HTTP client for the assistant backend.
///
/// * `POST {base}/analyze`: `{ "prompt", "image" }` or `{ "prompt", "images" }`,
///   answers `{ "response": "..." }`.
/// * `POST {base}/command`: `{ "prompt" }`, answers either a directive
///   `{ "action", "value", "message" }` or `{ "response": "..." }`.
///
/// No timeout and no retry: a stalled call stalls only the action waiting on it.
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn build_analyze_body(prompt: &str, images: &[String]) -> Value {
        match images {
            [single] => json!({ "prompt": prompt, "image": single }),
            many => json!({ "prompt": prompt, "images": many }),
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<String, AiError> {
        let url = self.endpoint(path);
        log::debug!("Backend: POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AiError::ConnectionError(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AiError::ConnectionError(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            log::error!("Backend: {} returned HTTP {}", path, status);
            return Err(AiError::Backend {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

/// Pull the answer out of an `/analyze` response body.
fn parse_analyze_body(body: &str) -> Result<String, AiError> {
    let v: Value = serde_json::from_str(body)
        .map_err(|e| AiError::InvalidResponse(format!("bad JSON: {e}")))?;
    v.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| AiError::InvalidResponse("missing \"response\" field".into()))
}

/// Decode a `/command` response body into a directive or an answer.
fn parse_command_body(body: &str) -> Result<BackendReply, AiError> {
    serde_json::from_str(body).map_err(|e| {
        AiError::InvalidResponse(format!("expected a directive or a response: {e}"))
    })
}

#[async_trait]
impl AssistantBackend for HttpBackend {
    async fn analyze(&self, prompt: &str, images: &[String]) -> Result<String, AiError> {
        if images.is_empty() {
            return Err(AiError::EmptyRequest("no images in the session".into()));
        }
        if prompt.trim().is_empty() {
            return Err(AiError::EmptyRequest("empty question".into()));
        }

        let body = Self::build_analyze_body(prompt, images);
        let text = self.post_json("analyze", &body).await?;
        parse_analyze_body(&text)
    }

    async fn interpret(&self, prompt: &str) -> Result<BackendReply, AiError> {
        if prompt.trim().is_empty() {
            return Err(AiError::EmptyRequest("empty command".into()));
        }
        let text = self.post_json("command", &json!({ "prompt": prompt })).await?;
        parse_command_body(&text)
    }

    fn name(&self) -> &str {
        "http-backend"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{BackendDirective, DirectiveAction};

    #[test]
    fn single_image_body() {
        let body = HttpBackend::build_analyze_body("What is this?", &["aGk=".to_string()]);
        assert_eq!(body["prompt"], "What is this?");
        assert_eq!(body["image"], "aGk=");
        assert!(body.get("images").is_none());
    }

    #[test]
    fn multi_image_body() {
        let images = vec!["YQ==".to_string(), "Yg==".to_string()];
        let body = HttpBackend::build_analyze_body("Compare", &images);
        assert_eq!(body["images"].as_array().unwrap().len(), 2);
        assert!(body.get("image").is_none());
    }

    #[test]
    fn parse_analyze_response() {
        let text = parse_analyze_body(r#"{"response":"A login form."}"#).unwrap();
        assert_eq!(text, "A login form.");
    }

    #[test]
    fn parse_analyze_missing_field() {
        assert!(matches!(
            parse_analyze_body(r#"{"answer":"x"}"#),
            Err(AiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn parse_command_directive() {
        let reply = parse_command_body(r#"{"action":"SEARCH","value":"rust traits"}"#).unwrap();
        assert_eq!(
            reply,
            BackendReply::Directive(BackendDirective::new(
                DirectiveAction::Search,
                Some("rust traits")
            ))
        );
    }

    #[test]
    fn parse_command_answer() {
        let reply = parse_command_body(r#"{"response":"It is 4pm."}"#).unwrap();
        assert_eq!(
            reply,
            BackendReply::Answer {
                response: "It is 4pm.".into()
            }
        );
    }

    #[test]
    fn parse_command_garbage() {
        assert!(parse_command_body("<html>").is_err());
    }

    #[test]
    fn endpoint_url_construction() {
        let backend = HttpBackend::new("http://localhost:8000/");
        assert_eq!(backend.endpoint("analyze"), "http://localhost:8000/analyze");
    }

    #[tokio::test]
    async fn empty_session_is_rejected_before_any_request() {
        let backend = HttpBackend::new("http://127.0.0.1:9");
        let err = backend.analyze("what?", &[]).await.unwrap_err();
        assert!(matches!(err, AiError::EmptyRequest(_)));
    }

    #[test]
    fn backend_name() {
        assert_eq!(HttpBackend::new(DEFAULT_BACKEND_URL).name(), "http-backend");
    }
}
