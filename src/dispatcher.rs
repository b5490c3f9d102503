// dispatcher.rs — Maps a backend directive onto exactly one browser action.
//
// Every branch returns a `CommandResult`; browser failures are folded into
// a failed result carrying the underlying error text. No retries.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::browser::{BrowserApi, BrowserError, TabQuery};

pub const DEFAULT_SEARCH_TEMPLATE: &str = "https://www.google.com/search?q={query}";

const NO_COMMAND_MESSAGE: &str = "Chatting mode... Please give a browser command.";

/// Action tag of a backend directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DirectiveAction {
    SwitchTab,
    Search,
    Capture,
    None,
    /// Any tag outside the fixed set, kept verbatim for the error message.
    Unknown(String),
}

impl From<String> for DirectiveAction {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "SWITCH_TAB" => DirectiveAction::SwitchTab,
            "SEARCH" => DirectiveAction::Search,
            "CAPTURE" => DirectiveAction::Capture,
            "NONE" => DirectiveAction::None,
            _ => DirectiveAction::Unknown(tag),
        }
    }
}

impl From<DirectiveAction> for String {
    fn from(action: DirectiveAction) -> Self {
        action.to_string()
    }
}

impl fmt::Display for DirectiveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveAction::SwitchTab => f.write_str("SWITCH_TAB"),
            DirectiveAction::Search => f.write_str("SEARCH"),
            DirectiveAction::Capture => f.write_str("CAPTURE"),
            DirectiveAction::None => f.write_str("NONE"),
            DirectiveAction::Unknown(tag) => f.write_str(tag),
        }
    }
}

/// Tagged instruction returned by the remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDirective {
    pub action: DirectiveAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BackendDirective {
    pub fn new(action: DirectiveAction, value: Option<&str>) -> Self {
        Self {
            action,
            value: value.map(str::to_string),
            message: None,
        }
    }
}

/// Uniform outcome of a dispatched directive. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub succeeded: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<DirectiveAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// PNG data URL for captures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

impl CommandResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
            action: None,
            target: None,
            image_data: None,
        }
    }

    fn succeeded(action: DirectiveAction, message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
            action: Some(action),
            target: None,
            image_data: None,
        }
    }

    fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Build the search URL for `query`, percent-encoding it into `template`'s
/// `{query}` placeholder. Spaces become `%20`, not `+`.
pub fn search_url(template: &str, query: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    template.replace("{query}", &encoded.replace('+', "%20"))
}

pub struct CommandDispatcher {
    browser: Arc<dyn BrowserApi>,
    search_template: String,
}

impl CommandDispatcher {
    pub fn new(browser: Arc<dyn BrowserApi>) -> Self {
        Self {
            browser,
            search_template: DEFAULT_SEARCH_TEMPLATE.to_string(),
        }
    }

    /// Use a different search engine. The template must contain `{query}`.
    pub fn with_search_template(mut self, template: impl Into<String>) -> Self {
        self.search_template = template.into();
        self
    }

    pub fn set_search_template(&mut self, template: impl Into<String>) {
        self.search_template = template.into();
    }

    /// Execute a directive. Never fails past this boundary.
    pub async fn execute(&self, directive: &BackendDirective) -> CommandResult {
        log::info!(
            "Dispatcher: executing {} (value={:?})",
            directive.action,
            directive.value
        );

        let result = match &directive.action {
            DirectiveAction::SwitchTab => match directive.value.as_deref() {
                Some(keyword) => self.switch_to_tab(keyword).await,
                None => CommandResult::failed("SWITCH_TAB needs a tab keyword"),
            },
            DirectiveAction::Search => match directive.value.as_deref() {
                Some(query) => self.search(query).await,
                None => CommandResult::failed("SEARCH needs a query"),
            },
            DirectiveAction::Capture => self.capture().await,
            DirectiveAction::None => CommandResult::failed(
                directive
                    .message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| NO_COMMAND_MESSAGE.to_string()),
            ),
            DirectiveAction::Unknown(tag) => {
                log::warn!("Dispatcher: unknown action {}", tag);
                CommandResult::failed(format!("Unknown action: {}", tag))
            }
        };

        if !result.succeeded {
            log::debug!("Dispatcher: {} did not succeed: {}", directive.action, result.message);
        }
        result
    }

    /// Activate the first tab in the current window whose title or URL
    /// contains `keyword` (case-insensitive).
    pub async fn switch_to_tab(&self, keyword: &str) -> CommandResult {
        match self.try_switch_to_tab(keyword).await {
            Ok(result) => result,
            Err(e) => CommandResult::failed(format!("Failed to switch tab: {}", e)),
        }
    }

    async fn try_switch_to_tab(&self, keyword: &str) -> Result<CommandResult, BrowserError> {
        let tabs = self.browser.query_tabs(TabQuery::current_window()).await?;
        let Some(target) = tabs.into_iter().find(|t| t.matches_keyword(keyword)) else {
            return Ok(CommandResult::failed(format!("No tab found matching: {}", keyword)));
        };

        self.browser.activate_tab(target.id).await?;
        Ok(
            CommandResult::succeeded(
                DirectiveAction::SwitchTab,
                format!("Switched to: {}", target.title),
            )
            .with_target(target.title),
        )
    }

    /// Open a new tab with search results for `query`.
    pub async fn search(&self, query: &str) -> CommandResult {
        let url = search_url(&self.search_template, query);
        match self.browser.create_tab(&url).await {
            Ok(_) => CommandResult::succeeded(
                DirectiveAction::Search,
                format!("Searching for: {}", query),
            )
            .with_target(query),
            Err(e) => CommandResult::failed(format!("Failed to perform search: {}", e)),
        }
    }

    /// Capture the active tab of the current window.
    pub async fn capture(&self) -> CommandResult {
        match self.try_capture().await {
            Ok(data_url) => {
                let mut result =
                    CommandResult::succeeded(DirectiveAction::Capture, "Screenshot captured!");
                result.image_data = Some(data_url);
                result
            }
            Err(e) => CommandResult::failed(format!("Failed to capture screen: {}", e)),
        }
    }

    async fn try_capture(&self) -> Result<String, BrowserError> {
        let tabs = self
            .browser
            .query_tabs(TabQuery::active_in_current_window())
            .await?;
        let tab = tabs
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::NotFound("no active tab".into()))?;
        self.browser.capture_visible_tab(tab.window_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_parses_known_tags() {
        let d: BackendDirective =
            serde_json::from_str(r#"{"action":"SWITCH_TAB","value":"gmail"}"#).unwrap();
        assert_eq!(d.action, DirectiveAction::SwitchTab);
        assert_eq!(d.value.as_deref(), Some("gmail"));
        assert!(d.message.is_none());
    }

    #[test]
    fn directive_keeps_unknown_tag() {
        let d: BackendDirective = serde_json::from_str(r#"{"action":"SCROLL_DOWN"}"#).unwrap();
        assert_eq!(d.action, DirectiveAction::Unknown("SCROLL_DOWN".into()));
    }

    #[test]
    fn directive_serializes_tag_back() {
        let d = BackendDirective::new(DirectiveAction::Search, Some("rust"));
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["action"], "SEARCH");
        assert_eq!(v["value"], "rust");
        assert!(v.get("message").is_none());
    }

    #[test]
    fn search_url_percent_encodes_query() {
        let url = search_url(DEFAULT_SEARCH_TEMPLATE, "rust async & tokio");
        assert_eq!(
            url,
            "https://www.google.com/search?q=rust%20async%20%26%20tokio"
        );
    }

    #[test]
    fn search_url_keeps_literal_plus() {
        let url = search_url("https://duckduckgo.com/?q={query}", "c++");
        assert_eq!(url, "https://duckduckgo.com/?q=c%2B%2B");
    }

    #[test]
    fn command_result_omits_empty_payload() {
        let v = serde_json::to_value(CommandResult::failed("nope")).unwrap();
        assert_eq!(v["succeeded"], false);
        assert!(v.get("imageData").is_none());
    }
}
