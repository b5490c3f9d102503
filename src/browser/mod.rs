use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod bridge;
pub use bridge::{
    BridgeRequest, BrowserReply, BrowserRequest, RuntimeBridge, DEFAULT_REPLY_TIMEOUT,
};

/// An open tab as reported by the extension runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: i64,
    pub window_id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub active: bool,
}

impl TabInfo {
    /// Case-insensitive substring match against the title or the URL.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let needle = keyword.to_lowercase();
        self.title.to_lowercase().contains(&needle) || self.url.to_lowercase().contains(&needle)
    }
}

/// Filter for `BrowserApi::query_tabs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabQuery {
    /// Only the active tab(s).
    pub active: bool,
    /// Restrict to the window the user is currently looking at.
    pub current_window: bool,
}

impl TabQuery {
    pub fn current_window() -> Self {
        Self {
            active: false,
            current_window: true,
        }
    }

    pub fn active_in_current_window() -> Self {
        Self {
            active: true,
            current_window: true,
        }
    }
}

/// Error type for browser operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrowserError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Api(String),
    #[error("Browser runtime disconnected")]
    Disconnected,
    #[error("Browser runtime did not answer within {0:?}")]
    Timeout(Duration),
}

/// The four browser capabilities the dispatcher and session need.
/// Implemented over runtime message passing in production and by
/// in-memory fakes in tests.
#[async_trait]
pub trait BrowserApi: Send + Sync {
    /// List open tabs in enumeration order.
    async fn query_tabs(&self, query: TabQuery) -> Result<Vec<TabInfo>, BrowserError>;

    /// Make the given tab the active one in its window.
    async fn activate_tab(&self, tab_id: i64) -> Result<(), BrowserError>;

    /// Open a new tab at `url`.
    async fn create_tab(&self, url: &str) -> Result<TabInfo, BrowserError>;

    /// Capture the visible area of a window as a PNG data URL.
    async fn capture_visible_tab(&self, window_id: i64) -> Result<String, BrowserError>;
}
