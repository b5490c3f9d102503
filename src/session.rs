// session.rs — In-memory screenshots collected during one run.
//
// The store is owned by whoever hosts it (the assistant); nothing here is
// global. Entries are never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::browser::{BrowserApi, BrowserError, TabQuery};

/// A screenshot added to the current session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedImage {
    /// Millisecond timestamp, strictly increasing within one store.
    pub id: i64,
    /// PNG data URL as returned by the capture API.
    pub image_data: String,
    pub source_url: String,
    pub source_title: String,
    pub captured_at: DateTime<Utc>,
}

/// Ordered list of captured images with add/remove/clear semantics.
#[derive(Debug, Default)]
pub struct SessionStore {
    images: Vec<CapturedImage>,
    last_id: i64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id: the current millisecond timestamp, bumped past the last id
    /// handed out so two captures in the same millisecond stay distinct.
    fn next_id(&mut self, now: DateTime<Utc>) -> i64 {
        let id = now.timestamp_millis().max(self.last_id + 1);
        self.last_id = id;
        id
    }

    /// Record a new capture and return a copy of the stored entry.
    pub fn add(
        &mut self,
        image_data: impl Into<String>,
        source_url: impl Into<String>,
        source_title: impl Into<String>,
    ) -> CapturedImage {
        let now = Utc::now();
        let image = CapturedImage {
            id: self.next_id(now),
            image_data: image_data.into(),
            source_url: source_url.into(),
            source_title: source_title.into(),
            captured_at: now,
        };
        self.images.push(image.clone());
        log::debug!(
            "Session: added {} ({}), {} total",
            image.id,
            image.source_title,
            self.images.len()
        );
        image
    }

    /// Remove the entry with `id`. Returns whether anything was removed;
    /// an absent id leaves the store untouched.
    pub fn remove(&mut self, id: i64) -> bool {
        let before = self.images.len();
        self.images.retain(|img| img.id != id);
        before != self.images.len()
    }

    pub fn clear(&mut self) {
        self.images.clear();
    }

    pub fn list(&self) -> &[CapturedImage] {
        &self.images
    }

    pub fn get(&self, id: i64) -> Option<&CapturedImage> {
        self.images.iter().find(|img| img.id == id)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Capture the active tab of the current window and add it to `store`.
/// Returns the new entry and the store size after the add.
pub async fn add_active_tab(
    browser: &dyn BrowserApi,
    store: &tokio::sync::Mutex<SessionStore>,
) -> Result<(CapturedImage, usize), BrowserError> {
    let active = browser
        .query_tabs(TabQuery::active_in_current_window())
        .await?
        .into_iter()
        .next();

    // Capture of the focused window still works when the tab list is
    // unavailable; only the labels fall back.
    let window_id = active.as_ref().map(|t| t.window_id).unwrap_or_default();
    let data_url = browser.capture_visible_tab(window_id).await?;

    let (url, title) = match active {
        Some(tab) => (tab.url, tab.title),
        None => ("Unknown".to_string(), "Unknown Tab".to_string()),
    };

    let mut store = store.lock().await;
    let image = store.add(data_url, url, title);
    Ok((image, store.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_even_within_one_millisecond() {
        let mut store = SessionStore::new();
        let a = store.add("data:a", "https://a", "A");
        let b = store.add("data:b", "https://b", "B");
        let c = store.add("data:c", "https://c", "C");
        assert!(a.id < b.id && b.id < c.id);
    }

    #[test]
    fn add_then_remove_restores_prior_contents() {
        let mut store = SessionStore::new();
        store.add("data:a", "https://a", "A");
        let before = store.list().to_vec();

        let x = store.add("data:x", "https://x", "X");
        assert_eq!(store.len(), 2);
        assert!(store.remove(x.id));
        assert_eq!(store.list(), before.as_slice());
    }

    #[test]
    fn remove_absent_id_is_noop() {
        let mut store = SessionStore::new();
        store.add("data:a", "https://a", "A");
        assert!(!store.remove(-1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn clear_always_empties() {
        let mut store = SessionStore::new();
        store.clear();
        assert!(store.is_empty());

        for i in 0..5 {
            store.add(format!("data:{i}"), "https://a", "A");
        }
        store.clear();
        assert!(store.is_empty());
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn get_finds_by_id() {
        let mut store = SessionStore::new();
        let a = store.add("data:a", "https://a", "A");
        assert_eq!(store.get(a.id).map(|i| i.source_title.as_str()), Some("A"));
        assert!(store.get(a.id + 1000).is_none());
    }

    #[test]
    fn captured_image_serializes_camel_case() {
        let mut store = SessionStore::new();
        let a = store.add("data:a", "https://a", "A");
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["sourceTitle"], "A");
        assert!(v["capturedAt"].is_string());
    }
}
