// history.rs — Per-user activity history stored in the accounts database.

use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AccountsError, AccountsService, ActivityRecord, NewActivity, RecordQuery};

pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
const CLEAR_BATCH: u32 = 100;

/// Kinds of activity recorded for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    CaptureScreenshot,
    ExecuteCommand,
    AnalyzeScreen,
    VoiceCommand,
    MultiCapture,
    WakeWord,
    SettingsChange,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::CaptureScreenshot => "capture_screenshot",
            ActivityKind::ExecuteCommand => "execute_command",
            ActivityKind::AnalyzeScreen => "analyze_screen",
            ActivityKind::VoiceCommand => "voice_command",
            ActivityKind::MultiCapture => "multi_capture",
            ActivityKind::WakeWord => "wake_word",
            ActivityKind::SettingsChange => "settings_change",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A history item with its payload decoded for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    pub action: String,
    pub data: Value,
    pub timestamp: String,
}

impl From<ActivityRecord> for ActivityEntry {
    fn from(record: ActivityRecord) -> Self {
        // Records written by older clients may hold free text here.
        let data = serde_json::from_str(&record.data).unwrap_or_else(|_| Value::Object(Default::default()));
        Self {
            id: record.id,
            action: record.action,
            data,
            timestamp: record.timestamp,
        }
    }
}

pub struct ActivityLog {
    service: Arc<dyn AccountsService>,
}

impl ActivityLog {
    pub fn new(service: Arc<dyn AccountsService>) -> Self {
        Self { service }
    }

    pub async fn log_activity(
        &self,
        user_id: &str,
        kind: ActivityKind,
        data: &Value,
    ) -> Result<ActivityRecord, AccountsError> {
        let record = NewActivity {
            user_id: user_id.to_string(),
            action: kind.as_str().to_string(),
            data: data.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let stored = self.service.create_record(&record).await?;
        log::debug!("History: logged {} for {}", kind, user_id);
        Ok(stored)
    }

    /// The user's most recent activities, newest first.
    pub async fn user_history(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<ActivityEntry>, AccountsError> {
        let query = RecordQuery::for_user(user_id).newest_first().limit(limit);
        let records = self.service.list_records(&query).await?;
        Ok(records.into_iter().map(ActivityEntry::from).collect())
    }

    pub async fn delete_activity(&self, id: &str) -> Result<(), AccountsError> {
        self.service.delete_record(id).await
    }

    /// Delete every activity of `user_id`. Returns how many were removed.
    pub async fn clear_user_history(&self, user_id: &str) -> Result<usize, AccountsError> {
        let query = RecordQuery::for_user(user_id).limit(CLEAR_BATCH);
        let mut removed = 0;
        loop {
            let batch = self.service.list_records(&query).await?;
            let batch_len = batch.len();
            for record in batch {
                self.service.delete_record(&record.id).await?;
                removed += 1;
            }
            if batch_len < CLEAR_BATCH as usize {
                break;
            }
        }
        log::info!("History: cleared {} activities for {}", removed, user_id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AuthSession, User};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-memory stand-in for the document database.
    #[derive(Default)]
    struct MemoryDb {
        records: Mutex<Vec<ActivityRecord>>,
        next: Mutex<u32>,
    }

    #[async_trait]
    impl AccountsService for MemoryDb {
        async fn create_account(&self, _: &str, _: &str, _: &str) -> Result<User, AccountsError> {
            unimplemented!()
        }

        async fn login(&self, _: &str, _: &str) -> Result<AuthSession, AccountsError> {
            unimplemented!()
        }

        async fn current_user(&self) -> Result<User, AccountsError> {
            Err(AccountsError::NotSignedIn)
        }

        async fn logout(&self) -> Result<(), AccountsError> {
            Ok(())
        }

        async fn create_record(&self, r: &NewActivity) -> Result<ActivityRecord, AccountsError> {
            let mut next = self.next.lock().unwrap();
            *next += 1;
            let stored = ActivityRecord {
                id: format!("doc{}", *next),
                user_id: r.user_id.clone(),
                action: r.action.clone(),
                data: r.data.clone(),
                timestamp: r.timestamp.clone(),
            };
            self.records.lock().unwrap().push(stored.clone());
            Ok(stored)
        }

        async fn list_records(&self, q: &RecordQuery) -> Result<Vec<ActivityRecord>, AccountsError> {
            let mut out: Vec<ActivityRecord> = self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| q.equal.iter().all(|(k, v)| k == "userId" && &r.user_id == v))
                .cloned()
                .collect();
            if q.order_desc.is_some() {
                out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
            }
            if let Some(limit) = q.limit {
                out.truncate(limit as usize);
            }
            Ok(out)
        }

        async fn delete_record(&self, id: &str) -> Result<(), AccountsError> {
            self.records.lock().unwrap().retain(|r| r.id != id);
            Ok(())
        }
    }

    fn memory_log() -> (Arc<MemoryDb>, ActivityLog) {
        let db = Arc::new(MemoryDb::default());
        (db.clone(), ActivityLog::new(db))
    }

    #[tokio::test]
    async fn logged_activity_round_trips_data() {
        let (_db, log) = memory_log();
        log.log_activity("u1", ActivityKind::ExecuteCommand, &json!({"action": "SEARCH"}))
            .await
            .unwrap();

        let history = log.user_history("u1", DEFAULT_HISTORY_LIMIT).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, "execute_command");
        assert_eq!(history[0].data["action"], "SEARCH");
    }

    #[tokio::test]
    async fn history_is_scoped_to_user_and_limited() {
        let (_db, log) = memory_log();
        for _ in 0..3 {
            log.log_activity("u1", ActivityKind::WakeWord, &json!({})).await.unwrap();
        }
        log.log_activity("u2", ActivityKind::WakeWord, &json!({})).await.unwrap();

        assert_eq!(log.user_history("u1", 2).await.unwrap().len(), 2);
        assert_eq!(log.user_history("u2", 20).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_only_that_user() {
        let (db, log) = memory_log();
        for _ in 0..5 {
            log.log_activity("u1", ActivityKind::CaptureScreenshot, &json!({})).await.unwrap();
        }
        log.log_activity("u2", ActivityKind::CaptureScreenshot, &json!({})).await.unwrap();

        assert_eq!(log.clear_user_history("u1").await.unwrap(), 5);
        assert_eq!(db.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn unparseable_data_becomes_empty_object() {
        let entry = ActivityEntry::from(ActivityRecord {
            id: "d".into(),
            user_id: "u".into(),
            action: "voice_command".into(),
            data: "not json".into(),
            timestamp: "2026-01-01T00:00:00.000Z".into(),
        });
        assert_eq!(entry.data, json!({}));
    }

    #[test]
    fn kind_names_match_wire_format() {
        assert_eq!(
            serde_json::to_value(ActivityKind::MultiCapture).unwrap(),
            json!("multi_capture")
        );
        assert_eq!(ActivityKind::SettingsChange.to_string(), "settings_change");
    }
}
