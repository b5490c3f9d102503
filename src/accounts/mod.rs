use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod appwrite;
pub mod history;
pub use appwrite::{AccountsConnection, AppwriteClient, AppwriteConfig};
pub use history::{ActivityEntry, ActivityKind, ActivityLog};

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// An email/password session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    #[serde(rename = "$id")]
    pub id: String,
    pub user_id: String,
}

/// A stored activity document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    #[serde(rename = "$id")]
    pub id: String,
    pub user_id: String,
    pub action: String,
    /// JSON text.
    #[serde(default)]
    pub data: String,
    pub timestamp: String,
}

/// Fields for a new activity document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
    pub user_id: String,
    pub action: String,
    pub data: String,
    pub timestamp: String,
}

/// Filter, sort and limit for `list_records`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub equal: Vec<(String, String)>,
    pub order_desc: Option<String>,
    pub limit: Option<u32>,
}

impl RecordQuery {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            equal: vec![("userId".to_string(), user_id.to_string())],
            ..Self::default()
        }
    }

    pub fn newest_first(mut self) -> Self {
        self.order_desc = Some("timestamp".to_string());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Error type for accounts/database calls. `Display` is what the UI shows
/// inline next to the form that failed.
#[derive(Debug, thiserror::Error)]
pub enum AccountsError {
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Connection failed: {0}")]
    ConnectionError(String),
    #[error("{message}")]
    Service { code: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// The third-party user accounts and document database.
#[async_trait]
pub trait AccountsService: Send + Sync {
    async fn create_account(&self, email: &str, password: &str, name: &str)
        -> Result<User, AccountsError>;

    async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AccountsError>;

    async fn current_user(&self) -> Result<User, AccountsError>;

    async fn logout(&self) -> Result<(), AccountsError>;

    async fn create_record(&self, record: &NewActivity) -> Result<ActivityRecord, AccountsError>;

    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<ActivityRecord>, AccountsError>;

    async fn delete_record(&self, id: &str) -> Result<(), AccountsError>;
}

/// Sign up then sign in, returning the fresh user.
pub async fn sign_up(
    service: &dyn AccountsService,
    email: &str,
    password: &str,
    name: &str,
) -> Result<User, AccountsError> {
    service.create_account(email, password, name).await?;
    sign_in(service, email, password).await
}

/// Sign in and fetch the current user.
pub async fn sign_in(
    service: &dyn AccountsService,
    email: &str,
    password: &str,
) -> Result<User, AccountsError> {
    service.login(email, password).await?;
    let user = service.current_user().await?;
    log::info!("Signed in as {}", user.id);
    Ok(user)
}

/// `true` when a session is active.
pub async fn is_signed_in(service: &dyn AccountsService) -> bool {
    service.current_user().await.is_ok()
}
