// appwrite.rs — AccountsService over the Appwrite REST API.
//
// The session lives in the client's cookie store, the way the web SDK
// keeps it in the browser. One `AppwriteClient` per signed-in context.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::history::ActivityLog;
use super::{
    AccountsError, AccountsService, ActivityRecord, AuthSession, NewActivity, RecordQuery, User,
};

/// Where the accounts service lives and which collection holds history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppwriteConfig {
    pub endpoint: String,
    pub project_id: String,
    pub database_id: String,
    pub collection_id: String,
}

impl Default for AppwriteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://cloud.appwrite.io/v1".into(),
            project_id: String::new(),
            database_id: String::new(),
            collection_id: "user_history".into(),
        }
    }
}

pub struct AppwriteClient {
    config: AppwriteConfig,
    client: Client,
}

#[derive(Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<ActivityRecord>,
}

impl AppwriteClient {
    pub fn new(config: AppwriteConfig) -> Result<Self, AccountsError> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| AccountsError::ConnectionError(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &AppwriteConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn documents_path(&self) -> String {
        format!(
            "/databases/{}/collections/{}/documents",
            self.config.database_id, self.config.collection_id
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("X-Appwrite-Project", &self.config.project_id)
            .header("X-Appwrite-Response-Format", "1.5.0")
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, AccountsError> {
        let response = req
            .send()
            .await
            .map_err(|e| AccountsError::ConnectionError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = service_error(status.as_u16(), &body);
        log::error!("Appwrite: HTTP {}: {}", status, err);
        Err(err)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, AccountsError> {
        self.send(req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| AccountsError::InvalidResponse(e.to_string()))
    }
}

/// The live client and the activity log on top of it. Rebuilt when the
/// accounts config changes, which drops the old session cookie.
pub struct AccountsConnection {
    inner: Mutex<Linked>,
}

type Linked = (Arc<AppwriteClient>, Arc<ActivityLog>);

impl AccountsConnection {
    pub fn new(config: AppwriteConfig) -> Result<Self, AccountsError> {
        Ok(Self {
            inner: Mutex::new(Self::build(config)?),
        })
    }

    fn build(config: AppwriteConfig) -> Result<Linked, AccountsError> {
        let client = Arc::new(AppwriteClient::new(config)?);
        let log = Arc::new(ActivityLog::new(client.clone()));
        Ok((client, log))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Linked> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn service(&self) -> Arc<AppwriteClient> {
        Arc::clone(&self.lock().0)
    }

    pub fn history(&self) -> Arc<ActivityLog> {
        Arc::clone(&self.lock().1)
    }

    /// Switch to `config`. Returns `true` when a new client was built,
    /// i.e. any signed-in session is gone.
    pub fn reconfigure(&self, config: &AppwriteConfig) -> Result<bool, AccountsError> {
        if self.lock().0.config() == config {
            return Ok(false);
        }
        let rebuilt = Self::build(config.clone())?;
        *self.lock() = rebuilt;
        log::info!("Appwrite: reconfigured for project {}", config.project_id);
        Ok(true)
    }
}

/// Build the error for a failed call from Appwrite's `{ message, code }` body.
fn service_error(status: u16, body: &str) -> AccountsError {
    if status == 401 {
        if let Ok(v) = serde_json::from_str::<Value>(body) {
            if v.get("type").and_then(|t| t.as_str()) == Some("general_unauthorized_scope") {
                return AccountsError::NotSignedIn;
            }
        }
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("Request failed with HTTP {}", status));
    AccountsError::Service {
        code: status,
        message,
    }
}

/// Encode a `RecordQuery` as Appwrite JSON query strings.
fn encode_queries(query: &RecordQuery) -> Vec<String> {
    let mut out = Vec::new();
    for (attribute, value) in &query.equal {
        out.push(json!({ "method": "equal", "attribute": attribute, "values": [value] }).to_string());
    }
    if let Some(attribute) = &query.order_desc {
        out.push(json!({ "method": "orderDesc", "attribute": attribute }).to_string());
    }
    if let Some(limit) = query.limit {
        out.push(json!({ "method": "limit", "values": [limit] }).to_string());
    }
    out
}

#[async_trait]
impl AccountsService for AppwriteClient {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<User, AccountsError> {
        let body = json!({
            "userId": "unique()",
            "email": email,
            "password": password,
            "name": name,
        });
        let user: User = self
            .send_json(self.request(Method::POST, "/account").json(&body))
            .await?;
        log::info!("Appwrite: account created ({})", user.id);
        Ok(user)
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AccountsError> {
        let body = json!({ "email": email, "password": password });
        let session: AuthSession = self
            .send_json(self.request(Method::POST, "/account/sessions/email").json(&body))
            .await?;
        log::info!("Appwrite: login successful");
        Ok(session)
    }

    async fn current_user(&self) -> Result<User, AccountsError> {
        self.send_json(self.request(Method::GET, "/account")).await
    }

    async fn logout(&self) -> Result<(), AccountsError> {
        self.send(self.request(Method::DELETE, "/account/sessions/current"))
            .await?;
        log::info!("Appwrite: logout successful");
        Ok(())
    }

    async fn create_record(&self, record: &NewActivity) -> Result<ActivityRecord, AccountsError> {
        let body = json!({ "documentId": "unique()", "data": record });
        self.send_json(self.request(Method::POST, &self.documents_path()).json(&body))
            .await
    }

    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<ActivityRecord>, AccountsError> {
        let params: Vec<(&str, String)> = encode_queries(query)
            .into_iter()
            .map(|q| ("queries[]", q))
            .collect();
        let list: DocumentList = self
            .send_json(self.request(Method::GET, &self.documents_path()).query(&params))
            .await?;
        Ok(list.documents)
    }

    async fn delete_record(&self, id: &str) -> Result<(), AccountsError> {
        let path = format!("{}/{}", self.documents_path(), id);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_query_encoding() {
        let q = RecordQuery::for_user("u1").newest_first().limit(20);
        let encoded = encode_queries(&q);
        assert_eq!(encoded.len(), 3);

        let equal: Value = serde_json::from_str(&encoded[0]).unwrap();
        assert_eq!(equal["method"], "equal");
        assert_eq!(equal["attribute"], "userId");
        assert_eq!(equal["values"][0], "u1");

        let order: Value = serde_json::from_str(&encoded[1]).unwrap();
        assert_eq!(order["method"], "orderDesc");
        assert_eq!(order["attribute"], "timestamp");

        let limit: Value = serde_json::from_str(&encoded[2]).unwrap();
        assert_eq!(limit["values"][0], 20);
    }

    #[test]
    fn error_message_comes_from_body() {
        let err = service_error(
            400,
            r#"{"message":"Invalid credentials. Please check the email and password.","code":401,"type":"user_invalid_credentials"}"#,
        );
        assert_eq!(
            err.to_string(),
            "Invalid credentials. Please check the email and password."
        );
    }

    #[test]
    fn missing_scope_means_signed_out() {
        let err = service_error(
            401,
            r#"{"message":"User (role: guests) missing scope (account)","code":401,"type":"general_unauthorized_scope"}"#,
        );
        assert!(matches!(err, AccountsError::NotSignedIn));
    }

    #[test]
    fn non_json_error_body() {
        let err = service_error(502, "Bad Gateway");
        assert_eq!(err.to_string(), "Request failed with HTTP 502");
    }

    #[test]
    fn reconfigure_rebuilds_only_on_change() {
        let config = AppwriteConfig {
            project_id: "p1".into(),
            ..AppwriteConfig::default()
        };
        let conn = AccountsConnection::new(config.clone()).unwrap();
        let before = conn.service();

        assert!(!conn.reconfigure(&config).unwrap());
        assert!(Arc::ptr_eq(&before, &conn.service()));

        let moved = AppwriteConfig {
            project_id: "p2".into(),
            ..config
        };
        assert!(conn.reconfigure(&moved).unwrap());
        assert!(!Arc::ptr_eq(&before, &conn.service()));
        assert_eq!(conn.service().config().project_id, "p2");
    }

    #[test]
    fn url_joins_endpoint_and_path() {
        let client = AppwriteClient::new(AppwriteConfig {
            endpoint: "https://cloud.appwrite.io/v1/".into(),
            project_id: "p".into(),
            database_id: "db".into(),
            collection_id: "hist".into(),
        })
        .unwrap();
        assert_eq!(
            client.url(&client.documents_path()),
            "https://cloud.appwrite.io/v1/databases/db/collections/hist/documents"
        );
    }
}
