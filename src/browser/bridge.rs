// bridge.rs — BrowserApi over runtime message passing.
//
// Each call becomes a `BridgeRequest { id, request }` pushed to whichever
// context owns the real browser APIs (the side panel web view). That
// context answers with `resolve(id, reply)`, which wakes the waiting call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use super::{BrowserApi, BrowserError, TabInfo, TabQuery};

/// A browser API call waiting to be performed by the hosting context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BrowserRequest {
    #[serde(rename_all = "camelCase")]
    QueryTabs { query: TabQuery },
    #[serde(rename_all = "camelCase")]
    ActivateTab { tab_id: i64 },
    #[serde(rename_all = "camelCase")]
    CreateTab { url: String },
    #[serde(rename_all = "camelCase")]
    CaptureVisibleTab { window_id: i64 },
}

/// Envelope emitted to the hosting context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: u64,
    pub request: BrowserRequest,
}

/// Answer sent back by the hosting context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BrowserReply {
    Tabs { tabs: Vec<TabInfo> },
    Tab { tab: TabInfo },
    #[serde(rename_all = "camelCase")]
    Captured { data_url: String },
    Done,
    /// `kind` is `"permission"`, `"notFound"`, or anything else for a
    /// generic runtime error.
    Error { kind: String, message: String },
}

impl BrowserReply {
    fn into_result(self) -> Result<BrowserReply, BrowserError> {
        match self {
            BrowserReply::Error { kind, message } => Err(match kind.as_str() {
                "permission" => BrowserError::PermissionDenied(message),
                "notFound" => BrowserError::NotFound(message),
                _ => BrowserError::Api(message),
            }),
            other => Ok(other),
        }
    }
}

/// How long a browser call waits for the hosting context to answer.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

type Pending = Mutex<HashMap<u64, oneshot::Sender<BrowserReply>>>;

pub struct RuntimeBridge {
    outbound: mpsc::UnboundedSender<BridgeRequest>,
    pending: Pending,
    next_id: AtomicU64,
    reply_timeout: Duration,
}

/// Removes a waiter from `pending` however its call ends: answered,
/// timed out, or dropped mid-await.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

impl RuntimeBridge {
    /// Create a bridge and the receiver the host drains to perform requests.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: tx,
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                reply_timeout: DEFAULT_REPLY_TIMEOUT,
            },
            rx,
        )
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Deliver the reply for request `id`. Returns `false` when nothing
    /// was waiting for it (already answered, timed out, or the caller went
    /// away).
    pub fn resolve(&self, id: u64, reply: BrowserReply) -> bool {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        match waiter {
            Some(tx) => tx.send(reply).is_ok(),
            None => {
                log::warn!("Bridge: reply for unknown request id {}", id);
                false
            }
        }
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn call(&self, request: BrowserRequest) -> Result<BrowserReply, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        log::debug!("Bridge: request {} -> {:?}", id, request);
        if self.outbound.send(BridgeRequest { id, request }).is_err() {
            return Err(BrowserError::Disconnected);
        }

        let reply = match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(BrowserError::Disconnected),
            Err(_) => {
                log::warn!("Bridge: request {} got no reply in {:?}", id, self.reply_timeout);
                return Err(BrowserError::Timeout(self.reply_timeout));
            }
        };
        reply.into_result()
    }
}

fn unexpected(reply: BrowserReply) -> BrowserError {
    BrowserError::Api(format!("unexpected reply from browser runtime: {:?}", reply))
}

#[async_trait]
impl BrowserApi for RuntimeBridge {
    async fn query_tabs(&self, query: TabQuery) -> Result<Vec<TabInfo>, BrowserError> {
        match self.call(BrowserRequest::QueryTabs { query }).await? {
            BrowserReply::Tabs { tabs } => Ok(tabs),
            other => Err(unexpected(other)),
        }
    }

    async fn activate_tab(&self, tab_id: i64) -> Result<(), BrowserError> {
        match self.call(BrowserRequest::ActivateTab { tab_id }).await? {
            BrowserReply::Done | BrowserReply::Tab { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn create_tab(&self, url: &str) -> Result<TabInfo, BrowserError> {
        let request = BrowserRequest::CreateTab {
            url: url.to_string(),
        };
        match self.call(request).await? {
            BrowserReply::Tab { tab } => Ok(tab),
            other => Err(unexpected(other)),
        }
    }

    async fn capture_visible_tab(&self, window_id: i64) -> Result<String, BrowserError> {
        match self.call(BrowserRequest::CaptureVisibleTab { window_id }).await? {
            BrowserReply::Captured { data_url } => Ok(data_url),
            other => Err(unexpected(other)),
        }
    }
}
