//! Shared fakes for integration tests. Deterministic: no browser, no
//! network, no microphone.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use tabsight_lib::ai::{AiError, AssistantBackend, BackendReply};
use tabsight_lib::browser::{BrowserApi, BrowserError, TabInfo, TabQuery};

/// A browser call as seen by the fake.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Query(TabQuery),
    Activate(i64),
    Create(String),
    Capture(i64),
}

impl Call {
    /// Calls that change browser state or read pixels.
    pub fn is_operation(&self) -> bool {
        !matches!(self, Call::Query(_))
    }
}

pub struct FakeBrowser {
    pub tabs: Mutex<Vec<TabInfo>>,
    pub calls: Mutex<Vec<Call>>,
    pub fail_with: Mutex<Option<BrowserError>>,
    pub capture_data: String,
}

impl FakeBrowser {
    pub fn with_tabs(tabs: Vec<TabInfo>) -> Self {
        Self {
            tabs: Mutex::new(tabs),
            calls: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
            capture_data: png_data_url(4, 4),
        }
    }

    pub fn failing(err: BrowserError) -> Self {
        let b = Self::with_tabs(Vec::new());
        *b.fail_with.lock().unwrap() = Some(err);
        b
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_operation).collect()
    }

    fn record(&self, call: Call) -> Result<(), BrowserError> {
        self.calls.lock().unwrap().push(call);
        match self.fail_with.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub fn tab(id: i64, title: &str, url: &str) -> TabInfo {
    TabInfo {
        id,
        window_id: 1,
        title: title.into(),
        url: url.into(),
        active: false,
    }
}

pub fn active_tab(id: i64, title: &str, url: &str) -> TabInfo {
    TabInfo {
        active: true,
        ..tab(id, title, url)
    }
}

#[async_trait]
impl BrowserApi for FakeBrowser {
    async fn query_tabs(&self, query: TabQuery) -> Result<Vec<TabInfo>, BrowserError> {
        self.record(Call::Query(query))?;
        let tabs = self.tabs.lock().unwrap().clone();
        Ok(tabs
            .into_iter()
            .filter(|t| !query.active || t.active)
            .collect())
    }

    async fn activate_tab(&self, tab_id: i64) -> Result<(), BrowserError> {
        self.record(Call::Activate(tab_id))
    }

    async fn create_tab(&self, url: &str) -> Result<TabInfo, BrowserError> {
        self.record(Call::Create(url.to_string()))?;
        Ok(tab(999, "New Tab", url))
    }

    async fn capture_visible_tab(&self, window_id: i64) -> Result<String, BrowserError> {
        self.record(Call::Capture(window_id))?;
        Ok(self.capture_data.clone())
    }
}

/// Canned backend that records what it was sent.
pub struct FakeBackend {
    pub reply: Mutex<Option<BackendReply>>,
    pub answer: String,
    /// When set, `analyze` answers with an HTTP 503.
    pub fail_analyze: AtomicBool,
    pub prompts: Mutex<Vec<String>>,
    pub image_batches: Mutex<Vec<Vec<String>>>,
}

impl FakeBackend {
    pub fn replying(reply: BackendReply) -> Self {
        Self {
            reply: Mutex::new(Some(reply)),
            answer: "It is a test page.".into(),
            fail_analyze: AtomicBool::new(false),
            prompts: Mutex::new(Vec::new()),
            image_batches: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AssistantBackend for FakeBackend {
    async fn analyze(&self, prompt: &str, images: &[String]) -> Result<String, AiError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.image_batches.lock().unwrap().push(images.to_vec());
        if self.fail_analyze.load(Ordering::SeqCst) {
            return Err(AiError::Backend {
                status: 503,
                body: "vision model unavailable".into(),
            });
        }
        Ok(self.answer.clone())
    }

    async fn interpret(&self, prompt: &str) -> Result<BackendReply, AiError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AiError::ConnectionError("no reply configured".into()))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// A solid-colour PNG as a `data:image/png;base64,` URL.
pub fn png_data_url(width: u32, height: u32) -> String {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([30, 144, 255, 255]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(buf.into_inner())
    )
}
