use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::executor::NotificationError;
use crate::notification_service::MessengerService;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API messenger
pub struct TelegramService {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramService {
    /// Create a new Telegram messenger for one chat
    pub fn new(bot_token: impl Into<String>, chat_id: i64) -> Result<Self, NotificationError> {
        Self::with_api_base(TELEGRAM_API_BASE, bot_token, chat_id)
    }

    /// Same as `new`, against a different Bot API host
    pub fn with_api_base(
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: i64,
    ) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_id,
        })
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }
}

#[async_trait]
impl MessengerService for TelegramService {
    async fn send_message(&self, text: &str) -> Result<String, NotificationError> {
        debug!("Sending Telegram message to chat {}", self.chat_id);

        let request = SendMessageRequest {
            chat_id: self.chat_id,
            text,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.send_message_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let body: TelegramResponse = response.json().await.map_err(|e| {
            NotificationError::Telegram(format!("Unreadable reply (HTTP {}): {}", status, e))
        })?;

        if !body.ok {
            return Err(NotificationError::Telegram(
                body.description
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            ));
        }

        let message_id = body
            .result
            .map(|sent| sent.message_id.to_string())
            .unwrap_or_default();

        info!("Telegram message {} delivered", message_id);
        Ok(message_id)
    }
}

/// Mock messenger for development/testing
pub struct MockMessengerService {
    sent: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MockMessengerService {
    /// Create a mock that accepts every message
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Make subsequent sends fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages delivered so far
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessengerService for MockMessengerService {
    async fn send_message(&self, text: &str) -> Result<String, NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Telegram("mock failure".to_string()));
        }

        info!("💬 [MOCK MESSENGER] {}", text);

        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotificationError::Transport("mock messenger poisoned".to_string()))?;
        sent.push(text.to_string());
        Ok(format!("mock-message-{}", sent.len()))
    }
}
