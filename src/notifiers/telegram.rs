use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::Notifier;
use crate::config::TelegramConfig;
use crate::utils::error::{AppError, Result};

const CHANNEL: &str = "telegram";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Telegram Bot API client (`sendMessage` / `sendPhoto`).
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// `None` when no bot token is configured.
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>> {
        match config.token.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(token) => Self::new(&config.api_base, token).map(Some),
            None => Ok(None),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn check(response: Response) -> Result<()> {
        let status = response.status();
        let body: Option<ApiResponse> = response.json().await.ok();

        if status.is_success() && body.as_ref().is_none_or(|b| b.ok) {
            return Ok(());
        }

        let description = body
            .as_ref()
            .and_then(|b| b.description.clone())
            .unwrap_or_else(|| status.to_string());
        let retry_after = body
            .as_ref()
            .and_then(|b| b.parameters.as_ref())
            .and_then(|p| p.retry_after)
            .filter(|_| status == StatusCode::TOO_MANY_REQUESTS);

        Err(AppError::Notification {
            channel: CHANNEL.to_string(),
            message: description,
            retry_after,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        CHANNEL
    }

    async fn send_text(&self, destination: &str, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": destination,
            "text": text,
            "disable_web_page_preview": false,
        });

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::notification(CHANNEL, e.to_string()))?;

        Self::check(response).await?;
        debug!(chars = text.chars().count(), "Telegram message sent");
        Ok(())
    }

    async fn send_photo(&self, destination: &str, caption: &str, image: Vec<u8>) -> Result<()> {
        let size = image.len();
        let photo = Part::bytes(image)
            .file_name("screenshot.png")
            .mime_str("image/png")?;
        let mut form = Form::new()
            .text("chat_id", destination.to_string())
            .part("photo", photo);
        if !caption.is_empty() {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::notification(CHANNEL, e.to_string()))?;

        Self::check(response).await?;
        debug!(bytes = size, "Telegram photo sent");
        Ok(())
    }
}
