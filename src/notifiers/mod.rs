pub mod console;
pub mod message;
pub mod telegram;

pub use console::ConsoleNotifier;
pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::utils::error::Result;

/// Longest text a single Telegram message may carry.
pub const MAX_MESSAGE_CHARS: usize = 4096;
/// Longest photo caption Telegram accepts.
pub const MAX_CAPTION_CHARS: usize = 1024;

/// Outbound message channel (Telegram, console, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send_text(&self, destination: &str, text: &str) -> Result<()>;

    async fn send_photo(&self, destination: &str, caption: &str, image: Vec<u8>) -> Result<()>;
}

/// Splits `text` into chunks of at most `max_chars` characters.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

pub fn truncate_caption(caption: &str) -> String {
    caption.chars().take(MAX_CAPTION_CHARS).collect()
}

/// Wraps a notifier with a fixed minimum spacing between sends and the
/// channel's size limits.
pub struct Pacer {
    notifier: Box<dyn Notifier>,
    destination: String,
    delay: Duration,
    verbose: bool,
    last_send: Option<Instant>,
}

impl Pacer {
    pub fn new(notifier: Box<dyn Notifier>, destination: &str, delay: Duration, verbose: bool) -> Self {
        Self {
            notifier,
            destination: destination.to_string(),
            delay,
            verbose,
            last_send: None,
        }
    }

    pub fn channel(&self) -> &str {
        self.notifier.name()
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    async fn wait_turn(&mut self) {
        if let Some(last) = self.last_send {
            let next = last + self.delay;
            if next > Instant::now() {
                debug!(delay_ms = self.delay.as_millis() as u64, "Pausing before next message");
                sleep_until(next).await;
            }
        }
        self.last_send = Some(Instant::now());
    }

    /// Sends `text`, split into as many messages as the channel requires.
    /// Stops at the first chunk that fails.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            self.wait_turn().await;
            self.notifier.send_text(&self.destination, &chunk).await?;
        }
        Ok(())
    }

    pub async fn send_photo(&mut self, caption: &str, image: Vec<u8>) -> Result<()> {
        self.wait_turn().await;
        let caption = truncate_caption(caption);
        self.notifier.send_photo(&self.destination, &caption, image).await
    }

    /// Diagnostic text, sent only in verbose mode. Failures are logged.
    pub async fn debug_text(&mut self, text: &str) {
        if !self.verbose {
            return;
        }
        if let Err(e) = self.send_text(text).await {
            warn!(channel = self.channel(), error = %e, "Failed to send diagnostic message");
        }
    }

    pub async fn debug_photo(&mut self, caption: &str, image: Vec<u8>) {
        if !self.verbose {
            return;
        }
        if let Err(e) = self.send_photo(caption, image).await {
            warn!(channel = self.channel(), error = %e, "Failed to send diagnostic photo");
        }
    }
}
