use async_trait::async_trait;
use tracing::info;

use super::Notifier;
use crate::utils::error::Result;

/// Writes notifications to the log instead of sending them anywhere.
/// Used when no bot token is configured or with `--console`.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn name(&self) -> &str {
        "console"
    }

    async fn send_text(&self, destination: &str, text: &str) -> Result<()> {
        info!(target: "mercari_watcher::notify", destination, "\n{}", text);
        Ok(())
    }

    async fn send_photo(&self, destination: &str, caption: &str, image: Vec<u8>) -> Result<()> {
        info!(
            target: "mercari_watcher::notify",
            destination,
            bytes = image.len(),
            "[photo] {}",
            caption
        );
        Ok(())
    }
}
