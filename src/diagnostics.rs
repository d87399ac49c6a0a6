use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::models::Query;
use crate::notifiers::{message, Pacer};
use crate::scraper::PageDriver;

/// What a capture managed to write to disk.
#[derive(Debug, Default, Clone)]
pub struct Capture {
    pub screenshot_path: Option<PathBuf>,
    pub page_path: Option<PathBuf>,
}

/// Saves the browser state (screenshot plus raw markup) when a cycle stage fails.
pub struct Diagnostics {
    screenshot_dir: PathBuf,
    page_log_dir: PathBuf,
}

pub fn capture_name(label: &str, query: &Query) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}",
        label,
        query.slug(),
        Utc::now().format("%Y%m%d_%H%M%S"),
        &id[..8]
    )
}

fn write_file(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}

impl Diagnostics {
    pub fn new(screenshot_dir: impl Into<PathBuf>, page_log_dir: impl Into<PathBuf>) -> Self {
        Self {
            screenshot_dir: screenshot_dir.into(),
            page_log_dir: page_log_dir.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.screenshot_dir.clone(), config.page_log_dir.clone())
    }

    pub fn error_dir(&self) -> PathBuf {
        self.screenshot_dir.join("errors")
    }

    pub fn search_dir(&self) -> PathBuf {
        self.screenshot_dir.join("search_results")
    }

    /// Verbose mode only: screenshots the results page after extraction and
    /// forwards it with a short summary.
    pub async fn snapshot_results(
        &self,
        driver: &dyn PageDriver,
        pacer: &mut Pacer,
        query: &Query,
        found: usize,
    ) -> Option<PathBuf> {
        if !pacer.verbose() {
            return None;
        }

        let png = match driver.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                warn!(query = %query, error = %e, "Could not capture results screenshot");
                return None;
            }
        };

        let name = capture_name("search", query);
        let path = match write_file(&self.search_dir(), &format!("{}.png", name), &png) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "Could not save results screenshot");
                None
            }
        };

        pacer.debug_photo(&message::search_complete(query, found), png).await;
        path
    }

    /// Best effort: every step that fails is logged and skipped. In verbose
    /// mode the screenshot (or, failing that, the message alone) is forwarded.
    pub async fn capture(
        &self,
        driver: &dyn PageDriver,
        pacer: &mut Pacer,
        label: &str,
        query: &Query,
        message: &str,
    ) -> Capture {
        let name = capture_name(label, query);
        let mut capture = Capture::default();

        let screenshot = match driver.screenshot().await {
            Ok(png) => {
                match write_file(&self.error_dir(), &format!("{}.png", name), &png) {
                    Ok(path) => capture.screenshot_path = Some(path),
                    Err(e) => warn!(error = %e, "Could not save diagnostic screenshot"),
                }
                Some(png)
            }
            Err(e) => {
                warn!(error = %e, "Could not capture diagnostic screenshot");
                None
            }
        };

        match driver.page_source().await {
            Ok(html) => match write_file(&self.page_log_dir, &format!("{}.html", name), html.as_bytes()) {
                Ok(path) => capture.page_path = Some(path),
                Err(e) => warn!(error = %e, "Could not save page source"),
            },
            Err(e) => warn!(error = %e, "Could not read page source"),
        }

        info!(
            query = %query,
            label,
            screenshot = ?capture.screenshot_path,
            page = ?capture.page_path,
            "Saved diagnostic capture"
        );

        match screenshot {
            Some(png) => pacer.debug_photo(message, png).await,
            None => pacer.debug_text(message).await,
        }

        capture
    }
}
