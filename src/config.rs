use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub scraper: ScraperConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationsConfig,
    pub currency: CurrencyConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub chat_id: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub base_url: String,
    pub user_agent: String,
    pub headless: bool,
    pub chrome_path: Option<String>,
    pub page_load_timeout_secs: u64,
    pub sort_timeout_secs: u64,
    pub content_timeout_secs: u64,
    pub sort_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_min_secs: u64,
    pub interval_max_secs: u64,
    pub inter_query_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotifyOrder {
    /// Page order, which is newest first once sorting succeeded.
    #[default]
    Page,
    OldestFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub send_debug_messages: bool,
    pub send_item_screenshots: bool,
    pub alert_delay_ms: u64,
    pub notify_order: NotifyOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
    pub api_url: String,
    pub base: String,
    pub quote: String,
    pub ttl_seconds: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub known_items_file: PathBuf,
    pub screenshot_dir: PathBuf,
    pub page_log_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            chat_id: String::new(),
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://jp.mercari.com".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36".to_string(),
            headless: true,
            chrome_path: None,
            page_load_timeout_secs: 60,
            sort_timeout_secs: 15,
            content_timeout_secs: 20,
            sort_settle_ms: 5000,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_min_secs: 300,
            interval_max_secs: 600,
            inter_query_delay_ms: 5000,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            send_debug_messages: true,
            send_item_screenshots: false,
            alert_delay_ms: 3000,
            notify_order: NotifyOrder::Page,
        }
    }
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.frankfurter.app".to_string(),
            base: "JPY".to_string(),
            quote: "EUR".to_string(),
            ttl_seconds: 3600,
            request_timeout_secs: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            known_items_file: PathBuf::from("data/known_items.json"),
            screenshot_dir: PathBuf::from("screenshots"),
            page_log_dir: PathBuf::from("logs/pages"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl ScraperConfig {
    pub fn sort_timeout(&self) -> Duration {
        Duration::from_secs(self.sort_timeout_secs)
    }

    pub fn content_timeout(&self) -> Duration {
        Duration::from_secs(self.content_timeout_secs)
    }

    pub fn sort_settle(&self) -> Duration {
        Duration::from_millis(self.sort_settle_ms)
    }
}

impl AppConfig {
    /// Layers `path`, an optional `config/local` and `MERCARI__*` environment
    /// variables, in that order.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables, e.g. MERCARI__TELEGRAM__TOKEN
            .add_source(Environment::with_prefix("MERCARI").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        // Add Chrome path from environment if not set
        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = std::env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if Url::parse(&self.telegram.api_base).is_err() {
            return Err(ConfigError::Message("Invalid telegram.api_base URL".into()));
        }

        if self.telegram.token.is_some() && self.telegram.chat_id.trim().is_empty() {
            return Err(ConfigError::Message(
                "telegram.chat_id is required when a token is configured".into(),
            ));
        }

        if Url::parse(&self.scraper.base_url).is_err() {
            return Err(ConfigError::Message("Invalid scraper.base_url URL".into()));
        }

        if self.scraper.user_agent.trim().is_empty() {
            return Err(ConfigError::Message("scraper.user_agent must not be empty".into()));
        }

        if self.scraper.page_load_timeout_secs == 0
            || self.scraper.sort_timeout_secs == 0
            || self.scraper.content_timeout_secs == 0
        {
            return Err(ConfigError::Message("Scraper timeouts must be greater than 0".into()));
        }

        if self.scheduler.interval_max_secs == 0 {
            return Err(ConfigError::Message(
                "scheduler.interval_max_secs must be greater than 0".into(),
            ));
        }

        if self.scheduler.interval_min_secs > self.scheduler.interval_max_secs {
            return Err(ConfigError::Message(
                "scheduler.interval_min_secs cannot exceed interval_max_secs".into(),
            ));
        }

        if Url::parse(&self.currency.api_url).is_err() {
            return Err(ConfigError::Message("Invalid currency.api_url URL".into()));
        }

        if self.currency.ttl_seconds == 0 {
            return Err(ConfigError::Message("currency.ttl_seconds must be greater than 0".into()));
        }

        Ok(())
    }
}
