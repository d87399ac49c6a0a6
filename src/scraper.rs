use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use scraper::{Html, Selector};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::utils::error::{AppError, Result};

pub const SORT_SELECTOR: &str = "select[name='sortOrder']";
pub const SORT_NEWEST_VALUE: &str = "created_time:desc";

/// The browser stays alive between rounds, which can be many minutes apart.
const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Operations the query cycle needs from a browser page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn page_title(&self) -> Result<String>;

    async fn page_source(&self) -> Result<String>;

    /// Switches the result ordering to newest first.
    async fn apply_sort(&self, timeout: Duration) -> Result<()>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Outer HTML of every element matching `selector`, in document order.
    async fn get_cards(&self, selector: &str) -> Result<Vec<String>>;

    /// PNG of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// PNG of the `index`th element matching `selector`.
    async fn screenshot_card(&self, selector: &str, index: usize) -> Result<Vec<u8>>;
}

/// Outer HTML of the elements matching `selector` in `html`.
pub fn select_outer_html(html: &str, selector: &str) -> Result<Vec<String>> {
    let selector = Selector::parse(selector).map_err(|e| AppError::Parse {
        message: format!("invalid selector '{}': {:?}", selector, e),
    })?;
    let document = Html::parse_document(html);
    Ok(document.select(&selector).map(|el| el.html()).collect())
}

fn sort_script() -> String {
    format!(
        r#"
        (function() {{
            const select = document.querySelector("{selector}");
            if (!select) {{ return "missing-select"; }}
            const option = Array.from(select.options).find(o => o.value === "{value}");
            if (!option) {{ return "missing-option"; }}
            const setter = Object.getOwnPropertyDescriptor(HTMLSelectElement.prototype, "value").set;
            setter.call(select, "{value}");
            select.dispatchEvent(new Event("change", {{ bubbles: true }}));
            return "ok";
        }})()
        "#,
        selector = SORT_SELECTOR.replace('"', "\\\""),
        value = SORT_NEWEST_VALUE,
    )
}

/// Single long-lived headless Chrome tab.
pub struct ChromeDriver {
    // Dropping the browser closes the Chrome process.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeDriver {
    pub fn launch(config: &ScraperConfig) -> Result<Self> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(false)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(BROWSER_IDLE_TIMEOUT)
            .args(vec![
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--disable-popup-blocking"),
                OsStr::new("--disable-notifications"),
                OsStr::new("--lang=ja-JP"),
            ])
            .build()
            .map_err(|e| AppError::Browser(format!("invalid launch options: {}", e)))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options)
            .map_err(|e| AppError::Browser(format!("failed to launch Chrome: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| AppError::Browser(format!("failed to open tab: {}", e)))?;

        tab.set_default_timeout(Duration::from_secs(config.page_load_timeout_secs));
        tab.set_user_agent(&config.user_agent, Some("ja-JP,ja;q=0.9,en-US;q=0.8"), None)
            .map_err(|e| AppError::Browser(format!("failed to set user agent: {}", e)))?;

        info!(headless = config.headless, "Browser ready");
        Ok(Self { _browser: browser, tab })
    }

    /// Runs a blocking DevTools call off the async executor.
    async fn with_tab<T, F, E>(&self, op: F, map_err: E) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
        E: FnOnce(anyhow::Error) -> AppError,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || op(&tab))
            .await
            .map_err(|e| AppError::Internal(format!("browser task failed: {}", e)))?
            .map_err(map_err)
    }
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        debug!(url, "Navigating");
        let target = url.to_string();
        self.with_tab(
            move |tab| {
                tab.navigate_to(&target)?.wait_until_navigated()?;
                Ok(())
            },
            |e| AppError::Fetch {
                url: url.to_string(),
                message: e.to_string(),
            },
        )
        .await
    }

    async fn page_title(&self) -> Result<String> {
        self.with_tab(|tab| tab.get_title(), |e| AppError::Browser(e.to_string()))
            .await
    }

    async fn page_source(&self) -> Result<String> {
        self.with_tab(|tab| tab.get_content(), |e| AppError::Browser(e.to_string()))
            .await
    }

    async fn apply_sort(&self, timeout: Duration) -> Result<()> {
        let script = sort_script();
        let outcome = self
            .with_tab(
                move |tab| {
                    tab.wait_for_element_with_custom_timeout(SORT_SELECTOR, timeout)?;
                    let result = tab.evaluate(&script, false)?;
                    Ok(result
                        .value
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default())
                },
                |e| AppError::Sort(format!("sort control '{}' not usable: {}", SORT_SELECTOR, e)),
            )
            .await?;

        match outcome.as_str() {
            "ok" => Ok(()),
            "missing-option" => Err(AppError::Sort(format!(
                "no '{}' option in sort control",
                SORT_NEWEST_VALUE
            ))),
            other => Err(AppError::Sort(format!("sort script returned '{}'", other))),
        }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let target = selector.to_string();
        self.with_tab(
            move |tab| {
                tab.wait_for_element_with_custom_timeout(&target, timeout)?;
                Ok(())
            },
            |e| {
                debug!(selector, error = %e, "Wait for selector failed");
                AppError::ContentTimeout {
                    selector: selector.to_string(),
                    waited_secs: timeout.as_secs(),
                }
            },
        )
        .await
    }

    async fn get_cards(&self, selector: &str) -> Result<Vec<String>> {
        let html = self.page_source().await?;
        select_outer_html(&html, selector)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.with_tab(
            |tab| tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true),
            |e| AppError::Browser(format!("screenshot failed: {}", e)),
        )
        .await
    }

    async fn screenshot_card(&self, selector: &str, index: usize) -> Result<Vec<u8>> {
        let target = selector.to_string();
        self.with_tab(
            move |tab| {
                let elements = tab.find_elements(&target)?;
                let element = elements
                    .get(index)
                    .ok_or_else(|| anyhow::anyhow!("no card at index {}", index))?;
                element.scroll_into_view()?;
                element.capture_screenshot(CaptureScreenshotFormatOption::Png)
            },
            |e| AppError::Browser(format!("card screenshot failed: {}", e)),
        )
        .await
    }
}
