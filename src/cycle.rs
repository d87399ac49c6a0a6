use chrono::Utc;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, NotifyOrder};
use crate::currency::{CurrencyCache, RateReading};
use crate::diagnostics::Diagnostics;
use crate::extractor::{
    detect_block_page, detect_captcha, is_no_results_page, ListingExtractor, CARD_SELECTOR,
    CONTAINER_SELECTOR,
};
use crate::models::{ExtractedItem, ItemRecord, Query};
use crate::notifiers::{message, Pacer};
use crate::scraper::PageDriver;
use crate::store::KnownItemStore;
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Fetching,
    Sorting,
    WaitingForContent,
    Extracting,
    Diffing,
    Notifying,
    Persisting,
    Done,
    Failed,
}

impl CycleStage {
    fn describe(&self) -> &'static str {
        match self {
            CycleStage::Fetching => "loading the search page",
            CycleStage::Sorting => "sorting by newest",
            CycleStage::WaitingForContent => "waiting for results",
            CycleStage::Extracting => "reading result cards",
            CycleStage::Diffing => "comparing with known items",
            CycleStage::Notifying => "sending alerts",
            CycleStage::Persisting => "saving known items",
            CycleStage::Done => "done",
            CycleStage::Failed => "failed",
        }
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::Fetching => "FETCHING",
            CycleStage::Sorting => "SORTING",
            CycleStage::WaitingForContent => "WAITING_FOR_CONTENT",
            CycleStage::Extracting => "EXTRACTING",
            CycleStage::Diffing => "DIFFING",
            CycleStage::Notifying => "NOTIFYING",
            CycleStage::Persisting => "PERSISTING",
            CycleStage::Done => "DONE",
            CycleStage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A query cycle that stopped at `stage`.
#[derive(Debug, Error)]
#[error("query '{query}' failed at {stage}: {source}")]
pub struct CycleError {
    pub stage: CycleStage,
    pub query: Query,
    pub source: AppError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub query: Query,
    pub extracted: usize,
    pub discarded: usize,
    pub partial: usize,
    pub new_items: usize,
    pub notified: usize,
    pub failed_notifications: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub sort_timeout: Duration,
    pub sort_settle: Duration,
    pub content_timeout: Duration,
    pub send_item_screenshots: bool,
    pub notify_order: NotifyOrder,
}

impl CycleSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sort_timeout: config.scraper.sort_timeout(),
            sort_settle: config.scraper.sort_settle(),
            content_timeout: config.scraper.content_timeout(),
            send_item_screenshots: config.notifications.send_item_screenshots,
            notify_order: config.notifications.notify_order,
        }
    }
}

type StageResult<T> = std::result::Result<T, (CycleStage, AppError)>;

trait AtStage<T> {
    fn at(self, stage: CycleStage) -> StageResult<T>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: CycleStage) -> StageResult<T> {
        self.map_err(|e| (stage, e))
    }
}

#[derive(Debug, Default)]
struct Delivery {
    notified: usize,
    failed: usize,
}

/// Runs one fetch, extract, diff, notify and persist pass per call.
pub struct QueryCycleRunner {
    driver: Box<dyn PageDriver>,
    extractor: ListingExtractor,
    store: KnownItemStore,
    currency: CurrencyCache,
    pacer: Pacer,
    diagnostics: Diagnostics,
    settings: CycleSettings,
}

impl QueryCycleRunner {
    pub fn new(
        driver: Box<dyn PageDriver>,
        extractor: ListingExtractor,
        store: KnownItemStore,
        currency: CurrencyCache,
        pacer: Pacer,
        diagnostics: Diagnostics,
        settings: CycleSettings,
    ) -> Self {
        Self {
            driver,
            extractor,
            store,
            currency,
            pacer,
            diagnostics,
            settings,
        }
    }

    pub fn store(&self) -> &KnownItemStore {
        &self.store
    }

    pub fn pacer_mut(&mut self) -> &mut Pacer {
        &mut self.pacer
    }

    pub fn driver(&self) -> &dyn PageDriver {
        self.driver.as_ref()
    }

    /// Looks the exchange rate up (respecting its TTL) and reports a
    /// degraded rate on the diagnostic channel.
    pub async fn refresh_rate(&mut self) -> Option<RateReading> {
        let reading = self.currency.rate().await;
        match reading {
            Some(r) if !r.stale => {}
            Some(_) => self.pacer.debug_text(&message::rate_unavailable(true)).await,
            None => self.pacer.debug_text(&message::rate_unavailable(false)).await,
        }
        reading
    }

    pub async fn run_query(&mut self, query: &Query) -> std::result::Result<CycleReport, CycleError> {
        let started = Instant::now();
        info!(query = %query, "Checking query");

        match self.run_stages(query, started).await {
            Ok(report) => {
                info!(
                    query = %query,
                    extracted = report.extracted,
                    new_items = report.new_items,
                    notified = report.notified,
                    failed_notifications = report.failed_notifications,
                    duration_ms = report.duration_ms,
                    "Query finished"
                );
                Ok(report)
            }
            Err((stage, source)) => {
                self.report_failure(query, stage, &source).await;
                Err(CycleError {
                    stage,
                    query: query.clone(),
                    source,
                })
            }
        }
    }

    async fn run_stages(&mut self, query: &Query, started: Instant) -> StageResult<CycleReport> {
        let cards = self.load_cards(query).await?;

        enter(query, CycleStage::Extracting);
        let extraction = self.extractor.extract(&cards);
        if extraction.discarded > 0 {
            self.pacer
                .debug_text(&message::cards_discarded(query, extraction.discarded, extraction.cards_seen()))
                .await;
        }
        self.diagnostics
            .snapshot_results(self.driver.as_ref(), &mut self.pacer, query, extraction.items.len())
            .await;

        enter(query, CycleStage::Diffing);
        let mut new_items = self.store.diff(query, &extraction.items);
        if self.settings.notify_order == NotifyOrder::OldestFirst {
            new_items.reverse();
        }
        if new_items.is_empty() {
            info!(query = %query, seen = extraction.items.len(), "No new items");
        } else {
            info!(query = %query, count = new_items.len(), "Found new items");
        }

        enter(query, CycleStage::Notifying);
        let (records, delivery) = self.notify(query, &new_items).await;

        enter(query, CycleStage::Persisting);
        self.store.commit(query, records).at(CycleStage::Persisting)?;

        enter(query, CycleStage::Done);
        Ok(CycleReport {
            query: query.clone(),
            extracted: extraction.items.len(),
            discarded: extraction.discarded,
            partial: extraction.partial,
            new_items: new_items.len(),
            notified: delivery.notified,
            failed_notifications: delivery.failed,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Fetching, sorting and waiting; yields the raw result cards.
    async fn load_cards(&mut self, query: &Query) -> StageResult<Vec<String>> {
        enter(query, CycleStage::Fetching);
        let url = self.extractor.search_url(query.as_str()).at(CycleStage::Fetching)?;
        self.driver.navigate(url.as_str()).await.at(CycleStage::Fetching)?;
        let title = self.driver.page_title().await.at(CycleStage::Fetching)?;
        let html = self.driver.page_source().await.at(CycleStage::Fetching)?;
        if let Some(reason) = detect_block_page(&title, &html) {
            return Err((CycleStage::Fetching, AppError::Blocked { reason }));
        }

        enter(query, CycleStage::Sorting);
        if let Err(e) = self.driver.apply_sort(self.settings.sort_timeout).await {
            if self.shows_no_results().await {
                info!(query = %query, "No listings for query");
                return Ok(Vec::new());
            }
            return Err((CycleStage::Sorting, e));
        }
        sleep(self.settings.sort_settle).await;

        enter(query, CycleStage::WaitingForContent);
        let waited = self
            .driver
            .wait_for_selector(CONTAINER_SELECTOR, self.settings.content_timeout)
            .await;
        let html = self.driver.page_source().await.at(CycleStage::WaitingForContent)?;
        if detect_captcha(&html) {
            return Err((
                CycleStage::WaitingForContent,
                AppError::Blocked {
                    reason: "CAPTCHA challenge on results page".to_string(),
                },
            ));
        }
        if let Err(e) = waited {
            if is_no_results_page(&html) {
                info!(query = %query, "No listings for query");
                return Ok(Vec::new());
            }
            return Err((CycleStage::WaitingForContent, e));
        }

        self.driver.get_cards(CARD_SELECTOR).await.at(CycleStage::Extracting)
    }

    async fn shows_no_results(&self) -> bool {
        self.driver
            .page_source()
            .await
            .map(|html| is_no_results_page(&html))
            .unwrap_or(false)
    }

    /// Sends one alert per new item. Failed sends are logged and counted;
    /// every item still gets a record.
    async fn notify(&mut self, query: &Query, new_items: &[ExtractedItem]) -> (Vec<ItemRecord>, Delivery) {
        let mut delivery = Delivery::default();
        if new_items.is_empty() {
            return (Vec::new(), delivery);
        }

        let rate = self.refresh_rate().await;
        let mut records = Vec::with_capacity(new_items.len());

        for item in new_items {
            let price_eur = match (item.price_jpy, rate) {
                (Some(yen), Some(reading)) => Some(reading.convert(yen)),
                _ => None,
            };
            let record = ItemRecord::from_extracted(item, price_eur, Utc::now());
            let stale = rate.is_some_and(|r| r.stale);

            debug!(query = %query, item_id = %item.id, "Sending alert");
            match self.pacer.send_text(&message::item_alert(query, &record, stale)).await {
                Ok(()) => {
                    delivery.notified += 1;
                    if self.settings.send_item_screenshots {
                        self.send_item_picture(item).await;
                    }
                }
                Err(e) => {
                    delivery.failed += 1;
                    warn!(query = %query, item_id = %item.id, error = %e, "Alert not delivered");
                }
            }
            records.push(record);
        }

        (records, delivery)
    }

    async fn send_item_picture(&mut self, item: &ExtractedItem) {
        let sent = match self.driver.screenshot_card(CARD_SELECTOR, item.card_index).await {
            Ok(png) => self.pacer.send_photo("", png).await,
            Err(e) => {
                debug!(item_id = %item.id, error = %e, "Card screenshot unavailable");
                match &item.image_url {
                    Some(url) => self.pacer.send_text(&message::image_url_fallback(url)).await,
                    None => Ok(()),
                }
            }
        };
        if let Err(e) = sent {
            warn!(item_id = %item.id, error = %e, "Item picture not delivered");
        }
    }

    async fn report_failure(&mut self, query: &Query, stage: CycleStage, source: &AppError) {
        error!(query = %query, stage = %stage, error = %source, "Query cycle failed");
        enter(query, CycleStage::Failed);

        let text = match source {
            AppError::Sort(_) => message::sort_failed(query, source),
            _ => message::stage_failed(query, stage.describe(), source),
        };

        let page_stage = matches!(
            stage,
            CycleStage::Fetching | CycleStage::Sorting | CycleStage::WaitingForContent
        );
        if page_stage && source.wants_capture() {
            let label = match source {
                AppError::Sort(_) => "sort_failed",
                AppError::ContentTimeout { .. } => "content_timeout",
                _ => "blocked",
            };
            self.diagnostics
                .capture(self.driver.as_ref(), &mut self.pacer, label, query, &text)
                .await;
        } else {
            self.pacer.debug_text(&text).await;
        }
    }
}

fn enter(query: &Query, stage: CycleStage) {
    debug!(query = %query, stage = %stage, "Entering stage");
}
