use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CurrencyConfig;
use crate::utils::error::{AppError, Result};

/// Source of exchange rates, e.g. an HTTP API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLookup: Send + Sync {
    async fn get_rate(&self, base: &str, quote: &str) -> Result<Decimal>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangeRate {
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateReading {
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
    /// Set when the refresh failed and an expired rate was handed out instead.
    pub stale: bool,
}

impl RateReading {
    pub fn convert(&self, amount: u64) -> Decimal {
        (Decimal::from(amount) * self.rate).round_dp(2)
    }
}

/// Single cached rate with refresh-on-expiry. One lookup per call at most.
pub struct CurrencyCache {
    lookup: Box<dyn RateLookup>,
    base: String,
    quote: String,
    ttl: Duration,
    current: Option<ExchangeRate>,
}

impl CurrencyCache {
    pub fn new(lookup: Box<dyn RateLookup>, base: &str, quote: &str, ttl: Duration) -> Self {
        Self {
            lookup,
            base: base.to_string(),
            quote: quote.to_string(),
            ttl,
            current: None,
        }
    }

    pub fn from_config(config: &CurrencyConfig, lookup: Box<dyn RateLookup>) -> Self {
        Self::new(lookup, &config.base, &config.quote, Duration::from_secs(config.ttl_seconds))
    }

    pub fn cached(&self) -> Option<ExchangeRate> {
        self.current
    }

    pub async fn rate(&mut self) -> Option<RateReading> {
        self.rate_at(Utc::now()).await
    }

    pub async fn rate_at(&mut self, now: DateTime<Utc>) -> Option<RateReading> {
        if let Some(current) = self.current {
            if self.is_fresh(&current, now) {
                return Some(RateReading {
                    rate: current.rate,
                    fetched_at: current.fetched_at,
                    stale: false,
                });
            }
        }

        debug!(base = %self.base, quote = %self.quote, "Refreshing exchange rate");
        match self.lookup.get_rate(&self.base, &self.quote).await {
            Ok(rate) => {
                info!(base = %self.base, quote = %self.quote, %rate, "Updated exchange rate");
                self.current = Some(ExchangeRate { rate, fetched_at: now });
                Some(RateReading {
                    rate,
                    fetched_at: now,
                    stale: false,
                })
            }
            Err(e) => {
                warn!(error = %e, has_previous = self.current.is_some(), "Exchange rate refresh failed");
                self.current.map(|previous| RateReading {
                    rate: previous.rate,
                    fetched_at: previous.fetched_at,
                    stale: true,
                })
            }
        }
    }

    fn is_fresh(&self, rate: &ExchangeRate, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(rate.fetched_at).to_std() {
            Ok(age) => age < self.ttl,
            // Clock moved backwards; the rate cannot be older than the TTL.
            Err(_) => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, Decimal>,
}

/// Looks rates up from the Frankfurter API (`/latest?from=JPY&to=EUR`).
pub struct FrankfurterLookup {
    client: Client,
    api_url: String,
}

impl FrankfurterLookup {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &CurrencyConfig) -> Result<Self> {
        Self::new(&config.api_url, Duration::from_secs(config.request_timeout_secs))
    }
}

#[async_trait]
impl RateLookup for FrankfurterLookup {
    async fn get_rate(&self, base: &str, quote: &str) -> Result<Decimal> {
        let url = format!("{}/latest", self.api_url);
        let response = self
            .client
            .get(&url)
            .query(&[("from", base), ("to", quote)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::CurrencyLookup(e.to_string()))?;

        let body: RatesResponse = response
            .json()
            .await
            .map_err(|e| AppError::CurrencyLookup(format!("unreadable response: {}", e)))?;

        body.rates
            .get(quote)
            .copied()
            .ok_or_else(|| AppError::CurrencyLookup(format!("no {} rate in response", quote)))
    }
}
