use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A listing as read off a results card, before it is priced or stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedItem {
    pub id: String,
    pub title: Option<String>,
    pub price_jpy: Option<u64>,
    pub url: String,
    pub image_url: Option<String>,
    /// Position of the card on the results page.
    pub card_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemRecord {
    pub id: String,
    pub title: Option<String>,
    pub price_jpy: Option<u64>,
    pub price_eur: Option<Decimal>,
    pub url: String,
    pub image_url: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

impl ExtractedItem {
    pub fn is_partial(&self) -> bool {
        self.title.is_none() || self.price_jpy.is_none() || self.image_url.is_none()
    }
}

impl ItemRecord {
    pub fn from_extracted(item: &ExtractedItem, price_eur: Option<Decimal>, seen_at: DateTime<Utc>) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
            price_jpy: item.price_jpy,
            price_eur,
            url: item.url.clone(),
            image_url: item.image_url.clone(),
            first_seen_at: seen_at,
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(untitled listing)")
    }
}

/// Formats whole yen with thousands separators, e.g. `¥15,000`.
pub fn format_yen(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    out.push('¥');
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
