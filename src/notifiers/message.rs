use crate::models::{format_yen, ItemRecord, Query};

const NOT_AVAILABLE: &str = "N/A";

/// Body of the per-item alert.
pub fn item_alert(query: &Query, record: &ItemRecord, stale_rate: bool) -> String {
    let yen = record
        .price_jpy
        .map(format_yen)
        .unwrap_or_else(|| format!("¥{}", NOT_AVAILABLE));

    let euro = match record.price_eur {
        Some(eur) if stale_rate => format!("€{:.2} (stale rate)", eur),
        Some(eur) => format!("€{:.2}", eur),
        None => format!("€{}", NOT_AVAILABLE),
    };

    format!(
        "✨ New Mercari Listing! ✨\n\n\
         🔍 Query: '{}'\n\
         📝 {}\n\
         💰 {} / {}\n\
         🔗 {}\n\
         ⏰ Found: {}",
        query,
        record.display_title(),
        yen,
        euro,
        record.url,
        record.first_seen_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

pub fn image_url_fallback(image_url: &str) -> String {
    format!("Image URL: {}", image_url)
}

pub fn startup(queries: &[Query]) -> String {
    let list = queries
        .iter()
        .map(|q| format!("• {}", q))
        .collect::<Vec<_>>()
        .join("\n");
    format!("🤖 Mercari tracker starting, watching {} queries:\n{}", queries.len(), list)
}

pub fn stopped() -> String {
    "🤖 Mercari tracker stopped manually.".to_string()
}

pub fn critical(error: &dyn std::fmt::Display) -> String {
    format!("🚨 CRITICAL ERROR: Mercari tracker stopped!\n{}", error)
}

pub fn sort_failed(query: &Query, error: &dyn std::fmt::Display) -> String {
    format!(
        "⚠️ Could not sort results by newest for '{}'. Results would not be newest-first, query skipped this round.\n{}",
        query, error
    )
}

pub fn stage_failed(query: &Query, stage: &str, error: &dyn std::fmt::Display) -> String {
    format!("❌ Query '{}' failed while {}: {}", query, stage, error)
}

pub fn rate_unavailable(stale: bool) -> String {
    if stale {
        "💱 Exchange rate refresh failed, using the last known rate.".to_string()
    } else {
        "💱 Exchange rate unavailable, euro prices will show N/A.".to_string()
    }
}

pub fn search_complete(query: &Query, found: usize) -> String {
    format!("🔎 Search complete for '{}'. Found {} valid items.", query, found)
}

pub fn cards_discarded(query: &Query, discarded: usize, seen: usize) -> String {
    format!(
        "🧩 '{}': {} of {} result cards had no item id and were skipped.",
        query, discarded, seen
    )
}
