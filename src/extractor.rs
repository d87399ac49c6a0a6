//! Turns rendered Mercari result cards into [`ExtractedItem`]s.
//!
//! Every field is read through an ordered chain of named strategies. The
//! first strategy that finds a value wins; when all of them come up empty the
//! field is left absent. Only a card without a derivable item id is dropped.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::models::ExtractedItem;
use crate::utils::error::{AppError, Result};

pub const CONTAINER_SELECTOR: &str = "#item-grid";
pub const CARD_SELECTOR: &str = "#item-grid > ul > li[data-testid='item-cell']";

const BLOCK_PAGE_TEXT: &[&str] = &[
    "アクセスが集中しています",
    "Access Denied",
    "リクエストが一時的にブロックされました",
];
const BLOCK_PAGE_SELECTORS: &[&str] = &["h1[class*='error']", "div#error-page"];
const NO_RESULTS_TEXT: &[&str] = &["出品された商品がありません", "該当する商品が見つかりません"];
const CAPTCHA_MARKERS: &[&str] = &["captcha", "recaptcha", "hcaptcha"];

type Probe<T> = Box<dyn Fn(ElementRef<'_>) -> Option<T> + Send + Sync>;

struct Strategy<T> {
    name: &'static str,
    probe: Probe<T>,
}

/// Ordered fallbacks for one card field.
struct FieldChain<T> {
    field: &'static str,
    strategies: Vec<Strategy<T>>,
}

impl<T> FieldChain<T> {
    fn new(field: &'static str) -> Self {
        Self {
            field,
            strategies: Vec::new(),
        }
    }

    fn then(mut self, name: &'static str, probe: Probe<T>) -> Self {
        self.strategies.push(Strategy { name, probe });
        self
    }

    fn resolve(&self, card: ElementRef<'_>) -> Option<T> {
        for (position, strategy) in self.strategies.iter().enumerate() {
            if let Some(value) = (strategy.probe)(card) {
                if position > 0 {
                    debug!(field = self.field, strategy = strategy.name, "Fallback strategy matched");
                }
                return Some(value);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub items: Vec<ExtractedItem>,
    /// Cards dropped because no item id could be derived.
    pub discarded: usize,
    /// Emitted cards that are missing at least one optional field.
    pub partial: usize,
}

impl Extraction {
    pub fn cards_seen(&self) -> usize {
        self.items.len() + self.discarded
    }
}

pub struct ListingExtractor {
    base_url: Url,
    id_pattern: Regex,
    link: FieldChain<String>,
    title: FieldChain<String>,
    price: FieldChain<u64>,
    image: FieldChain<String>,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::Parse {
        message: format!("Invalid CSS selector '{}': {:?}", css, e),
    })
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::Parse {
        message: format!("Invalid pattern '{}': {}", pattern, e),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

fn attr_probe(css: Selector, attr: &'static str) -> Probe<String> {
    Box::new(move |card: ElementRef<'_>| {
        card.select(&css)
            .filter_map(|el| el.value().attr(attr))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    })
}

fn image_probe(css: Selector) -> Probe<String> {
    Box::new(move |card: ElementRef<'_>| {
        card.select(&css).find_map(|img| {
            ["src", "data-src"]
                .iter()
                .filter_map(|attr| img.value().attr(attr))
                .map(str::trim)
                .find(|src| src.starts_with("http://") || src.starts_with("https://"))
                .map(str::to_string)
        })
    })
}

fn yen_text_probe(css: Selector, yen: YenParser, require_symbol: bool) -> Probe<u64> {
    Box::new(move |card: ElementRef<'_>| {
        card.select(&css).find_map(|el| {
            let text = element_text(el);
            if require_symbol && !text.contains(['¥', '￥']) {
                return None;
            }
            yen.parse(&text)
        })
    })
}

/// Reads integer yen amounts out of localized text such as `¥15,000` or `3,500円`.
#[derive(Clone)]
pub struct YenParser {
    symbol_first: Regex,
    suffix_first: Regex,
}

impl YenParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            symbol_first: regex(r"[¥￥]\s*(\d{1,3}(?:,\d{3})+|\d+)")?,
            suffix_first: regex(r"(\d{1,3}(?:,\d{3})+|\d+)\s*円")?,
        })
    }

    pub fn parse(&self, text: &str) -> Option<u64> {
        let captures = self
            .symbol_first
            .captures(text)
            .or_else(|| self.suffix_first.captures(text))?;
        captures.get(1)?.as_str().replace(',', "").parse().ok()
    }

    /// Last `N円` in the text. Thumbnail labels put the price after the
    /// title, and titles may themselves mention yen amounts.
    fn parse_suffixed(&self, text: &str) -> Option<u64> {
        let captures = self.suffix_first.captures_iter(text).last()?;
        captures.get(1)?.as_str().replace(',', "").parse().ok()
    }
}

impl ListingExtractor {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| AppError::Parse {
            message: format!("Invalid marketplace URL '{}': {}", base_url, e),
        })?;
        let yen = YenParser::new()?;

        let link = FieldChain::new("link")
            .then("thumbnail-link", attr_probe(selector("a[data-testid='thumbnail-link']")?, "href"))
            .then("item-href", attr_probe(selector("a[href*='/item/']")?, "href"))
            .then("any-href", attr_probe(selector("a[href]")?, "href"));

        let name_span = selector("span[data-testid='thumbnail-item-name']")?;
        let thumbnail = selector("div.merItemThumbnail[aria-label], [aria-label]")?;
        let aria_title = regex(r"^(.*)\s+(?:\d{1,3}(?:,\d{3})+|\d+)\s*円\s*$")?;
        let aria_scope = thumbnail.clone();
        let title = FieldChain::new("title")
            .then(
                "item-name",
                Box::new(move |card: ElementRef<'_>| {
                    card.select(&name_span)
                        .map(element_text)
                        .find(|text| text.chars().count() >= 2)
                }),
            )
            .then(
                "aria-label",
                Box::new(move |card: ElementRef<'_>| {
                    card.select(&aria_scope).find_map(|el| {
                        let label = el.value().attr("aria-label")?;
                        let head = aria_title.captures(label)?.get(1)?.as_str().trim();
                        let head = head.strip_suffix("の画像").unwrap_or(head).trim();
                        (!head.is_empty()).then(|| head.to_string())
                    })
                }),
            )
            .then("img-alt", attr_probe(selector("img[alt]")?, "alt"));

        let aria_yen = yen.clone();
        let price = FieldChain::new("price")
            .then(
                "aria-label",
                Box::new(move |card: ElementRef<'_>| {
                    card.select(&thumbnail)
                        .filter_map(|el| el.value().attr("aria-label"))
                        .find_map(|label| aria_yen.parse_suffixed(label))
                }),
            )
            .then("mer-price", yen_text_probe(selector(".merPrice")?, yen.clone(), false))
            .then("item-price", yen_text_probe(selector("[class*='itemPrice']")?, yen.clone(), false))
            .then("price-class", yen_text_probe(selector("[class*='price']")?, yen, true));

        let image = FieldChain::new("image")
            .then("figure-img", image_probe(selector("figure img")?))
            .then("any-img", image_probe(selector("img")?));

        Ok(Self {
            base_url,
            id_pattern: regex(r"^[A-Za-z0-9]*[0-9][A-Za-z0-9]*$")?,
            link,
            title,
            price,
            image,
        })
    }

    /// Extracts cards in page order. Cards without an id are counted, not returned.
    pub fn extract(&self, cards: &[String]) -> Extraction {
        let mut extraction = Extraction::default();

        for (index, html) in cards.iter().enumerate() {
            match self.extract_card(index, html) {
                Some(item) => {
                    if item.is_partial() {
                        extraction.partial += 1;
                        debug!(
                            item_id = %item.id,
                            has_title = item.title.is_some(),
                            has_price = item.price_jpy.is_some(),
                            has_image = item.image_url.is_some(),
                            "Card extracted with missing fields"
                        );
                    }
                    extraction.items.push(item);
                }
                None => {
                    extraction.discarded += 1;
                    warn!(card_index = index, "Discarding card without a derivable item id");
                }
            }
        }

        extraction
    }

    pub fn extract_card(&self, index: usize, html: &str) -> Option<ExtractedItem> {
        let fragment = Html::parse_fragment(html);
        let card = fragment.root_element();

        let url = self.link.resolve(card).and_then(|href| self.base_url.join(&href).ok())?;
        let id = self.item_id(&url)?;

        Some(ExtractedItem {
            id,
            title: self.title.resolve(card),
            price_jpy: self.price.resolve(card),
            url: url.to_string(),
            image_url: self.image.resolve(card),
            card_index: index,
        })
    }

    /// The trailing path segment of an item link, e.g. `m12345678901`.
    pub fn item_id(&self, url: &Url) -> Option<String> {
        let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
        self.id_pattern.is_match(segment).then(|| segment.to_string())
    }

    pub fn search_url(&self, query: &str) -> Result<Url> {
        let mut url = self.base_url.join("/search").map_err(|e| AppError::Parse {
            message: format!("Cannot build search URL: {}", e),
        })?;
        url.query_pairs_mut()
            .append_pair("keyword", query)
            .append_pair("status", "on_sale");
        Ok(url)
    }
}

/// Returns a reason when the page looks like an access-denied or throttling interstitial.
pub fn detect_block_page(title: &str, html: &str) -> Option<String> {
    if title.to_lowercase().contains("access denied") {
        return Some(format!("page title '{}'", title));
    }
    if let Some(text) = BLOCK_PAGE_TEXT.iter().find(|text| html.contains(**text)) {
        return Some(format!("page text '{}'", text));
    }

    let document = Html::parse_document(html);
    BLOCK_PAGE_SELECTORS.iter().find_map(|css| {
        let sel = Selector::parse(css).ok()?;
        document.select(&sel).next().map(|_| format!("selector '{}'", css))
    })
}

pub fn detect_captcha(html: &str) -> bool {
    let Ok(iframes) = Selector::parse("iframe[src]") else {
        return false;
    };
    let document = Html::parse_document(html);
    let found = document
        .select(&iframes)
        .filter_map(|frame| frame.value().attr("src"))
        .any(|src| {
            let src = src.to_lowercase();
            CAPTCHA_MARKERS.iter().any(|marker| src.contains(marker))
        });
    found
}

pub fn is_no_results_page(html: &str) -> bool {
    NO_RESULTS_TEXT.iter().any(|text| html.contains(text))
}
