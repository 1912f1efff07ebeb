//! Field extraction for storefront product pages.
//!
//! Selector order matters and mirrors what the storefront renders:
//! the discounted price sits in `cdtl_new_price`, the list price in
//! `cdtl_old_price` (or `cdtl_first_price` on single-price layouts), and
//! pages without either only carry the row price.

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::model::{PricePair, StockFlag};
use crate::normalization::price::{parse_price_text, RawPrices};

pub const SELLING_PRICE_SELECTOR: &str = "span.cdtl_new_price.notranslate > em";
pub const ORIGINAL_PRICE_SELECTORS: [&str; 2] =
    ["span.cdtl_old_price > em", "span.cdtl_first_price > em"];
/// Used for both prices, only when neither primary price was found.
pub const ROW_PRICE_SELECTOR: &str = ".cdtl_row_price em.ssg_price";
pub const QUANTITY_SELECTOR: &str = "div.cdtl_optprice_wrap > p.cdtl_txt_info";
pub const BUY_BUTTON_REGION_SELECTOR: &str = ".cdtl_btn_wrap3";
pub const SOLD_OUT_MARKER: &str = "품절";

#[derive(Debug, Error)]
#[error("invalid selector '{selector}': {message}")]
pub struct PageError {
    pub selector: String,
    pub message: String,
}

/// Fields extracted from one product page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFields {
    pub prices: PricePair,
    pub quantity: String,
    pub stock: StockFlag,
}

struct PageSelectors {
    selling: Selector,
    original: Vec<Selector>,
    row_price: Selector,
    quantity: Selector,
    buy_region: Selector,
}

impl PageSelectors {
    fn compile() -> Result<Self, PageError> {
        Ok(Self {
            selling: selector(SELLING_PRICE_SELECTOR)?,
            original: ORIGINAL_PRICE_SELECTORS
                .iter()
                .map(|s| selector(s))
                .collect::<Result<_, _>>()?,
            row_price: selector(ROW_PRICE_SELECTOR)?,
            quantity: selector(QUANTITY_SELECTOR)?,
            buy_region: selector(BUY_BUTTON_REGION_SELECTOR)?,
        })
    }
}

fn selector(css: &str) -> Result<Selector, PageError> {
    Selector::parse(css).map_err(|e| PageError {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

// Text nodes are trimmed and concatenated, so markup splitting a number
// ("12,<b>000</b>") still yields one value.
fn text_of(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).collect::<String>()
}

fn first_price(doc: &Html, sel: &Selector) -> Option<i64> {
    doc.select(sel).next().and_then(|el| parse_price_text(&text_of(el)))
}

/// Extract prices, quantity text and stock flag from raw page HTML.
pub fn extract_page_fields(product_id: &str, html: &str) -> Result<PageFields, PageError> {
    let sels = PageSelectors::compile()?;
    let doc = Html::parse_document(html);

    // The first original-price tag present wins, even when its text is unusable.
    let original = sels
        .original
        .iter()
        .find_map(|s| doc.select(s).next())
        .and_then(|el| parse_price_text(&text_of(el)));
    let mut raw = RawPrices {
        selling: first_price(&doc, &sels.selling),
        original,
    };
    if raw.original.is_none() && raw.selling.is_none() {
        let row = first_price(&doc, &sels.row_price);
        raw = RawPrices {
            original: row,
            selling: row,
        };
    }
    let prices = raw.reconcile(product_id);

    let quantity = doc
        .select(&sels.quantity)
        .next()
        .map(|el| text_of(el).split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let sold_out = doc
        .select(&sels.buy_region)
        .next()
        .map(|el| el.html().contains(SOLD_OUT_MARKER))
        .unwrap_or(false);

    Ok(PageFields {
        prices,
        quantity,
        stock: if sold_out {
            StockFlag::OutOfStock
        } else {
            StockFlag::InStock
        },
    })
}
