//! Fakes shared by unit tests: product page HTML, a scripted transport and
//! a sleeper that records instead of waiting.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::refresh::fetcher::{PageResponse, PageTransport, TransportError};
use crate::refresh::pacing::Sleeper;

/// Builds storefront-shaped product pages.
#[derive(Default)]
pub struct PageBuilder {
    selling: Option<String>,
    original: Option<String>,
    first_price: Option<String>,
    row_price: Option<String>,
    quantity: Option<String>,
    sold_out: bool,
}

impl PageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selling(mut self, text: &str) -> Self {
        self.selling = Some(text.to_string());
        self
    }

    pub fn original(mut self, text: &str) -> Self {
        self.original = Some(text.to_string());
        self
    }

    pub fn first_price(mut self, text: &str) -> Self {
        self.first_price = Some(text.to_string());
        self
    }

    pub fn row_price(mut self, text: &str) -> Self {
        self.row_price = Some(text.to_string());
        self
    }

    pub fn quantity(mut self, text: &str) -> Self {
        self.quantity = Some(text.to_string());
        self
    }

    pub fn sold_out(mut self) -> Self {
        self.sold_out = true;
        self
    }

    pub fn build(self) -> String {
        let mut body = String::from("<div class=\"cdtl_prcbox\">");
        if let Some(p) = &self.original {
            body.push_str(&format!(
                "<span class=\"cdtl_old_price\"><em class=\"ssg_price\">{p}</em></span>"
            ));
        }
        if let Some(p) = &self.first_price {
            body.push_str(&format!(
                "<span class=\"cdtl_first_price\"><em class=\"ssg_price\">{p}</em></span>"
            ));
        }
        if let Some(p) = &self.selling {
            body.push_str(&format!(
                "<span class=\"cdtl_new_price notranslate\"><em class=\"ssg_price\">{p}</em></span>"
            ));
        }
        body.push_str("</div>");
        if let Some(p) = &self.row_price {
            body.push_str(&format!(
                "<div class=\"cdtl_row_price\"><em class=\"ssg_price\">{p}</em></div>"
            ));
        }
        if let Some(q) = &self.quantity {
            body.push_str(&format!(
                "<div class=\"cdtl_optprice_wrap\"><p class=\"cdtl_txt_info\">{q}</p></div>"
            ));
        }
        let button = if self.sold_out {
            "<button class=\"cdtl_btn_soldout\">일시품절</button>"
        } else {
            "<button class=\"cdtl_btn_cart\">장바구니</button>"
        };
        body.push_str(&format!("<div class=\"cdtl_btn_wrap3\">{button}</div>"));
        format!("<html><head><title>item</title></head><body>{body}</body></html>")
    }
}

pub type Scripted = Result<PageResponse, TransportError>;

/// Replays queued responses per product id. Once a queue is down to its
/// last response, that response repeats.
#[derive(Default)]
pub struct ScriptedTransport {
    queues: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, product_id: &str, response: Scripted) -> &Self {
        self.queues
            .lock()
            .unwrap()
            .entry(product_id.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn page(&self, product_id: &str, html: String) -> &Self {
        self.push(product_id, Ok(PageResponse { status: 200, body: html }))
    }

    pub fn status(&self, product_id: &str, status: u16) -> &Self {
        self.push(
            product_id,
            Ok(PageResponse {
                status,
                body: String::new(),
            }),
        )
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn item_id(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "itemId")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or_default()
}

#[async_trait]
impl PageTransport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<PageResponse, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());
        let id = item_id(url);
        let mut queues = self.queues.lock().unwrap();
        let Some(queue) = queues.get_mut(&id) else {
            return Ok(PageResponse {
                status: 404,
                body: String::new(),
            });
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

/// Records every requested delay and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
    }
}
