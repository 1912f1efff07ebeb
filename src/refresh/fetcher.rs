use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::{FetchFailure, FetchFailureReason};
use crate::model::ProductSnapshot;
use crate::normalization::page::extract_page_fields;
use crate::refresh::pacing::{RetryPolicy, Sleeper};

pub const RATE_LIMITED: u16 = 429;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// One HTTP GET. Network failures are errors; any status is a response.
#[async_trait]
pub trait PageTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<PageResponse, TransportError>;
}

pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageTransport for HttpTransport {
    async fn get(&self, url: &str) -> Result<PageResponse, TransportError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| TransportError(e.to_string()))?;
        Ok(PageResponse { status, body })
    }
}

/// Fetches a product page and turns it into a snapshot, retrying only on
/// rate limiting.
pub struct SnapshotFetcher {
    transport: Arc<dyn PageTransport>,
    sleeper: Arc<dyn Sleeper>,
    page_base: Url,
    retry: RetryPolicy,
}

impl SnapshotFetcher {
    pub fn new(
        transport: Arc<dyn PageTransport>,
        sleeper: Arc<dyn Sleeper>,
        page_base: &str,
        retry: RetryPolicy,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            transport,
            sleeper,
            page_base: Url::parse(page_base)?,
            retry,
        })
    }

    pub fn page_url(&self, product_id: &str) -> String {
        let mut url = self.page_base.clone();
        url.query_pairs_mut().append_pair("itemId", product_id);
        url.to_string()
    }

    /// At most `max_retries + 1` requests. Anything but a 429 ends the loop.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn fetch(&self, product_id: &str) -> Result<ProductSnapshot, FetchFailure> {
        let url = self.page_url(product_id);
        let fail = |reason: FetchFailureReason| FetchFailure {
            product_id: product_id.to_string(),
            reason,
        };

        let mut retries = 0u32;
        let body = loop {
            let resp = self
                .transport
                .get(&url)
                .await
                .map_err(|e| fail(FetchFailureReason::Transport(e.0)))?;

            if resp.status == RATE_LIMITED {
                if retries >= self.retry.max_retries {
                    warn!(attempts = retries + 1, "rate limit retries exhausted");
                    return Err(fail(FetchFailureReason::RateLimitExhausted {
                        attempts: retries + 1,
                    }));
                }
                retries += 1;
                let delay = self.retry.next_delay();
                warn!(
                    retry = retries,
                    max = self.retry.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited; backing off"
                );
                self.sleeper.sleep(delay).await;
                continue;
            }
            if !(200..300).contains(&resp.status) {
                return Err(fail(FetchFailureReason::HttpStatus(resp.status)));
            }
            break resp.body;
        };

        let fields = extract_page_fields(product_id, &body)
            .map_err(|e| fail(FetchFailureReason::Extraction(e.to_string())))?;
        debug!(
            original = fields.prices.original,
            selling = fields.prices.selling,
            stock = %fields.stock,
            "page extracted"
        );
        Ok(ProductSnapshot {
            id: product_id.to_string(),
            original_price: fields.prices.original,
            selling_price: fields.prices.selling,
            quantity: fields.quantity,
            stock: fields.stock,
            fetched_at: Utc::now(),
        })
    }
}
