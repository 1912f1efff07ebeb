// HTTP request handlers for API endpoints

use std::sync::Arc;
use std::time::Instant;

use actix_web::{web, HttpResponse, Result};

use crate::api::models::*;
use crate::config::stale_threshold_days;
use crate::database_ops::store::CatalogStore;
use crate::error::{RefreshError, StoreError};
use crate::model::PriceHistoryEntry;
use crate::refresh::engine::RefreshEngine;

/// Shared by every worker of the HTTP server.
pub struct AppState {
    pub engine: Arc<RefreshEngine>,
    pub store: Arc<dyn CatalogStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: Arc<RefreshEngine>) -> Self {
        Self {
            store: engine.store(),
            engine,
            started_at: Instant::now(),
        }
    }
}

/// Health check endpoint
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let store_status = match state.store.scan_records(None, 1).await {
        Ok(_) => "connected",
        Err(e) => {
            tracing::warn!(error = %e, "store probe failed");
            "disconnected"
        }
    };

    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        store: store_status.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    });

    Ok(HttpResponse::Ok().json(response))
}

/// Run one refresh cycle now and answer with its summary.
pub async fn trigger_refresh(
    state: web::Data<AppState>,
    payload: Option<web::Json<RefreshRequest>>,
) -> Result<HttpResponse> {
    let request = payload.map(web::Json::into_inner).unwrap_or_default();
    let threshold = match request.stale_after_days {
        Some(days) => match stale_threshold_days(i64::from(days)) {
            Some(threshold) => Some(threshold),
            None => {
                return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(format!(
                    "stale_after_days {days} is out of range"
                ))))
            }
        },
        None => None,
    };
    tracing::info!(stale_after_days = ?request.stale_after_days, "refresh triggered over HTTP");

    match state.engine.refresh_stale(threshold).await {
        Ok(summary) => Ok(HttpResponse::Ok().json(ApiResponse::success(summary))),
        Err(RefreshError::BatchCommit { summary, source }) => {
            tracing::error!(error = %source, "refresh cycle ended early");
            Ok(HttpResponse::InternalServerError()
                .json(ApiResponse::partial(summary, format!("batch commit failed: {source}"))))
        }
        Err(e @ RefreshError::InvalidThreshold(_)) => {
            Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(e.to_string())))
        }
        Err(e @ RefreshError::Scan(_)) => {
            tracing::error!(error = %e, "refresh cycle could not start");
            Ok(HttpResponse::ServiceUnavailable().json(ApiResponse::<()>::error(e.to_string())))
        }
    }
}

/// Ordered price history of one product.
pub async fn product_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let product_id = path.into_inner();
    match lookup_history(state.store.as_ref(), &product_id).await {
        Ok(Some(entries)) => Ok(HttpResponse::Ok().json(ApiResponse::success(HistoryResponse {
            product_id,
            entries,
        }))),
        Ok(None) => Ok(HttpResponse::NotFound()
            .json(ApiResponse::<()>::error(format!("product {product_id} not found")))),
        Err(e) => {
            tracing::error!(product_id = %product_id, error = %e, "history lookup failed");
            Ok(HttpResponse::ServiceUnavailable().json(ApiResponse::<()>::error(e.to_string())))
        }
    }
}

async fn lookup_history(
    store: &dyn CatalogStore,
    product_id: &str,
) -> Result<Option<Vec<PriceHistoryEntry>>, StoreError> {
    if store.load_record(product_id).await?.is_none() {
        return Ok(None);
    }
    store.load_history(product_id).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::configure_routes;
    use crate::config::{RefreshConfig, DEFAULT_PAGE_BASE};
    use crate::database_ops::memory_store::MemoryStore;
    use crate::model::StoredRecord;
    use crate::refresh::engine::RefreshSummary;
    use crate::refresh::fetcher::SnapshotFetcher;
    use crate::test_support::{PageBuilder, RecordingSleeper, ScriptedTransport};
    use actix_web::{test, App};
    use chrono::{TimeZone, Utc};

    fn state(store: Arc<MemoryStore>, transport: Arc<ScriptedTransport>) -> web::Data<AppState> {
        let sleeper = Arc::new(RecordingSleeper::new());
        let config = RefreshConfig::default();
        let fetcher =
            SnapshotFetcher::new(transport, sleeper.clone(), DEFAULT_PAGE_BASE, config.retry)
                .unwrap();
        let engine = RefreshEngine::new(store, fetcher, sleeper, config);
        web::Data::new(AppState::new(Arc::new(engine)))
    }

    #[actix_web::test]
    async fn refresh_endpoint_returns_summary() {
        let store = Arc::new(MemoryStore::new());
        store.insert_record(StoredRecord::new("p").with_last_refreshed("2020-01-01T00:00:00Z"));
        let transport = Arc::new(ScriptedTransport::new());
        transport.page("p", PageBuilder::new().selling("1,200").build());

        let app = test::init_service(
            App::new()
                .app_data(state(store.clone(), transport))
                .configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/api/v1/refresh")
            .set_json(RefreshRequest {
                stale_after_days: Some(30),
            })
            .to_request();
        let body: ApiResponse<RefreshSummary> = test::call_and_read_body_json(&app, req).await;

        assert!(body.success);
        let summary = body.data.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(store.load_history("p").await.unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn refresh_endpoint_rejects_out_of_range_threshold() {
        let store = Arc::new(MemoryStore::new());
        store.insert_record(StoredRecord::new("p").with_last_refreshed("2020-01-01T00:00:00Z"));
        let transport = Arc::new(ScriptedTransport::new());
        transport.page("p", PageBuilder::new().selling("1,200").build());
        let app = test::init_service(
            App::new()
                .app_data(state(store.clone(), transport.clone()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/refresh")
            .set_json(RefreshRequest {
                stale_after_days: Some(200_000_000),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        assert_eq!(transport.request_count(), 0);

        // The server keeps answering afterwards.
        let req = test::TestRequest::post().uri("/api/v1/refresh").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn refresh_endpoint_accepts_empty_body() {
        let store = Arc::new(MemoryStore::new());
        let app = test::init_service(
            App::new()
                .app_data(state(store, Arc::new(ScriptedTransport::new())))
                .configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::post().uri("/api/v1/refresh").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn history_endpoint_lists_entries_or_404s() {
        let store = Arc::new(MemoryStore::new());
        store.insert_record(StoredRecord::new("p"));
        store.insert_history(
            "p",
            vec![PriceHistoryEntry {
                original_price: 1000,
                selling_price: 900,
                recorded_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            }],
        );
        let app = test::init_service(
            App::new()
                .app_data(state(store, Arc::new(ScriptedTransport::new())))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/v1/products/p/history")
            .to_request();
        let body: ApiResponse<HistoryResponse> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.data.unwrap().entries.len(), 1);

        let req = test::TestRequest::get()
            .uri("/api/v1/products/nope/history")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }
}
