// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check (no auth required)
        .route("/health", web::get().to(handlers::health_check))
        // API v1 routes (all require authentication)
        .service(
            web::scope("/api/v1")
                .route("/refresh", web::post().to(handlers::trigger_refresh))
                .route(
                    "/products/{id}/history",
                    web::get().to(handlers::product_history),
                ),
        );
}
