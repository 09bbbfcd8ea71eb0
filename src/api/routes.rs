// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check (no auth required)
        .route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        // API v1 routes (all require authentication)
        .service(
            web::scope("/api/v1")
                // Sync control
                .route("/sync/{supplier}", web::post().to(handlers::sync_supplier))
                .route("/sync-all", web::post().to(handlers::sync_all))
                // Session polling
                .route("/sessions/{id}", web::get().to(handlers::get_session))
                // Supplier management
                .route("/suppliers", web::get().to(handlers::list_suppliers))
                .route(
                    "/suppliers/{id}/status",
                    web::get().to(handlers::supplier_status),
                )
                .route(
                    "/suppliers/{id}/test",
                    web::get().to(handlers::test_supplier),
                ),
        );
}
