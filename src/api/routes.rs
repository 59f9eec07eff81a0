use actix_cors::Cors;
use actix_web::middleware::Compress;
use actix_web::{web, HttpResponse};

use super::handlers;
use super::middleware::auth::create_auth_middleware;
use super::ApiState;
use crate::storage::MAX_FILE_SIZE;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health checks
        .route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check))
        .route("/metrics", web::get().to(metrics_endpoint))

        // API v1
        .service(
            web::scope("/api/v1")
                // Let oversized uploads reach the size check so they get a proper error
                .app_data(web::PayloadConfig::new(2 * MAX_FILE_SIZE as usize))
                .wrap(create_auth_middleware())
                .wrap(Compress::default())
                .wrap(
                    Cors::default()
                        .allowed_origin_fn(|origin, _req_head| {
                            origin.as_bytes().starts_with(b"http://localhost") ||
                            origin.as_bytes().starts_with(b"https://")
                        })
                        .allowed_methods(vec!["GET", "POST", "DELETE"])
                        .allowed_headers(vec!["Content-Type", "Authorization"])
                        .max_age(3600)
                )

                // Invoice lifecycle
                .service(
                    web::scope("/invoices")
                        .route("", web::post().to(handlers::upload_invoice))
                        .route("", web::get().to(handlers::list_invoices))
                        .route("/{id}", web::get().to(handlers::get_invoice))
                        .route("/{id}", web::delete().to(handlers::delete_invoice))
                        .route("/{id}/analyze", web::post().to(handlers::analyze_invoice))
                        .route("/{id}/validate", web::post().to(handlers::validate_invoice))
                        .route("/{id}/export", web::post().to(handlers::export_invoice))
                        .route("/{id}/file", web::get().to(handlers::invoice_file))
                        .route("/{id}/upload-url", web::get().to(handlers::upload_url))
                        .route("/{id}/sage-preview", web::get().to(handlers::sage_preview))
                )

                // Extraction templates
                .service(
                    web::scope("/templates")
                        .route("", web::get().to(handlers::list_templates))
                        .route("", web::post().to(handlers::create_template))
                        .route("/{id}", web::get().to(handlers::get_template))
                )

                .route("/stats", web::get().to(handlers::stats))
        );
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy"
    }))
}

async fn readiness_check(state: web::Data<ApiState>) -> HttpResponse {
    // Check database connection
    let db_healthy = state.lifecycle.repository().ping().await.is_ok();
    let storage = state.lifecycle.storage().backend_tag();

    if db_healthy {
        HttpResponse::Ok().json(serde_json::json!({
            "status": "ready",
            "checks": {
                "database": "ok",
                "storage": storage
            }
        }))
    } else {
        HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "not_ready",
            "checks": {
                "database": "failed",
                "storage": storage
            }
        }))
    }
}

async fn metrics_endpoint() -> HttpResponse {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}
