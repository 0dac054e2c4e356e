//! Health check endpoints.

use crate::state::AppState;
use actix_web::{web, HttpResponse, Responder};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let database_healthy = prism_db::connection::test_connection(&state.db).await.is_ok();

    let status = if database_healthy { "ok" } else { "degraded" };
    HttpResponse::Ok().json(json!({
        "status": status,
        "service": "prism-api",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database_healthy,
    }))
}

pub async fn root() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "service": "Prism API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
