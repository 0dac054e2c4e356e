//! Route configuration.

use crate::handlers::{actions, feed, health, platforms, webhooks, websocket};
use actix_web::{web, Scope};

/// Configure all application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(health::root))
        .route("/health", web::get().to(health::health_check))
        .service(api_v1_routes())
        .service(webhook_routes())
        .route("/ws/feed", web::get().to(websocket::feed_websocket));
}

fn api_v1_routes() -> Scope {
    web::scope("/api/v1")
        // Feed
        .route("/feed", web::get().to(feed::get_feed))
        .route(
            "/thread/{platform}/{thread_id}",
            web::get().to(feed::get_thread),
        )
        .route("/message/{id}", web::patch().to(feed::update_message))
        // AI actions
        .route("/draft/{id}", web::post().to(actions::create_draft))
        .route("/draft/{id}", web::put().to(actions::save_draft))
        .route("/send/{id}", web::post().to(actions::send_reply))
        .route(
            "/message/{id}/reclassify",
            web::post().to(actions::reclassify_message),
        )
        // Platform management
        .route("/platforms", web::get().to(platforms::list_platforms))
        .route(
            "/platforms/{platform}/connect",
            web::post().to(platforms::connect_platform),
        )
        .route(
            "/platforms/{platform}",
            web::delete().to(platforms::disconnect_platform),
        )
}

fn webhook_routes() -> Scope {
    web::scope("/webhooks")
        .route("/gmail", web::post().to(webhooks::gmail_webhook))
        .route("/slack", web::post().to(webhooks::slack_webhook))
        .route(
            "/telegram/{user_id}",
            web::post().to(webhooks::telegram_webhook),
        )
}
