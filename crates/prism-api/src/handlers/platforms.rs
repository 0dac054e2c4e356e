//! Platform management — connection status, connect, disconnect.

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use prism_db::repositories::{CredentialRepository, CredentialUpsert, SyncStateRepository};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct PlatformStatus {
    pub platform: String,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub auth_code: String,
}

/// GET /api/v1/platforms — every supported platform with its connection
/// state.
pub async fn list_platforms(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let credentials = CredentialRepository::new(&state.db)
        .list_for_user(user.user_id)
        .await?;
    let connected: HashMap<String, _> = credentials
        .into_iter()
        .map(|c| (c.platform.clone(), c))
        .collect();

    let sync_states: HashMap<String, _> = SyncStateRepository::new(&state.db)
        .list_for_user(user.user_id)
        .await?
        .into_iter()
        .map(|s| (s.platform.clone(), s))
        .collect();

    let platforms: Vec<PlatformStatus> = state
        .registry
        .supported_platforms()
        .into_iter()
        .map(|platform| {
            let cred = connected.get(platform);
            let sync = sync_states.get(platform);
            PlatformStatus {
                platform: platform.to_string(),
                connected: cred.is_some(),
                last_sync: sync
                    .and_then(|s| s.last_sync_at)
                    .map(|t| t.to_rfc3339()),
                platform_user_id: cred.and_then(|c| c.platform_user_id.clone()),
            }
        })
        .collect();

    Ok(HttpResponse::Ok().json(platforms))
}

/// POST /api/v1/platforms/{platform}/connect — direct code exchange for
/// platforms that support it. For telegram the auth code is the bot
/// token; OAuth platforms go through the auth service's redirect flow.
pub async fn connect_platform(
    user: AuthenticatedUser,
    path: web::Path<String>,
    payload: web::Json<ConnectRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let platform = path.into_inner().to_lowercase();
    if !state.registry.is_supported(&platform) {
        return Err(ApiError::BadRequest(format!(
            "Unsupported platform. Supported: {:?}",
            state.registry.supported_platforms()
        )));
    }

    if platform != "telegram" {
        return Err(ApiError::BadRequest(format!(
            "Use the OAuth flow to connect {platform}"
        )));
    }

    let sealed = state.vault.seal(&payload.auth_code)?;
    CredentialRepository::new(&state.db)
        .upsert(
            user.user_id,
            &platform,
            CredentialUpsert {
                access_token: sealed,
                platform_user_id: Some("telegram-bot".to_string()),
                ..Default::default()
            },
        )
        .await?;

    info!(user_id = %user.user_id, "telegram connected");
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "platform_user_id": "telegram-bot",
    })))
}

/// DELETE /api/v1/platforms/{platform} — disconnect and drop stored
/// credentials and sync state.
pub async fn disconnect_platform(
    user: AuthenticatedUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let platform = path.into_inner().to_lowercase();

    CredentialRepository::new(&state.db)
        .delete(user.user_id, &platform)
        .await
        .map_err(|e| match e {
            prism_db::DatabaseError::NotFound(_) => {
                ApiError::NotFound(format!("Platform {platform} is not connected"))
            }
            other => other.into(),
        })?;

    SyncStateRepository::new(&state.db)
        .delete(user.user_id, &platform)
        .await?;

    info!(user_id = %user.user_id, platform, "platform disconnected");
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}
