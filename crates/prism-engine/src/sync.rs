//! Sync engine.
//!
//! Two ingress paths feed the pipeline: the periodic fleet sweep over all
//! stored credentials, and per-event webhook ingest. Runs for the same
//! `(user, platform)` pair are serialized by the sync-state lease;
//! different pairs sync in parallel across sweep iterations.

use crate::pipeline::{EnrichmentPipeline, SYNC_BATCH_CONCURRENCY};
use backoff::ExponentialBackoff;
use chrono::{DateTime, Duration, Utc};
use prism_adapters::AdapterRegistry;
use prism_core::adapter::{Credentials, PlatformAdapter};
use prism_core::crypto::TokenVault;
use prism_core::errors::{CoreError, CoreResult};
use prism_core::message::MessageState;
use prism_core::pubsub::EventPublisher;
use prism_db::entities::platform_credential;
use prism_db::repositories::{CredentialRepository, CredentialUpsert, SyncStateRepository};
use prism_db::DatabaseConnection;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// First sync reaches back this far.
const DEFAULT_SYNC_WINDOW_HOURS: i64 = 24;
/// Webhook-triggered syncs only need a short catch-up window.
const WEBHOOK_SYNC_WINDOW_MINUTES: i64 = 10;

pub struct SyncEngine {
    db: Arc<DatabaseConnection>,
    registry: Arc<AdapterRegistry>,
    pipeline: Arc<EnrichmentPipeline>,
    vault: TokenVault,
    publisher: Option<EventPublisher>,
}

impl SyncEngine {
    pub fn new(
        db: Arc<DatabaseConnection>,
        registry: Arc<AdapterRegistry>,
        pipeline: Arc<EnrichmentPipeline>,
        vault: TokenVault,
    ) -> Self {
        Self {
            db,
            registry,
            pipeline,
            vault,
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Best-effort sync_status push so connected clients can show sync
    /// progress.
    async fn publish_sync_status(&self, user_id: Uuid, platform: &str, status: &str) {
        if let Some(publisher) = &self.publisher {
            let _ = publisher
                .publish_to_user(
                    user_id,
                    "sync_status",
                    json!({ "platform": platform, "status": status }),
                )
                .await;
        }
    }

    /// Fleet sweep: sync every stored credential. Per-credential errors
    /// are captured into the sync state and never halt the sweep.
    pub async fn sync_all_users(&self) {
        let credentials = match CredentialRepository::new(&self.db).list_all().await {
            Ok(creds) => creds,
            Err(e) => {
                error!(error = %e, "failed to enumerate platform credentials");
                return;
            }
        };

        info!(connections = credentials.len(), "starting fleet sync");

        for cred in credentials {
            let user_id = cred.user_id;
            let platform = cred.platform.clone();
            if let Err(e) = self.sync_credential(&cred, None).await {
                error!(%user_id, %platform, error = %e, "sync failed");
            }
        }
    }

    /// Webhook-triggered incremental sync for one `(user, platform)`.
    /// Transient failures retry with exponential backoff (30s base).
    pub async fn sync_user_platform(&self, user_id: Uuid, platform: &str) -> CoreResult<()> {
        let cred = CredentialRepository::new(&self.db)
            .find(user_id, platform)
            .await
            .map_err(|e| CoreError::internal(e.to_string()))?
            .ok_or_else(|| CoreError::not_found("credential", platform))?;

        let since = Utc::now() - Duration::minutes(WEBHOOK_SYNC_WINDOW_MINUTES);

        let policy = ExponentialBackoff {
            initial_interval: StdDuration::from_secs(30),
            max_elapsed_time: Some(StdDuration::from_secs(8 * 60)),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(policy, || async {
            match self.sync_credential(&cred, Some(since)).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_retryable() => {
                    warn!(%user_id, platform, error = %e, "incremental sync retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    /// Sync one credential: take the lease, resolve the window, decrypt
    /// and (if stale) refresh tokens, fetch, normalize, enrich.
    async fn sync_credential(
        &self,
        cred: &platform_credential::Model,
        since_override: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        let Some(adapter) = self.registry.get(&cred.platform) else {
            warn!(platform = %cred.platform, "no adapter registered");
            return Ok(());
        };

        let sync_states = SyncStateRepository::new(&self.db);
        let Some(lease) = sync_states
            .acquire_lease(cred.user_id, &cred.platform)
            .await
            .map_err(|e| CoreError::internal(e.to_string()))?
        else {
            // Another worker holds a fresh lease for this pair
            return Ok(());
        };

        let since = since_override
            .or(lease.last_sync_at)
            .unwrap_or_else(|| Utc::now() - Duration::hours(DEFAULT_SYNC_WINDOW_HOURS));

        self.publish_sync_status(cred.user_id, &cred.platform, "syncing")
            .await;

        let result = self.fetch_and_enrich(cred, adapter.as_ref(), since).await;

        match result {
            Ok(count) => {
                if count > 0 {
                    info!(
                        user_id = %cred.user_id,
                        platform = %cred.platform,
                        count,
                        "synced messages"
                    );
                }
                sync_states
                    .mark_idle(lease, None)
                    .await
                    .map_err(|e| CoreError::internal(e.to_string()))?;
                self.publish_sync_status(cred.user_id, &cred.platform, "done")
                    .await;
                Ok(())
            }
            Err(e) => {
                sync_states
                    .mark_error(lease, &e.to_string())
                    .await
                    .map_err(|e| CoreError::internal(e.to_string()))?;
                self.publish_sync_status(cred.user_id, &cred.platform, "error")
                    .await;
                Err(e)
            }
        }
    }

    async fn fetch_and_enrich(
        &self,
        cred: &platform_credential::Model,
        adapter: &dyn PlatformAdapter,
        since: DateTime<Utc>,
    ) -> CoreResult<usize> {
        let credentials = self.decrypt_credentials(cred)?;
        let credentials = self.refresh_if_stale(cred, adapter, credentials).await;

        let raw_messages = adapter
            .fetch_new_messages(cred.user_id, since, &credentials)
            .await?;

        if raw_messages.is_empty() {
            return Ok(0);
        }

        let states: Vec<MessageState> = raw_messages
            .iter()
            .filter_map(|raw| match adapter.normalize(raw, cred.user_id) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(platform = %cred.platform, error = %e, "unnormalizable message");
                    None
                }
            })
            .collect();

        let count = states.len();
        Arc::clone(&self.pipeline)
            .run_batch(states, SYNC_BATCH_CONCURRENCY)
            .await;
        Ok(count)
    }

    fn decrypt_credentials(&self, cred: &platform_credential::Model) -> CoreResult<Credentials> {
        let access_token = self
            .vault
            .open(&cred.access_token)
            .map_err(|e| CoreError::internal(format!("credential unseal: {e}")))?;
        let refresh_token = match &cred.refresh_token {
            Some(sealed) => Some(
                self.vault
                    .open(sealed)
                    .map_err(|e| CoreError::internal(format!("credential unseal: {e}")))?,
            ),
            None => None,
        };
        Ok(Credentials {
            access_token,
            refresh_token,
            bot_token: None,
        })
    }

    /// Rotate tokens when the stored expiry has passed. The rotated pair
    /// is sealed and written back; refusal keeps the current tokens.
    async fn refresh_if_stale(
        &self,
        cred: &platform_credential::Model,
        adapter: &dyn PlatformAdapter,
        credentials: Credentials,
    ) -> Credentials {
        let expired = cred
            .token_expiry
            .map(|expiry| expiry <= Utc::now())
            .unwrap_or(false);
        if !expired || credentials.refresh_token.is_none() {
            return credentials;
        }

        match adapter.refresh_credentials(&credentials).await {
            Ok(Some(rotated)) => {
                let sealed_access = self.vault.seal(&rotated.access_token);
                let sealed_refresh = rotated
                    .refresh_token
                    .as_deref()
                    .map(|t| self.vault.seal(t))
                    .transpose();

                match (sealed_access, sealed_refresh) {
                    (Ok(access_token), Ok(refresh_token)) => {
                        let repo = CredentialRepository::new(&self.db);
                        if let Err(e) = repo
                            .upsert(
                                cred.user_id,
                                &cred.platform,
                                CredentialUpsert {
                                    access_token,
                                    refresh_token,
                                    ..Default::default()
                                },
                            )
                            .await
                        {
                            warn!(platform = %cred.platform, error = %e, "failed to store rotated tokens");
                        }
                    }
                    _ => warn!(platform = %cred.platform, "failed to seal rotated tokens"),
                }
                rotated
            }
            Ok(None) => {
                warn!(platform = %cred.platform, "token refresh refused");
                credentials
            }
            Err(e) => {
                warn!(platform = %cred.platform, error = %e, "token refresh failed");
                credentials
            }
        }
    }

    /// Process a single message delivered by webhook. The raw data may
    /// carry `user_id` directly; app-level events (slack) resolve the
    /// workspace id against stored credentials. Unresolvable events are
    /// logged and dropped.
    pub async fn process_webhook(&self, platform: &str, raw: Value) {
        let Some(adapter) = self.registry.get(platform) else {
            warn!(platform, "webhook for unsupported platform");
            return;
        };

        let user_id = match self.resolve_webhook_user(platform, &raw).await {
            Some(user_id) => user_id,
            None => {
                warn!(platform, "could not determine user for webhook");
                return;
            }
        };

        match adapter.normalize(&raw, user_id) {
            Ok(state) => {
                self.pipeline.run(state).await;
            }
            Err(e) => warn!(platform, error = %e, "unnormalizable webhook payload"),
        }
    }

    async fn resolve_webhook_user(&self, platform: &str, raw: &Value) -> Option<Uuid> {
        if let Some(user_id) = raw
            .get("user_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Uuid>().ok())
        {
            return Some(user_id);
        }

        if platform == "slack" {
            let team_id = raw.get("team").and_then(|v| v.as_str())?;
            let cred = CredentialRepository::new(&self.db)
                .find_by_platform_user("slack", team_id)
                .await
                .ok()
                .flatten()?;
            return Some(cred.user_id);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_adapters::AdapterSettings;
    use prism_core::llm::{LlmClient, LlmConfig};
    use sea_orm::{DatabaseBackend, MockDatabase};
    use serde_json::json;

    fn engine_with_db(db: DatabaseConnection) -> SyncEngine {
        let db = Arc::new(db);
        let llm = Arc::new(
            LlmClient::new(LlmConfig::new("k").with_base_url("http://127.0.0.1:1")).unwrap(),
        );
        SyncEngine::new(
            Arc::clone(&db),
            Arc::new(AdapterRegistry::new(AdapterSettings::default()).unwrap()),
            Arc::new(EnrichmentPipeline::new(db, llm)),
            TokenVault::new("test-key"),
        )
    }

    fn credential_row(user_id: Uuid, platform_user_id: &str) -> platform_credential::Model {
        platform_credential::Model {
            id: Uuid::new_v4(),
            user_id,
            platform: "slack".to_string(),
            access_token: "sealed".to_string(),
            refresh_token: None,
            token_expiry: None,
            platform_user_id: Some(platform_user_id.to_string()),
            scopes: None,
            webhook_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_webhook_user_resolution_direct() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let engine = engine_with_db(db);
        let user_id = Uuid::new_v4();

        let resolved = engine
            .resolve_webhook_user("telegram", &json!({ "user_id": user_id.to_string() }))
            .await;
        assert_eq!(resolved, Some(user_id));
    }

    #[tokio::test]
    async fn test_webhook_user_resolution_via_slack_team() {
        let user_id = Uuid::new_v4();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![credential_row(user_id, "T1DC2JH3J")]])
            .into_connection();
        let engine = engine_with_db(db);

        let resolved = engine
            .resolve_webhook_user("slack", &json!({ "team": "T1DC2JH3J", "text": "hi" }))
            .await;
        assert_eq!(resolved, Some(user_id));
    }

    #[tokio::test]
    async fn test_webhook_user_resolution_fails_closed() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<platform_credential::Model, _, _>([vec![]])
            .into_connection();
        let engine = engine_with_db(db);

        assert_eq!(
            engine
                .resolve_webhook_user("slack", &json!({ "team": "T404" }))
                .await,
            None
        );
        assert_eq!(
            engine.resolve_webhook_user("discord", &json!({})).await,
            None
        );
    }

    #[tokio::test]
    async fn test_decrypt_credentials_round_trip() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let engine = engine_with_db(db);

        let mut cred = credential_row(Uuid::new_v4(), "T1");
        cred.access_token = engine.vault.seal("xoxb-plain").unwrap();
        cred.refresh_token = Some(engine.vault.seal("refresh-plain").unwrap());

        let creds = engine.decrypt_credentials(&cred).unwrap();
        assert_eq!(creds.access_token, "xoxb-plain");
        assert_eq!(creds.refresh_token.as_deref(), Some("refresh-plain"));
    }

    #[tokio::test]
    async fn test_decrypt_garbage_credentials_fails() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let engine = engine_with_db(db);

        let cred = credential_row(Uuid::new_v4(), "T1");
        assert!(engine.decrypt_credentials(&cred).is_err());
    }
}
