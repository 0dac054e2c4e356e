//! Periodic scheduler.
//!
//! Three jobs: fleet sync (120s), snooze reaper (60s), score decay
//! (3600s). Each tick gates on a Postgres advisory lock so only one
//! process runs a given job at a time; the jobs themselves are idempotent
//! and a missed tick simply reruns at the next one.

use crate::sync::SyncEngine;
use chrono::{Duration as ChronoDuration, Utc};
use prism_core::agents::ranker;
use prism_core::cache::RedisCache;
use prism_core::pubsub::EventPublisher;
use prism_db::repositories::MessageRepository;
use prism_db::DatabaseConnection;
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement, TransactionTrait};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Advisory-lock keys, one per job.
const LOCK_FLEET_SYNC: i64 = 0x7072_736d_0001;
const LOCK_SNOOZE_REAPER: i64 = 0x7072_736d_0002;
const LOCK_SCORE_DECAY: i64 = 0x7072_736d_0003;

/// Decayed scores never fall below this.
const DECAY_SCORE_FLOOR: f64 = 0.05;
/// Decay starts once a message is older than this.
const DECAY_AGE_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerIntervals {
    pub fleet_sync: Duration,
    pub snooze_reaper: Duration,
    pub score_decay: Duration,
}

impl Default for SchedulerIntervals {
    fn default() -> Self {
        Self {
            fleet_sync: Duration::from_secs(120),
            snooze_reaper: Duration::from_secs(60),
            score_decay: Duration::from_secs(3600),
        }
    }
}

pub struct Scheduler {
    db: Arc<DatabaseConnection>,
    engine: Arc<SyncEngine>,
    cache: Option<RedisCache>,
    publisher: Option<EventPublisher>,
    intervals: SchedulerIntervals,
}

impl Scheduler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        engine: Arc<SyncEngine>,
        intervals: SchedulerIntervals,
    ) -> Self {
        Self {
            db,
            engine,
            cache: None,
            publisher: None,
            intervals,
        }
    }

    pub fn with_cache(mut self, cache: RedisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Spawn the three periodic loops. The returned handles live for the
    /// process lifetime; aborting them is the shutdown path.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            fleet_sync_secs = self.intervals.fleet_sync.as_secs(),
            snooze_secs = self.intervals.snooze_reaper.as_secs(),
            decay_secs = self.intervals.score_decay.as_secs(),
            "starting periodic scheduler"
        );

        let fleet = {
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(scheduler.intervals.fleet_sync);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    scheduler.run_gated(LOCK_FLEET_SYNC, "fleet_sync").await;
                }
            })
        };

        let snooze = {
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(scheduler.intervals.snooze_reaper);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    scheduler
                        .run_gated(LOCK_SNOOZE_REAPER, "snooze_reaper")
                        .await;
                }
            })
        };

        let decay = {
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(scheduler.intervals.score_decay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    scheduler.run_gated(LOCK_SCORE_DECAY, "score_decay").await;
                }
            })
        };

        vec![fleet, snooze, decay]
    }

    /// Run one job behind a transaction-scoped advisory lock. When the
    /// lock is held elsewhere the tick is skipped — the next one retries.
    async fn run_gated(&self, lock_key: i64, job: &str) {
        let txn = match self.db.begin().await {
            Ok(txn) => txn,
            Err(e) => {
                error!(job, error = %e, "failed to open leadership transaction");
                return;
            }
        };

        let locked = match txn
            .query_one(Statement::from_string(
                DatabaseBackend::Postgres,
                format!("SELECT pg_try_advisory_xact_lock({lock_key}) AS locked"),
            ))
            .await
        {
            Ok(Some(row)) => row.try_get::<bool>("", "locked").unwrap_or(false),
            Ok(None) => false,
            Err(e) => {
                error!(job, error = %e, "advisory lock query failed");
                false
            }
        };

        if !locked {
            let _ = txn.rollback().await;
            return;
        }

        match job {
            "fleet_sync" => self.engine.sync_all_users().await,
            "snooze_reaper" => self.reap_snoozes().await,
            "score_decay" => self.decay_scores().await,
            _ => {}
        }

        // Commit releases the advisory lock
        if let Err(e) = txn.commit().await {
            warn!(job, error = %e, "leadership transaction commit failed");
        }
    }

    /// Resurface messages whose snooze has expired and notify their
    /// owners.
    async fn reap_snoozes(&self) {
        let repo = MessageRepository::new(&self.db);
        let due = match repo.due_snoozes(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to query due snoozes");
                return;
            }
        };
        if due.is_empty() {
            return;
        }

        let mut unsnoozed = 0usize;
        for msg in due {
            if let Err(e) = repo.clear_snooze(msg.id).await {
                error!(message_id = %msg.id, error = %e, "failed to unsnooze");
                continue;
            }
            unsnoozed += 1;

            if let Some(cache) = &self.cache {
                let _ = cache.invalidate_feed(&msg.user_id.to_string()).await;
            }
            if let Some(publisher) = &self.publisher {
                let _ = publisher
                    .publish_to_user(
                        msg.user_id,
                        "new_message",
                        json!({
                            "id": msg.id.to_string(),
                            "platform": msg.platform,
                            "priority_score": msg.priority_score,
                            "priority_label": msg.priority_label,
                            "unsnooze": true,
                        }),
                    )
                    .await;
            }
        }

        info!(count = unsnoozed, "unsnoozed messages");
    }

    /// Apply time decay to open messages older than 24 hours and
    /// invalidate the feed caches of affected users.
    async fn decay_scores(&self) {
        let repo = MessageRepository::new(&self.db);
        let now = Utc::now();
        let cutoff = now - ChronoDuration::hours(DECAY_AGE_HOURS);

        let candidates = match repo.decay_candidates(cutoff).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "failed to query decay candidates");
                return;
            }
        };

        let mut affected_users = HashSet::new();
        let mut decayed = 0usize;
        for msg in candidates {
            let age_hours = (now - msg.timestamp).num_seconds() as f64 / 3600.0;
            let new_score = decayed_score(msg.priority_score, age_hours);
            if (new_score - msg.priority_score).abs() < f64::EPSILON {
                continue;
            }
            if let Err(e) = repo.set_score(msg.id, new_score).await {
                error!(message_id = %msg.id, error = %e, "failed to write decayed score");
                continue;
            }
            affected_users.insert(msg.user_id);
            decayed += 1;

            if let Some(publisher) = &self.publisher {
                let _ = publisher
                    .publish_to_user(
                        msg.user_id,
                        "priority_updated",
                        json!({
                            "id": msg.id.to_string(),
                            "priority_score": new_score,
                            "priority_label": msg.priority_label,
                        }),
                    )
                    .await;
            }
        }

        if let Some(cache) = &self.cache {
            for user_id in &affected_users {
                let _ = cache.invalidate_feed(&user_id.to_string()).await;
            }
        }

        if decayed > 0 {
            info!(
                messages = decayed,
                users = affected_users.len(),
                "decayed priority scores"
            );
        }
    }
}

/// Scale a score by the age-based decay factor, floored at 0.05.
fn decayed_score(score: f64, age_hours: f64) -> f64 {
    let factor = ranker::decay_factor(age_hours);
    ranker::round3((score * factor).max(DECAY_SCORE_FLOOR))
}
