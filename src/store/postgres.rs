//! Postgres store. Upserts ride on `ON CONFLICT`; one transaction per
//! merge commit keeps rows and summary atomic; the uniqueness constraint
//! on price_alert_log is the alert-dedup mechanism.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgConnection, PgPool, Row};
use tracing::info;
use uuid::Uuid;

use super::{CatalogStore, JobStore, LibraryStore, NewCanonicalGame, PriceStore};
use crate::aggregate::RECENT_WINDOW_DAYS;
use crate::merger::MergeBatch;
use crate::model::{
    AchievementState, AlertEvent, AlertKind, CanonicalGame, JobState, LibrarySummary,
    PlatformBinding, PlatformId, PlatformLibraryEntry, PriceObservation, SyncJob, SyncMode,
    WishlistSubscription,
};

#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    /// Connect and apply pending migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let connect_options = PgConnectOptions::from_str(database_url)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("failed to connect to database")?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("connected to db, migrations applied");
        Ok(Self { pool })
    }
}

fn platform_col(row: &sqlx::postgres::PgRow, col: &str) -> Result<PlatformId> {
    row.get::<String, _>(col)
        .parse()
        .context("invalid platform value in row")
}

fn game_from_row(row: &sqlx::postgres::PgRow) -> CanonicalGame {
    CanonicalGame {
        game_id: row.get("game_id"),
        name: row.get("name"),
        name_key: row.get("name_key"),
        release_date: row.get("release_date"),
        header_image: row.get("header_image"),
        speculative: row.get("speculative"),
        created_at: row.get("created_at"),
    }
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<PlatformLibraryEntry> {
    Ok(PlatformLibraryEntry {
        platform_user_id: row.get("platform_user_id"),
        platform: platform_col(row, "platform")?,
        game_id: row.get("game_id"),
        playtime_minutes: row.get("playtime_minutes"),
        last_played: row.get("last_played"),
        achievements_total: row.get("achievements_total"),
        achievements_unlocked: row.get("achievements_unlocked"),
    })
}

fn state_from_row(row: &sqlx::postgres::PgRow) -> Result<AchievementState> {
    Ok(AchievementState {
        user_id: row.get("user_id"),
        achievement_id: row.get("achievement_id"),
        platform: platform_col(row, "platform")?,
        unlocked: row.get("unlocked"),
        unlock_time: row.get("unlock_time"),
    })
}

fn summary_from_row(row: &sqlx::postgres::PgRow) -> LibrarySummary {
    LibrarySummary {
        user_id: row.get("user_id"),
        total_games_owned: row.get("total_games_owned"),
        games_played: row.get("games_played"),
        total_playtime_minutes: row.get("total_playtime_minutes"),
        total_achievements: row.get("total_achievements"),
        unlocked_achievements: row.get("unlocked_achievements"),
        recently_played_count: row.get("recently_played_count"),
        recent_playtime_minutes: row.get("recent_playtime_minutes"),
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<SyncJob> {
    let state: String = row.get("state");
    let mode: String = row.get("mode");
    Ok(SyncJob {
        task_id: row.get("task_id"),
        user_id: row.get("user_id"),
        platform: platform_col(row, "platform")?,
        mode: SyncMode::from_str(&mode)?,
        state: serde_json::from_value(serde_json::Value::String(state))
            .context("invalid job state in row")?,
        games_synced: row.get::<i64, _>("games_synced") as u64,
        achievements_synced: row.get::<i64, _>("achievements_synced") as u64,
        errors: serde_json::from_value(row.get("errors")).unwrap_or_default(),
        anomalies: serde_json::from_value(row.get("anomalies")).unwrap_or_default(),
        failure: row.get("failure"),
        queued_at: row.get("queued_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    })
}

fn job_state_str(state: JobState) -> &'static str {
    match state {
        JobState::Queued => "queued",
        JobState::Running => "running",
        JobState::Completed => "completed",
        JobState::Partial => "partial",
        JobState::Failed => "failed",
    }
}

fn sync_mode_str(mode: SyncMode) -> &'static str {
    match mode {
        SyncMode::Full => "full",
        SyncMode::Incremental => "incremental",
    }
}

/// Full-scan summary recompute on one connection, so `commit_merge` can run
/// it inside its transaction. SQL equivalent of `aggregate::summarize`.
async fn recompute_on(conn: &mut PgConnection, user_id: i64) -> Result<LibrarySummary> {
    let recent_cutoff = Utc::now() - chrono::Duration::days(RECENT_WINDOW_DAYS);
    let row = sqlx::query(
        r#"
        WITH entries AS (
            SELECT l.*
            FROM user_platform_library l
            JOIN user_platform_bindings b
              ON b.platform = l.platform AND b.platform_user_id = l.platform_user_id
            WHERE b.user_id = $1
        )
        SELECT
            COUNT(DISTINCT game_id)                                          AS total_games_owned,
            COUNT(DISTINCT game_id) FILTER (WHERE playtime_minutes > 0)      AS games_played,
            COALESCE(SUM(playtime_minutes), 0)::bigint                       AS total_playtime_minutes,
            COALESCE(SUM(achievements_total), 0)::bigint                     AS total_achievements,
            COUNT(*) FILTER (WHERE last_played >= $2)                        AS recently_played_count,
            COALESCE(SUM(playtime_minutes) FILTER (WHERE last_played >= $2), 0)::bigint
                                                                             AS recent_playtime_minutes
        FROM entries
        "#,
    )
    .bind(user_id)
    .bind(recent_cutoff)
    .fetch_one(&mut *conn)
    .await?;

    let unlocked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM user_achievements WHERE user_id = $1 AND unlocked",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let summary = LibrarySummary {
        user_id,
        total_games_owned: row.get("total_games_owned"),
        games_played: row.get("games_played"),
        total_playtime_minutes: row.get("total_playtime_minutes"),
        total_achievements: row.get("total_achievements"),
        unlocked_achievements: unlocked,
        recently_played_count: row.get("recently_played_count"),
        recent_playtime_minutes: row.get("recent_playtime_minutes"),
    };

    sqlx::query(
        r#"
        INSERT INTO user_game_library
            (user_id, total_games_owned, games_played, total_playtime_minutes,
             total_achievements, unlocked_achievements, recently_played_count,
             recent_playtime_minutes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (user_id) DO UPDATE SET
            total_games_owned = EXCLUDED.total_games_owned,
            games_played = EXCLUDED.games_played,
            total_playtime_minutes = EXCLUDED.total_playtime_minutes,
            total_achievements = EXCLUDED.total_achievements,
            unlocked_achievements = EXCLUDED.unlocked_achievements,
            recently_played_count = EXCLUDED.recently_played_count,
            recent_playtime_minutes = EXCLUDED.recent_playtime_minutes
        "#,
    )
    .bind(user_id)
    .bind(summary.total_games_owned)
    .bind(summary.games_played)
    .bind(summary.total_playtime_minutes)
    .bind(summary.total_achievements)
    .bind(summary.unlocked_achievements)
    .bind(summary.recently_played_count)
    .bind(summary.recent_playtime_minutes)
    .execute(&mut *conn)
    .await?;

    Ok(summary)
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn game_for_external(
        &self,
        platform: PlatformId,
        external_id: &str,
    ) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT game_id FROM game_external_ids WHERE platform = $1 AND external_id = $2",
        )
        .bind(platform.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("game_id")))
    }

    async fn games_by_name_key(&self, name_key: &str) -> Result<Vec<CanonicalGame>> {
        let rows = sqlx::query(
            "SELECT game_id, name, name_key, release_date, header_image, speculative, created_at
             FROM games WHERE name_key = $1",
        )
        .bind(name_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(game_from_row).collect())
    }

    async fn games_by_key_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<CanonicalGame>> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(
            "SELECT game_id, name, name_key, release_date, header_image, speculative, created_at
             FROM games WHERE name_key LIKE $1 LIMIT $2",
        )
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(game_from_row).collect())
    }

    async fn insert_game(&self, game: NewCanonicalGame) -> Result<CanonicalGame> {
        let row = sqlx::query(
            r#"
            INSERT INTO games (name, name_key, release_date, header_image, speculative)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING game_id, name, name_key, release_date, header_image, speculative, created_at
            "#,
        )
        .bind(&game.name)
        .bind(&game.name_key)
        .bind(game.release_date)
        .bind(&game.header_image)
        .bind(game.speculative)
        .fetch_one(&self.pool)
        .await?;
        Ok(game_from_row(&row))
    }

    async fn bind_external(
        &self,
        platform: PlatformId,
        external_id: &str,
        game_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO game_external_ids (platform, external_id, game_id)
             VALUES ($1, $2, $3)
             ON CONFLICT (platform, external_id) DO NOTHING",
        )
        .bind(platform.as_str())
        .bind(external_id)
        .bind(game_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_achievement(
        &self,
        game_id: i64,
        external_key: &str,
        name: &str,
    ) -> Result<i64> {
        if let Some(row) = sqlx::query(
            "SELECT achievement_id FROM achievements WHERE game_id = $1 AND external_key = $2",
        )
        .bind(game_id)
        .bind(external_key)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(row.get("achievement_id"));
        }
        let row = sqlx::query(
            "INSERT INTO achievements (game_id, external_key, name)
             VALUES ($1, $2, $3)
             ON CONFLICT (game_id, external_key) DO UPDATE SET name = achievements.name
             RETURNING achievement_id",
        )
        .bind(game_id)
        .bind(external_key)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("achievement_id"))
    }
}

#[async_trait]
impl LibraryStore for PgStore {
    async fn binding(
        &self,
        user_id: i64,
        platform: PlatformId,
    ) -> Result<Option<PlatformBinding>> {
        let row = sqlx::query(
            "SELECT binding_id, user_id, platform, platform_user_id, access_token, active,
                    expire_time, last_sync_time
             FROM user_platform_bindings WHERE user_id = $1 AND platform = $2",
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(PlatformBinding {
                binding_id: r.get("binding_id"),
                user_id: r.get("user_id"),
                platform: platform_col(&r, "platform")?,
                platform_user_id: r.get("platform_user_id"),
                access_token: r.get("access_token"),
                active: r.get("active"),
                expire_time: r.get("expire_time"),
                last_sync_time: r.get("last_sync_time"),
            })
        })
        .transpose()
    }

    async fn set_last_sync_time(&self, binding_id: i64, when: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE user_platform_bindings SET last_sync_time = $1 WHERE binding_id = $2")
            .bind(when)
            .bind(binding_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn entries_for_account(
        &self,
        platform: PlatformId,
        platform_user_id: &str,
    ) -> Result<Vec<PlatformLibraryEntry>> {
        let rows = sqlx::query(
            "SELECT platform_user_id, platform, game_id, playtime_minutes, last_played,
                    achievements_total, achievements_unlocked
             FROM user_platform_library WHERE platform = $1 AND platform_user_id = $2",
        )
        .bind(platform.as_str())
        .bind(platform_user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn achievement_states(
        &self,
        user_id: i64,
        platform: PlatformId,
    ) -> Result<Vec<AchievementState>> {
        let rows = sqlx::query(
            "SELECT user_id, achievement_id, platform, unlocked, unlock_time
             FROM user_achievements WHERE user_id = $1 AND platform = $2",
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(state_from_row).collect()
    }

    async fn entries_for_user(&self, user_id: i64) -> Result<Vec<PlatformLibraryEntry>> {
        let rows = sqlx::query(
            "SELECT l.platform_user_id, l.platform, l.game_id, l.playtime_minutes,
                    l.last_played, l.achievements_total, l.achievements_unlocked
             FROM user_platform_library l
             JOIN user_platform_bindings b
               ON b.platform = l.platform AND b.platform_user_id = l.platform_user_id
             WHERE b.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn achievement_states_for_user(&self, user_id: i64) -> Result<Vec<AchievementState>> {
        let rows = sqlx::query(
            "SELECT user_id, achievement_id, platform, unlocked, unlock_time
             FROM user_achievements WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(state_from_row).collect()
    }

    async fn summary(&self, user_id: i64) -> Result<Option<LibrarySummary>> {
        let row = sqlx::query(
            "SELECT user_id, total_games_owned, games_played, total_playtime_minutes,
                    total_achievements, unlocked_achievements, recently_played_count,
                    recent_playtime_minutes
             FROM user_game_library WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(summary_from_row))
    }

    async fn commit_merge(&self, user_id: i64, batch: &MergeBatch) -> Result<LibrarySummary> {
        let mut tx = self.pool.begin().await?;
        // Jobs for the same user on different platforms commit
        // concurrently; the recompute below must see every committed row,
        // so serialize per user for the rest of the transaction.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        for entry in &batch.entry_upserts {
            sqlx::query(
                r#"
                INSERT INTO user_platform_library
                    (platform_user_id, platform, game_id, playtime_minutes, last_played,
                     achievements_total, achievements_unlocked)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (platform_user_id, platform, game_id) DO UPDATE SET
                    playtime_minutes = EXCLUDED.playtime_minutes,
                    last_played = EXCLUDED.last_played,
                    achievements_total = EXCLUDED.achievements_total,
                    achievements_unlocked = EXCLUDED.achievements_unlocked
                "#,
            )
            .bind(&entry.platform_user_id)
            .bind(entry.platform.as_str())
            .bind(entry.game_id)
            .bind(entry.playtime_minutes)
            .bind(entry.last_played)
            .bind(entry.achievements_total)
            .bind(entry.achievements_unlocked)
            .execute(&mut *tx)
            .await?;
        }
        for unlock in &batch.achievement_upserts {
            sqlx::query(
                r#"
                INSERT INTO user_achievements
                    (user_id, achievement_id, platform, unlocked, unlock_time)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (user_id, achievement_id, platform) DO UPDATE SET
                    unlocked = EXCLUDED.unlocked,
                    unlock_time = EXCLUDED.unlock_time
                "#,
            )
            .bind(unlock.user_id)
            .bind(unlock.achievement_id)
            .bind(unlock.platform.as_str())
            .bind(unlock.unlocked)
            .bind(unlock.unlock_time)
            .execute(&mut *tx)
            .await?;
        }
        let summary = recompute_on(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(summary)
    }

    async fn recompute_summary(&self, user_id: i64) -> Result<LibrarySummary> {
        let mut conn = self.pool.acquire().await?;
        recompute_on(&mut conn, user_id).await
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn upsert_job(&self, job: &SyncJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_jobs
                (task_id, user_id, platform, mode, state, games_synced,
                 achievements_synced, errors, anomalies, failure, queued_at,
                 started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (task_id) DO UPDATE SET
                state = EXCLUDED.state,
                games_synced = EXCLUDED.games_synced,
                achievements_synced = EXCLUDED.achievements_synced,
                errors = EXCLUDED.errors,
                anomalies = EXCLUDED.anomalies,
                failure = EXCLUDED.failure,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(job.task_id)
        .bind(job.user_id)
        .bind(job.platform.as_str())
        .bind(sync_mode_str(job.mode))
        .bind(job_state_str(job.state))
        .bind(job.games_synced as i64)
        .bind(job.achievements_synced as i64)
        .bind(serde_json::to_value(&job.errors)?)
        .bind(serde_json::to_value(&job.anomalies)?)
        .bind(&job.failure)
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn job(&self, task_id: Uuid) -> Result<Option<SyncJob>> {
        let row = sqlx::query("SELECT * FROM sync_jobs WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn latest_job(&self, user_id: i64, platform: PlatformId) -> Result<Option<SyncJob>> {
        let row = sqlx::query(
            "SELECT * FROM sync_jobs WHERE user_id = $1 AND platform = $2
             ORDER BY queued_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }
}

#[async_trait]
impl PriceStore for PgStore {
    async fn record_observation(
        &self,
        observation: &PriceObservation,
    ) -> Result<PriceObservation> {
        if observation.observation_id != 0 {
            // Append-only feed: a replayed id returns the stored row.
            if let Some(row) = sqlx::query(
                "SELECT observation_id, game_id, platform, current_price_minor,
                        original_price_minor, discount_rate, recorded_at
                 FROM price_history WHERE observation_id = $1",
            )
            .bind(observation.observation_id)
            .fetch_optional(&self.pool)
            .await?
            {
                return Ok(PriceObservation {
                    observation_id: row.get("observation_id"),
                    game_id: row.get("game_id"),
                    platform: platform_col(&row, "platform")?,
                    current_price_minor: row.get("current_price_minor"),
                    original_price_minor: row.get("original_price_minor"),
                    discount_rate: row.get("discount_rate"),
                    recorded_at: row.get("recorded_at"),
                });
            }
            sqlx::query(
                r#"
                INSERT INTO price_history
                    (observation_id, game_id, platform, current_price_minor,
                     original_price_minor, discount_rate, recorded_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (observation_id) DO NOTHING
                "#,
            )
            .bind(observation.observation_id)
            .bind(observation.game_id)
            .bind(observation.platform.as_str())
            .bind(observation.current_price_minor)
            .bind(observation.original_price_minor)
            .bind(observation.discount_rate)
            .bind(observation.recorded_at)
            .execute(&self.pool)
            .await?;
            return Ok(observation.clone());
        }
        let row = sqlx::query(
            r#"
            INSERT INTO price_history
                (game_id, platform, current_price_minor, original_price_minor,
                 discount_rate, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING observation_id
            "#,
        )
        .bind(observation.game_id)
        .bind(observation.platform.as_str())
        .bind(observation.current_price_minor)
        .bind(observation.original_price_minor)
        .bind(observation.discount_rate)
        .bind(observation.recorded_at)
        .fetch_one(&self.pool)
        .await?;
        let mut stored = observation.clone();
        stored.observation_id = row.get("observation_id");
        Ok(stored)
    }

    async fn active_subscriptions(
        &self,
        game_id: i64,
        platform: PlatformId,
    ) -> Result<Vec<WishlistSubscription>> {
        let rows = sqlx::query(
            "SELECT subscription_id, user_id, game_id, platform, target_price_minor,
                    target_discount, is_active, created_at
             FROM price_alert_subscriptions
             WHERE game_id = $1 AND platform = $2 AND is_active",
        )
        .bind(game_id)
        .bind(platform.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(WishlistSubscription {
                    subscription_id: r.get("subscription_id"),
                    user_id: r.get("user_id"),
                    game_id: r.get("game_id"),
                    platform: platform_col(r, "platform")?,
                    target_price_minor: r.get("target_price_minor"),
                    target_discount: r.get("target_discount"),
                    is_active: r.get("is_active"),
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }

    async fn insert_alert_once(
        &self,
        subscription_id: i64,
        observation_id: i64,
        kind: AlertKind,
        triggered_at: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>> {
        let row = sqlx::query(
            r#"
            INSERT INTO price_alert_log
                (subscription_id, observation_id, alert_kind, triggered_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subscription_id, observation_id) DO NOTHING
            RETURNING alert_id
            "#,
        )
        .bind(subscription_id)
        .bind(observation_id)
        .bind(kind.as_str())
        .bind(triggered_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| AlertEvent {
            alert_id: r.get("alert_id"),
            subscription_id,
            observation_id,
            kind,
            triggered_at,
        }))
    }

    async fn upsert_subscription(&self, subscription: &WishlistSubscription) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO price_alert_subscriptions
                (user_id, game_id, platform, target_price_minor, target_discount, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, game_id, platform) DO UPDATE SET
                target_price_minor = EXCLUDED.target_price_minor,
                target_discount = EXCLUDED.target_discount,
                is_active = EXCLUDED.is_active
            RETURNING subscription_id
            "#,
        )
        .bind(subscription.user_id)
        .bind(subscription.game_id)
        .bind(subscription.platform.as_str())
        .bind(subscription.target_price_minor)
        .bind(subscription.target_discount)
        .bind(subscription.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("subscription_id"))
    }
}
