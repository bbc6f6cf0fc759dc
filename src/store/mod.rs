//! Repository-style persistence seams. Entities reference each other by id
//! only; every cross-entity walk goes through these traits so the object
//! graph never turns into live cyclic references.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::merger::MergeBatch;
use crate::model::{
    AchievementState, AlertEvent, AlertKind, CanonicalGame, LibrarySummary, PlatformBinding,
    PlatformId, PlatformLibraryEntry, PriceObservation, SyncJob, WishlistSubscription,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Canonical game awaiting an id.
#[derive(Debug, Clone)]
pub struct NewCanonicalGame {
    pub name: String,
    pub name_key: String,
    pub release_date: Option<NaiveDate>,
    pub header_image: Option<String>,
    pub speculative: bool,
}

/// Canonical game catalog and platform-id bindings.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Authoritative platform-id → canonical-game mapping.
    async fn game_for_external(
        &self,
        platform: PlatformId,
        external_id: &str,
    ) -> Result<Option<i64>>;

    /// All canonical games sharing one normalized name key.
    async fn games_by_name_key(&self, name_key: &str) -> Result<Vec<CanonicalGame>>;

    /// Bounded scan of games whose key starts with `prefix`; feeds the
    /// near-miss hints attached to speculative creations.
    async fn games_by_key_prefix(&self, prefix: &str, limit: usize)
        -> Result<Vec<CanonicalGame>>;

    async fn insert_game(&self, game: NewCanonicalGame) -> Result<CanonicalGame>;

    /// Bind a platform identifier to a canonical game. Idempotent; an
    /// existing binding for the same identifier is left untouched.
    async fn bind_external(
        &self,
        platform: PlatformId,
        external_id: &str,
        game_id: i64,
    ) -> Result<()>;

    /// Canonical achievement id for (game, platform-side key), created on
    /// first sight.
    async fn ensure_achievement(
        &self,
        game_id: i64,
        external_key: &str,
        name: &str,
    ) -> Result<i64>;
}

/// Per-user library rows, bindings and the derived summary.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn binding(&self, user_id: i64, platform: PlatformId)
        -> Result<Option<PlatformBinding>>;

    async fn set_last_sync_time(&self, binding_id: i64, when: DateTime<Utc>) -> Result<()>;

    /// Current rows for one platform account, the merger's comparison base.
    async fn entries_for_account(
        &self,
        platform: PlatformId,
        platform_user_id: &str,
    ) -> Result<Vec<PlatformLibraryEntry>>;

    async fn achievement_states(
        &self,
        user_id: i64,
        platform: PlatformId,
    ) -> Result<Vec<AchievementState>>;

    /// Every entry across all of the user's bound accounts.
    async fn entries_for_user(&self, user_id: i64) -> Result<Vec<PlatformLibraryEntry>>;

    async fn achievement_states_for_user(&self, user_id: i64) -> Result<Vec<AchievementState>>;

    async fn summary(&self, user_id: i64) -> Result<Option<LibrarySummary>>;

    /// Apply one job's merge batch and recompute the user's summary as a
    /// single atomic unit: a reader never observes the rows without the
    /// matching summary.
    async fn commit_merge(&self, user_id: i64, batch: &MergeBatch) -> Result<LibrarySummary>;

    /// Recompute and persist the summary from a full scan of the user's
    /// rows. `commit_merge` runs this internally; it is also the manual
    /// repair path.
    async fn recompute_summary(&self, user_id: i64) -> Result<LibrarySummary>;
}

/// Sync job bookkeeping.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert_job(&self, job: &SyncJob) -> Result<()>;

    async fn job(&self, task_id: Uuid) -> Result<Option<SyncJob>>;

    /// Most recent job for the key, any state. Drives submit-time
    /// estimates.
    async fn latest_job(&self, user_id: i64, platform: PlatformId) -> Result<Option<SyncJob>>;
}

/// Price observations, wishlist subscriptions and alert events.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Append an observation. An id of 0 gets one assigned; a replayed id
    /// returns the already-stored row unchanged (the feed is append-only).
    async fn record_observation(&self, observation: &PriceObservation)
        -> Result<PriceObservation>;

    async fn active_subscriptions(
        &self,
        game_id: i64,
        platform: PlatformId,
    ) -> Result<Vec<WishlistSubscription>>;

    /// Insert the alert for (subscription, observation) unless one already
    /// exists; `None` means the uniqueness constraint absorbed a duplicate.
    async fn insert_alert_once(
        &self,
        subscription_id: i64,
        observation_id: i64,
        kind: AlertKind,
        triggered_at: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>>;

    async fn upsert_subscription(&self, subscription: &WishlistSubscription) -> Result<i64>;
}

/// The full persistence surface the orchestrator wires together.
pub trait SyncStore: CatalogStore + LibraryStore + JobStore + PriceStore {}

impl<T: CatalogStore + LibraryStore + JobStore + PriceStore> SyncStore for T {}
