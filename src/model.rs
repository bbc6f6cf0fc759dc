//! Domain entities. Plain data with identifier fields; cross-entity
//! navigation goes through the store traits, never through live references.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External platform an account can be linked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Steam,
    Xbox,
    Psn,
    Gog,
}

impl PlatformId {
    pub const ALL: [PlatformId; 4] = [
        PlatformId::Steam,
        PlatformId::Xbox,
        PlatformId::Psn,
        PlatformId::Gog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Steam => "steam",
            PlatformId::Xbox => "xbox",
            PlatformId::Psn => "psn",
            PlatformId::Gog => "gog",
        }
    }
}

impl std::fmt::Display for PlatformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlatformId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steam" => Ok(PlatformId::Steam),
            "xbox" => Ok(PlatformId::Xbox),
            "psn" | "playstation" => Ok(PlatformId::Psn),
            "gog" => Ok(PlatformId::Gog),
            other => Err(anyhow::anyhow!("unknown platform: {other}")),
        }
    }
}

/// Platform-agnostic game record every platform-specific entry resolves to.
/// Identity (`game_id`, `name_key`) is immutable once created; display
/// metadata may be enriched later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalGame {
    pub game_id: i64,
    pub name: String,
    /// Normalized identity key derived from the name at creation time.
    pub name_key: String,
    pub release_date: Option<NaiveDate>,
    pub header_image: Option<String>,
    /// Created without a high-confidence match; pending manual review.
    pub speculative: bool,
    pub created_at: DateTime<Utc>,
}

/// Link between a local user and their account on one external platform.
/// Owned by account-linking; read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformBinding {
    pub binding_id: i64,
    pub user_id: i64,
    pub platform: PlatformId,
    pub platform_user_id: String,
    pub access_token: Option<String>,
    pub active: bool,
    pub expire_time: DateTime<Utc>,
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl PlatformBinding {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time <= now
    }
}

/// Per (platform account, platform, canonical game) library row.
/// Created and updated only by the merger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformLibraryEntry {
    pub platform_user_id: String,
    pub platform: PlatformId,
    pub game_id: i64,
    pub playtime_minutes: i64,
    pub last_played: Option<DateTime<Utc>>,
    pub achievements_total: Option<i64>,
    pub achievements_unlocked: Option<i64>,
}

/// Canonical achievement definition attached to a canonical game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub achievement_id: i64,
    pub game_id: i64,
    pub name: String,
}

/// Per (user, achievement, platform) unlock state. Unlocks are
/// one-directional: once `unlocked` is true it never reverts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementState {
    pub user_id: i64,
    pub achievement_id: i64,
    pub platform: PlatformId,
    pub unlocked: bool,
    pub unlock_time: Option<DateTime<Utc>>,
}

/// One row per user, derived entirely from the entry/achievement rows.
/// There is no independent mutation path; the store recomputes it inside
/// every merge commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySummary {
    pub user_id: i64,
    /// Canonical games counted once even when owned on several platforms.
    pub total_games_owned: i64,
    pub games_played: i64,
    /// Sum over per-platform entries.
    pub total_playtime_minutes: i64,
    pub total_achievements: i64,
    pub unlocked_achievements: i64,
    pub recently_played_count: i64,
    pub recent_playtime_minutes: i64,
}

/// Sync request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Re-fetch and re-merge the whole library.
    Full,
    /// Adapter is handed the last-synced watermark and may return only
    /// changed items; platforms without support fall back to full.
    Incremental,
}

impl std::str::FromStr for SyncMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            other => Err(anyhow::anyhow!("unknown sync mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    /// Finished with at least one recorded per-item failure.
    Partial,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Partial | JobState::Failed
        )
    }
}

/// A per-item failure surfaced in the job status rather than aborting the
/// job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobItemError {
    /// Platform-side game reference the failure applies to.
    pub game_ref: String,
    pub message: String,
}

/// One execution of fetch → resolve → merge → recompute for a
/// (user, platform) pair. Terminal once completed/partial/failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub task_id: Uuid,
    pub user_id: i64,
    pub platform: PlatformId,
    pub mode: SyncMode,
    pub state: JobState,
    pub games_synced: u64,
    pub achievements_synced: u64,
    /// Per-item fetch failures; any entry here makes the terminal state
    /// `partial` instead of `completed`.
    pub errors: Vec<JobItemError>,
    /// Absorbed findings (merge anomalies, ambiguous resolutions). Reported
    /// for review but no bar to `completed`.
    pub anomalies: Vec<String>,
    /// Set only when `state == Failed`.
    pub failure: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Immutable price/discount snapshot for one (game, platform). Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub observation_id: i64,
    pub game_id: i64,
    pub platform: PlatformId,
    /// Currency minor units.
    pub current_price_minor: i64,
    pub original_price_minor: i64,
    /// 0-100.
    pub discount_rate: i64,
    pub recorded_at: DateTime<Utc>,
}

/// A user's wishlist row with optional alert targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishlistSubscription {
    pub subscription_id: i64,
    pub user_id: i64,
    pub game_id: i64,
    pub platform: PlatformId,
    pub target_price_minor: Option<i64>,
    pub target_discount: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Which wishlist target a price observation satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TargetPrice,
    TargetDiscount,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::TargetPrice => "target_price",
            AlertKind::TargetDiscount => "target_discount",
        }
    }
}

/// Records that a subscription's condition was satisfied by one specific
/// observation. Unique on (subscription_id, observation_id): at most one
/// alert per crossing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: i64,
    pub subscription_id: i64,
    pub observation_id: i64,
    pub kind: AlertKind,
    pub triggered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_str() {
        for p in PlatformId::ALL {
            assert_eq!(p.as_str().parse::<PlatformId>().unwrap(), p);
        }
        assert!("wii".parse::<PlatformId>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Partial.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }
}
