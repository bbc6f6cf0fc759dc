//! Platform adapters: fetch an authenticated user's raw library,
//! achievement and price data and normalize it into the common shape
//! before it leaves the module. Adapters are stateless beyond their HTTP
//! client, never retry, and never refresh credentials.

pub mod gog;
pub mod psn;
pub mod steam;
pub mod xbox;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::error::AdapterError;
use crate::model::{PlatformBinding, PlatformId};

pub use gog::GogAdapter;
pub use psn::PsnAdapter;
pub use steam::SteamAdapter;
pub use xbox::XboxAdapter;

/// Game as one platform reports it, normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedGame {
    /// Platform-side identifier (Steam appid, Xbox titleId, ...), unique
    /// within the platform.
    pub external_id: String,
    pub name: String,
    pub release_date: Option<NaiveDate>,
    pub header_image: Option<String>,
}

/// One library row as reported by the platform. Playtime is always minutes.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEntry {
    pub game: NormalizedGame,
    pub playtime_minutes: i64,
    pub last_played: Option<DateTime<Utc>>,
    pub achievements_total: Option<i64>,
    pub achievements_unlocked: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAchievement {
    /// Platform-side achievement key, unique within the game.
    pub external_id: String,
    pub name: String,
    pub unlocked: bool,
    pub unlock_time: Option<DateTime<Utc>>,
}

/// Price snapshot in currency minor units; discount is 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedPrice {
    pub current_minor: i64,
    pub original_minor: i64,
    pub discount_pct: i64,
}

impl NormalizedPrice {
    /// Derive the discount when the platform only reports the two prices,
    /// rounded to the nearest point.
    pub fn from_prices(current_minor: i64, original_minor: i64) -> Self {
        let discount_pct = if original_minor > 0 && current_minor <= original_minor {
            (((original_minor - current_minor) * 100 + original_minor / 2) / original_minor)
                .clamp(0, 100)
        } else {
            0
        };
        Self {
            current_minor,
            original_minor,
            discount_pct,
        }
    }
}

/// Contract every platform implements once. Callers hand in a resolved,
/// currently-valid binding; an expired binding surfaces as `AuthExpired`.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> PlatformId;

    /// Whether `fetch_library` honors a watermark. Platforms without
    /// support ignore it and return the full library.
    fn supports_incremental(&self) -> bool {
        false
    }

    /// The user's owned games with playtime/achievement counters. With a
    /// watermark, incremental-capable adapters return only entries changed
    /// since then.
    async fn fetch_library(
        &self,
        binding: &PlatformBinding,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<Vec<NormalizedEntry>, AdapterError>;

    /// Per-achievement unlock state for one game.
    async fn fetch_achievements(
        &self,
        binding: &PlatformBinding,
        game: &NormalizedGame,
    ) -> Result<Vec<NormalizedAchievement>, AdapterError>;

    /// Current storefront price for one game; `None` when the platform
    /// lists the title without a purchasable offer (free, delisted).
    async fn fetch_price(&self, external_id: &str)
        -> Result<Option<NormalizedPrice>, AdapterError>;
}

/// HTTP client with the timeout every adapter uses; per-adapter override
/// via `<PLATFORM>_HTTP_TIMEOUT_SECS`.
pub(crate) fn http_client(timeout_env: &str) -> reqwest::Client {
    let secs = crate::util::env::env_parse::<u64>(timeout_env, 15);
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(secs))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Unix seconds to UTC; platforms use 0 for "never".
pub(crate) fn epoch_secs(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

/// RFC3339 timestamp as the Xbox/PSN APIs emit it.
pub(crate) fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
