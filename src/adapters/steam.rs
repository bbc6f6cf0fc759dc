use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use super::{
    epoch_secs, http_client, NormalizedAchievement, NormalizedEntry, NormalizedGame,
    NormalizedPrice, PlatformAdapter,
};
use crate::error::AdapterError;
use crate::model::{PlatformBinding, PlatformId};
use crate::util::env::{env_opt, env_req};

const STORE_API: &str = "https://store.steampowered.com/api";

/// Steam Web API adapter.
/// Env: STEAM_API_KEY (required), STEAM_API_BASE, STEAM_HTTP_TIMEOUT_SECS.
pub struct SteamAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OwnedGamesResp {
    response: OwnedGames,
}

#[derive(Debug, Default, Deserialize)]
struct OwnedGames {
    #[serde(default)]
    games: Vec<OwnedGame>,
}

#[derive(Debug, Deserialize)]
struct OwnedGame {
    appid: i64,
    #[serde(default)]
    name: Option<String>,
    /// Minutes, Steam's own unit.
    #[serde(default)]
    playtime_forever: i64,
    /// Unix seconds; 0 when never played.
    #[serde(default)]
    rtime_last_played: i64,
    #[serde(default)]
    img_icon_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlayerAchievementsResp {
    playerstats: PlayerStats,
}

#[derive(Debug, Deserialize)]
struct PlayerStats {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    achievements: Vec<PlayerAchievement>,
}

#[derive(Debug, Deserialize)]
struct PlayerAchievement {
    apiname: String,
    #[serde(default)]
    name: Option<String>,
    /// 0/1 flag.
    achieved: i64,
    #[serde(default)]
    unlocktime: i64,
}

#[derive(Debug, Deserialize)]
struct AppDetailsWrapper {
    success: bool,
    #[serde(default)]
    data: Option<AppData>,
}

#[derive(Debug, Deserialize)]
struct AppData {
    #[serde(default)]
    is_free: Option<bool>,
    #[serde(default)]
    price_overview: Option<PriceOverview>,
}

#[derive(Debug, Deserialize)]
struct PriceOverview {
    #[serde(rename = "initial")]
    initial_price: Option<i64>,
    #[serde(rename = "final")]
    final_price: Option<i64>,
    #[serde(default)]
    discount_percent: Option<i64>,
}

impl SteamAdapter {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client("STEAM_HTTP_TIMEOUT_SECS"),
            api_key: env_req("STEAM_API_KEY")?,
            base_url: env_opt("STEAM_API_BASE")
                .unwrap_or_else(|| "https://api.steampowered.com".into()),
        })
    }

    #[cfg(test)]
    fn for_tests() -> Self {
        Self {
            client: Client::new(),
            api_key: "test-key".into(),
            base_url: "https://api.steampowered.com".into(),
        }
    }
}

fn normalize_owned(games: Vec<OwnedGame>) -> Vec<NormalizedEntry> {
    games
        .into_iter()
        .map(|g| {
            let appid = g.appid.to_string();
            let header_image = g.img_icon_url.as_deref().filter(|h| !h.is_empty()).map(|h| {
                format!(
                    "https://media.steampowered.com/steamcommunity/public/images/apps/{}/{}.jpg",
                    g.appid, h
                )
            });
            NormalizedEntry {
                game: NormalizedGame {
                    name: g.name.unwrap_or_else(|| appid.clone()),
                    external_id: appid,
                    // GetOwnedGames carries no release date; resolution
                    // falls back to name-only matching for Steam.
                    release_date: None,
                    header_image,
                },
                playtime_minutes: g.playtime_forever.max(0),
                last_played: epoch_secs(g.rtime_last_played),
                achievements_total: None,
                achievements_unlocked: None,
            }
        })
        .collect()
}

fn normalize_achievements(stats: PlayerStats) -> Vec<NormalizedAchievement> {
    stats
        .achievements
        .into_iter()
        .map(|a| NormalizedAchievement {
            name: a.name.clone().unwrap_or_else(|| a.apiname.clone()),
            external_id: a.apiname,
            unlocked: a.achieved != 0,
            unlock_time: epoch_secs(a.unlocktime),
        })
        .collect()
}

#[async_trait]
impl PlatformAdapter for SteamAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Steam
    }

    async fn fetch_library(
        &self,
        binding: &PlatformBinding,
        _watermark: Option<DateTime<Utc>>,
    ) -> Result<Vec<NormalizedEntry>, AdapterError> {
        let url = format!("{}/IPlayerService/GetOwnedGames/v1/", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("steamid", binding.platform_user_id.as_str()),
                ("include_appinfo", "true"),
                ("include_played_free_games", "true"),
            ])
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "steam owned games"))?;
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "steam owned games"));
        }
        let body: OwnedGamesResp = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "steam owned games"))?;
        Ok(normalize_owned(body.response.games))
    }

    async fn fetch_achievements(
        &self,
        binding: &PlatformBinding,
        game: &NormalizedGame,
    ) -> Result<Vec<NormalizedAchievement>, AdapterError> {
        let url = format!("{}/ISteamUserStats/GetPlayerAchievements/v1/", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("steamid", binding.platform_user_id.as_str()),
                ("appid", game.external_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "steam achievements"))?;
        // Steam answers 400 for titles that expose no stats at all.
        if resp.status().as_u16() == 400 {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "steam achievements"));
        }
        let body: PlayerAchievementsResp = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "steam achievements"))?;
        if !body.playerstats.success {
            warn!(appid = %game.external_id, "steam: playerstats success=false, treating as no achievements");
            return Ok(Vec::new());
        }
        Ok(normalize_achievements(body.playerstats))
    }

    async fn fetch_price(
        &self,
        external_id: &str,
    ) -> Result<Option<NormalizedPrice>, AdapterError> {
        let url = format!(
            "{STORE_API}/appdetails?appids={external_id}&filters=price_overview"
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "steam appdetails"))?;
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "steam appdetails"));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "steam appdetails"))?;
        let Some(entry) = body.get(external_id) else {
            return Err(AdapterError::NotFound(format!("steam app {external_id}")));
        };
        let details: AppDetailsWrapper = serde_json::from_value(entry.clone())
            .map_err(|e| AdapterError::Transient(format!("steam appdetails: {e}")))?;
        if !details.success {
            return Err(AdapterError::NotFound(format!("steam app {external_id}")));
        }
        let Some(data) = details.data else {
            return Ok(None);
        };
        if data.is_free.unwrap_or(false) {
            return Ok(None);
        }
        Ok(data.price_overview.and_then(|po| {
            let current = po.final_price?;
            let original = po.initial_price.unwrap_or(current);
            Some(match po.discount_percent {
                Some(pct) => NormalizedPrice {
                    current_minor: current,
                    original_minor: original,
                    discount_pct: pct.clamp(0, 100),
                },
                None => NormalizedPrice::from_prices(current, original),
            })
        }))
    }
}
