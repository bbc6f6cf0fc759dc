use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{
    http_client, parse_rfc3339, NormalizedAchievement, NormalizedEntry, NormalizedGame,
    NormalizedPrice, PlatformAdapter,
};
use crate::error::AdapterError;
use crate::model::{PlatformBinding, PlatformId};
use crate::util::env::env_opt;

const TROPHY_HOST: &str = "https://m.np.playstation.com";
const STORE_HOST: &str = "https://store.playstation.com";

/// PlayStation Network adapter, backed by the trophy API. PSN exposes no
/// playtime through it, so entries report 0 minutes and the trophy-title
/// update time stands in for last-played. Trophies are surfaced as
/// achievements.
/// Env: PSN_STORE_REGION (default US), PSN_HTTP_TIMEOUT_SECS.
pub struct PsnAdapter {
    client: Client,
    store_region: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrophyTitlesResp {
    #[serde(default)]
    trophy_titles: Vec<TrophyTitle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrophyTitle {
    np_communication_id: String,
    trophy_title_name: String,
    #[serde(default)]
    trophy_title_icon_url: Option<String>,
    #[serde(default)]
    last_updated_date_time: Option<String>,
    #[serde(default)]
    defined_trophies: Option<TrophyCounts>,
    #[serde(default)]
    earned_trophies: Option<TrophyCounts>,
}

#[derive(Debug, Default, Deserialize)]
struct TrophyCounts {
    #[serde(default)]
    bronze: i64,
    #[serde(default)]
    silver: i64,
    #[serde(default)]
    gold: i64,
    #[serde(default)]
    platinum: i64,
}

impl TrophyCounts {
    fn total(&self) -> i64 {
        self.bronze + self.silver + self.gold + self.platinum
    }
}

#[derive(Debug, Deserialize)]
struct TrophiesResp {
    #[serde(default)]
    trophies: Vec<Trophy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Trophy {
    trophy_id: i64,
    #[serde(default)]
    trophy_name: Option<String>,
    #[serde(default)]
    earned: bool,
    #[serde(default)]
    earned_date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StoreContainerResp {
    #[serde(default)]
    default_sku: Option<StoreSku>,
}

#[derive(Debug, Deserialize)]
struct StoreSku {
    /// Minor units already.
    #[serde(default)]
    price: i64,
    #[serde(default)]
    rewards: Vec<StoreReward>,
}

#[derive(Debug, Deserialize)]
struct StoreReward {
    #[serde(default)]
    price: Option<i64>,
    #[serde(default)]
    discount: Option<i64>,
}

impl PsnAdapter {
    pub fn from_env() -> Self {
        Self {
            client: http_client("PSN_HTTP_TIMEOUT_SECS"),
            store_region: env_opt("PSN_STORE_REGION").unwrap_or_else(|| "US".into()),
        }
    }

    fn bearer(binding: &PlatformBinding) -> Result<String, AdapterError> {
        binding
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| format!("Bearer {t}"))
            .ok_or(AdapterError::AuthExpired)
    }
}

fn normalize_trophy_titles(
    titles: Vec<TrophyTitle>,
    watermark: Option<DateTime<Utc>>,
) -> Vec<NormalizedEntry> {
    titles
        .into_iter()
        .filter_map(|t| {
            let last_played = t
                .last_updated_date_time
                .as_deref()
                .and_then(parse_rfc3339);
            if let Some(mark) = watermark {
                match last_played {
                    Some(updated) if updated > mark => {}
                    _ => return None,
                }
            }
            Some(NormalizedEntry {
                game: NormalizedGame {
                    external_id: t.np_communication_id,
                    name: t.trophy_title_name,
                    release_date: None,
                    header_image: t.trophy_title_icon_url,
                },
                playtime_minutes: 0,
                last_played,
                achievements_total: t.defined_trophies.as_ref().map(TrophyCounts::total),
                achievements_unlocked: t.earned_trophies.as_ref().map(TrophyCounts::total),
            })
        })
        .collect()
}

fn normalize_trophies(trophies: Vec<Trophy>) -> Vec<NormalizedAchievement> {
    trophies
        .into_iter()
        .map(|t| NormalizedAchievement {
            name: t
                .trophy_name
                .clone()
                .unwrap_or_else(|| format!("trophy-{}", t.trophy_id)),
            external_id: t.trophy_id.to_string(),
            unlocked: t.earned,
            unlock_time: t
                .earned_date_time
                .as_deref()
                .and_then(parse_rfc3339)
                .filter(|_| t.earned),
        })
        .collect()
}

#[async_trait]
impl PlatformAdapter for PsnAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Psn
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    async fn fetch_library(
        &self,
        binding: &PlatformBinding,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<Vec<NormalizedEntry>, AdapterError> {
        let url = format!("{TROPHY_HOST}/api/trophy/v1/users/me/trophyTitles");
        let resp = self
            .client
            .get(&url)
            .header("Authorization", Self::bearer(binding)?)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "psn trophy titles"))?;
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "psn trophy titles"));
        }
        let body: TrophyTitlesResp = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "psn trophy titles"))?;
        Ok(normalize_trophy_titles(body.trophy_titles, watermark))
    }

    async fn fetch_achievements(
        &self,
        binding: &PlatformBinding,
        game: &NormalizedGame,
    ) -> Result<Vec<NormalizedAchievement>, AdapterError> {
        let url = format!(
            "{TROPHY_HOST}/api/trophy/v1/users/me/npCommunicationIds/{}/trophyGroups/all/trophies",
            game.external_id
        );
        let resp = self
            .client
            .get(&url)
            .query(&[("npServiceName", "trophy")])
            .header("Authorization", Self::bearer(binding)?)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "psn trophies"))?;
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "psn trophies"));
        }
        let body: TrophiesResp = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "psn trophies"))?;
        Ok(normalize_trophies(body.trophies))
    }

    async fn fetch_price(
        &self,
        external_id: &str,
    ) -> Result<Option<NormalizedPrice>, AdapterError> {
        let url = format!(
            "{STORE_HOST}/store/api/chihiro/00_09_000/container/{}/en/999/{}",
            self.store_region, external_id
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "psn store"))?;
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "psn store"));
        }
        let body: StoreContainerResp = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "psn store"))?;
        Ok(extract_store_price(&body))
    }
}

fn extract_store_price(body: &StoreContainerResp) -> Option<NormalizedPrice> {
    let sku = body.default_sku.as_ref()?;
    if sku.price <= 0 {
        return None;
    }
    // An active reward row carries the discounted price; the sku price is
    // the list price.
    match sku.rewards.iter().find_map(|r| r.price.map(|p| (p, r.discount))) {
        Some((current, discount)) => Some(match discount {
            Some(pct) => NormalizedPrice {
                current_minor: current,
                original_minor: sku.price,
                discount_pct: pct.clamp(0, 100),
            },
            None => NormalizedPrice::from_prices(current, sku.price),
        }),
        None => Some(NormalizedPrice::from_prices(sku.price, sku.price)),
    }
}
