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

const TITLEHUB_HOST: &str = "https://titlehub.xboxlive.com";
const ACHIEVEMENTS_HOST: &str = "https://achievements.xboxlive.com";
const CATALOG_HOST: &str = "https://displaycatalog.mp.microsoft.com";

/// Xbox Live adapter. The binding's access token is a ready-to-send
/// `XBL3.0` authorization value; its `platform_user_id` is the xuid.
/// Env: XBOX_MARKET (default US), XBOX_HTTP_TIMEOUT_SECS.
pub struct XboxAdapter {
    client: Client,
    market: String,
}

#[derive(Debug, Deserialize)]
struct TitleHistoryResp {
    #[serde(default)]
    titles: Vec<XblTitle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct XblTitle {
    title_id: String,
    name: String,
    #[serde(default)]
    display_image: Option<String>,
    #[serde(default)]
    achievement: Option<TitleAchievement>,
    #[serde(default)]
    title_history: Option<TitleHistory>,
    #[serde(default)]
    stats: Option<TitleStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitleAchievement {
    #[serde(default)]
    current_achievements: i64,
    #[serde(default)]
    total_achievements: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitleHistory {
    #[serde(default)]
    last_time_played: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitleStats {
    #[serde(default)]
    items: Vec<TitleStat>,
}

#[derive(Debug, Deserialize)]
struct TitleStat {
    name: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AchievementsResp {
    #[serde(default)]
    achievements: Vec<XblAchievement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct XblAchievement {
    id: String,
    name: String,
    #[serde(default)]
    progress_state: Option<String>,
    #[serde(default)]
    progression: Option<Progression>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Progression {
    #[serde(default)]
    time_unlocked: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogResp {
    #[serde(default)]
    products: Vec<CatalogProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogProduct {
    #[serde(default)]
    display_sku_availabilities: Vec<SkuAvailability>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SkuAvailability {
    #[serde(default)]
    availabilities: Vec<Availability>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Availability {
    #[serde(default)]
    order_management_data: Option<OrderManagementData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrderManagementData {
    #[serde(default)]
    price: Option<CatalogPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogPrice {
    #[serde(default)]
    list_price: f64,
    #[serde(rename = "MSRP", default)]
    msrp: f64,
}

impl XboxAdapter {
    pub fn from_env() -> Self {
        Self {
            client: http_client("XBOX_HTTP_TIMEOUT_SECS"),
            market: env_opt("XBOX_MARKET").unwrap_or_else(|| "US".into()),
        }
    }

    fn authorization(binding: &PlatformBinding) -> Result<String, AdapterError> {
        binding
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(AdapterError::AuthExpired)
    }
}

/// The titlehub stats decoration reports minutes played as a loosely typed
/// value (number or numeric string, depending on title generation).
fn minutes_played(stats: &Option<TitleStats>) -> i64 {
    let Some(stats) = stats else { return 0 };
    stats
        .items
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case("MinutesPlayed"))
        .and_then(|s| s.value.as_ref())
        .and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse::<i64>().ok()))
        })
        .unwrap_or(0)
        .max(0)
}

fn normalize_titles(
    titles: Vec<XblTitle>,
    watermark: Option<DateTime<Utc>>,
) -> Vec<NormalizedEntry> {
    titles
        .into_iter()
        .filter_map(|t| {
            let last_played = t
                .title_history
                .as_ref()
                .and_then(|h| h.last_time_played.as_deref())
                .and_then(parse_rfc3339);
            // Incremental: only titles touched since the watermark.
            if let Some(mark) = watermark {
                match last_played {
                    Some(played) if played > mark => {}
                    _ => return None,
                }
            }
            let playtime_minutes = minutes_played(&t.stats);
            Some(NormalizedEntry {
                game: NormalizedGame {
                    external_id: t.title_id,
                    name: t.name,
                    release_date: None,
                    header_image: t.display_image,
                },
                playtime_minutes,
                last_played,
                achievements_total: t.achievement.as_ref().map(|a| a.total_achievements),
                achievements_unlocked: t.achievement.as_ref().map(|a| a.current_achievements),
            })
        })
        .collect()
}

fn normalize_achievements(achievements: Vec<XblAchievement>) -> Vec<NormalizedAchievement> {
    achievements
        .into_iter()
        .map(|a| {
            let unlocked = a
                .progress_state
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("Achieved"));
            let unlock_time = if unlocked {
                a.progression
                    .as_ref()
                    .and_then(|p| p.time_unlocked.as_deref())
                    .and_then(parse_rfc3339)
            } else {
                None
            };
            NormalizedAchievement {
                external_id: a.id,
                name: a.name,
                unlocked,
                unlock_time,
            }
        })
        .collect()
}

#[async_trait]
impl PlatformAdapter for XboxAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Xbox
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    async fn fetch_library(
        &self,
        binding: &PlatformBinding,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<Vec<NormalizedEntry>, AdapterError> {
        let auth = Self::authorization(binding)?;
        let url = format!(
            "{TITLEHUB_HOST}/users/xuid({})/titles/titlehistory/decoration/achievement,stats",
            binding.platform_user_id
        );
        let resp = self
            .client
            .get(&url)
            .header("Authorization", auth)
            .header("x-xbl-contract-version", "2")
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "xbox titlehub"))?;
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "xbox titlehub"));
        }
        let body: TitleHistoryResp = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "xbox titlehub"))?;
        Ok(normalize_titles(body.titles, watermark))
    }

    async fn fetch_achievements(
        &self,
        binding: &PlatformBinding,
        game: &NormalizedGame,
    ) -> Result<Vec<NormalizedAchievement>, AdapterError> {
        let auth = Self::authorization(binding)?;
        let url = format!(
            "{ACHIEVEMENTS_HOST}/users/xuid({})/achievements",
            binding.platform_user_id
        );
        let resp = self
            .client
            .get(&url)
            .query(&[("titleId", game.external_id.as_str())])
            .header("Authorization", auth)
            .header("x-xbl-contract-version", "2")
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "xbox achievements"))?;
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "xbox achievements"));
        }
        let body: AchievementsResp = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "xbox achievements"))?;
        Ok(normalize_achievements(body.achievements))
    }

    async fn fetch_price(
        &self,
        external_id: &str,
    ) -> Result<Option<NormalizedPrice>, AdapterError> {
        let url = format!("{CATALOG_HOST}/v7.0/products");
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("bigIds", external_id),
                ("market", self.market.as_str()),
                ("languages", "en-US"),
            ])
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "xbox catalog"))?;
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "xbox catalog"));
        }
        let body: CatalogResp = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "xbox catalog"))?;
        Ok(extract_catalog_price(&body))
    }
}

fn extract_catalog_price(body: &CatalogResp) -> Option<NormalizedPrice> {
    let price = body
        .products
        .iter()
        .flat_map(|p| &p.display_sku_availabilities)
        .flat_map(|s| &s.availabilities)
        .find_map(|a| {
            a.order_management_data
                .as_ref()
                .and_then(|o| o.price.as_ref())
        })?;
    if price.list_price <= 0.0 {
        return None;
    }
    let current = (price.list_price * 100.0).round() as i64;
    let original = if price.msrp > 0.0 {
        (price.msrp * 100.0).round() as i64
    } else {
        current
    };
    Some(NormalizedPrice::from_prices(current, original))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_titles() -> Vec<XblTitle> {
        let raw = json!({
            "titles": [
                {
                    "titleId": "1144039928",
                    "name": "Halo Infinite",
                    "displayImage": "https://img.example/halo.png",
                    "achievement": {"currentAchievements": 20, "totalAchievements": 119},
                    "titleHistory": {"lastTimePlayed": "2026-01-05T20:10:00Z"},
                    "stats": {"items": [{"name": "MinutesPlayed", "value": "5420"}]}
                },
                {
                    "titleId": "219630713",
                    "name": "Forza Horizon 5",
                    "achievement": {"currentAchievements": 3, "totalAchievements": 90},
                    "titleHistory": {"lastTimePlayed": "2024-06-01T08:00:00Z"},
                    "stats": {"items": [{"name": "MinutesPlayed", "value": 900}]}
                }
            ]
        });
        serde_json::from_value::<TitleHistoryResp>(raw).unwrap().titles
    }

    #[test]
    fn titles_normalize_counters_and_stats() {
        let entries = normalize_titles(sample_titles(), None);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].playtime_minutes, 5420);
        assert_eq!(entries[0].achievements_total, Some(119));
        assert_eq!(entries[0].achievements_unlocked, Some(20));
        assert_eq!(entries[1].playtime_minutes, 900);
    }

    #[test]
    fn watermark_filters_untouched_titles() {
        let mark = parse_rfc3339("2025-01-01T00:00:00Z").unwrap();
        let entries = normalize_titles(sample_titles(), Some(mark));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].game.external_id, "1144039928");
    }

    #[test]
    fn achievement_progress_state_maps_to_unlock() {
        let raw = json!({
            "achievements": [
                {"id": "1", "name": "First Blood", "progressState": "Achieved",
                 "progression": {"timeUnlocked": "2025-11-02T18:30:00Z"}},
                {"id": "2", "name": "Untouched", "progressState": "NotStarted"}
            ]
        });
        let body: AchievementsResp = serde_json::from_value(raw).unwrap();
        let achs = normalize_achievements(body.achievements);
        assert!(achs[0].unlocked && achs[0].unlock_time.is_some());
        assert!(!achs[1].unlocked && achs[1].unlock_time.is_none());
    }

    #[test]
    fn catalog_price_converts_to_minor_units() {
        let raw = json!({
            "Products": [{
                "DisplaySkuAvailabilities": [{
                    "Availabilities": [{
                        "OrderManagementData": {"Price": {"ListPrice": 29.99, "MSRP": 59.99}}
                    }]
                }]
            }]
        });
        let body: CatalogResp = serde_json::from_value(raw).unwrap();
        let price = extract_catalog_price(&body).unwrap();
        assert_eq!(price.current_minor, 2999);
        assert_eq!(price.original_minor, 5999);
        assert_eq!(price.discount_pct, 50);
    }
}
