use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::{stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use super::{
    http_client, parse_rfc3339, NormalizedAchievement, NormalizedEntry, NormalizedGame,
    NormalizedPrice, PlatformAdapter,
};
use crate::error::AdapterError;
use crate::model::{PlatformBinding, PlatformId};
use crate::util::env::{env_opt, env_parse};

const EMBED_HOST: &str = "https://embed.gog.com";
const GAMEPLAY_HOST: &str = "https://gameplay.gog.com";
const API_HOST: &str = "https://api.gog.com";

/// GOG adapter. Library pages come from the embed endpoint; playtime is
/// reconstructed from per-game gameplay sessions, fetched with bounded
/// concurrency. A failed sessions lookup downgrades that entry to 0
/// minutes instead of failing the library fetch.
/// Env: GOG_COUNTRY (default US), GOG_SESSION_CONCURRENCY,
/// GOG_HTTP_TIMEOUT_SECS.
pub struct GogAdapter {
    client: Client,
    country: String,
    session_concurrency: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilteredProductsResp {
    #[serde(default)]
    products: Vec<GogProduct>,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct GogProduct {
    id: i64,
    title: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(rename = "releaseDate", default)]
    release_date: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionsResp {
    #[serde(default)]
    sessions: Vec<GogSession>,
}

#[derive(Debug, Deserialize)]
struct GogSession {
    /// Seconds. Older payloads use `duration`, newer `duration_seconds`.
    #[serde(default)]
    duration: Option<i64>,
    #[serde(default)]
    duration_seconds: Option<i64>,
    #[serde(default)]
    date_session_finished: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AchievementsResp {
    #[serde(default)]
    items: Vec<GogAchievement>,
}

#[derive(Debug, Deserialize)]
struct GogAchievement {
    achievement_key: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    date_unlocked: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PricesResp {
    #[serde(rename = "_embedded", default)]
    embedded: Option<EmbeddedPrices>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedPrices {
    #[serde(default)]
    prices: Vec<GogPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GogPrice {
    #[serde(default)]
    base_price: Option<String>,
    #[serde(default)]
    final_price: Option<String>,
}

impl GogAdapter {
    pub fn from_env() -> Self {
        Self {
            client: http_client("GOG_HTTP_TIMEOUT_SECS"),
            country: env_opt("GOG_COUNTRY").unwrap_or_else(|| "US".into()),
            session_concurrency: env_parse("GOG_SESSION_CONCURRENCY", 8usize).max(1),
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

    async fn fetch_products_page(
        &self,
        auth: &str,
        page: u32,
    ) -> Result<FilteredProductsResp, AdapterError> {
        let url = format!("{EMBED_HOST}/account/getFilteredProducts");
        let resp = self
            .client
            .get(&url)
            .query(&[("mediaType", "1"), ("page", &page.to_string())])
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "gog products"))?;
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "gog products"));
        }
        resp.json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "gog products"))
    }

    /// Total minutes across all recorded sessions for one game.
    async fn fetch_playtime(
        &self,
        auth: &str,
        user_id: &str,
        product_id: i64,
    ) -> Result<(i64, Option<DateTime<Utc>>), AdapterError> {
        let url = format!("{GAMEPLAY_HOST}/clients/{product_id}/users/{user_id}/sessions");
        let resp = self
            .client
            .get(&url)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "gog sessions"))?;
        // Titles without gameplay tracking 404; that is simply zero time.
        if resp.status().as_u16() == 404 {
            return Ok((0, None));
        }
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "gog sessions"));
        }
        let body: SessionsResp = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "gog sessions"))?;
        Ok(sum_sessions(&body))
    }
}

fn sum_sessions(body: &SessionsResp) -> (i64, Option<DateTime<Utc>>) {
    let mut minutes = 0i64;
    let mut last: Option<DateTime<Utc>> = None;
    for s in &body.sessions {
        let seconds = s.duration.or(s.duration_seconds).unwrap_or(0).max(0);
        minutes += seconds / 60;
        if let Some(finished) = s.date_session_finished.as_deref().and_then(parse_rfc3339) {
            last = Some(match last {
                Some(prev) if prev >= finished => prev,
                _ => finished,
            });
        }
    }
    (minutes, last)
}

fn release_year_to_date(epoch_secs: Option<i64>) -> Option<NaiveDate> {
    super::epoch_secs(epoch_secs.unwrap_or(0)).map(|dt| dt.date_naive())
}

fn normalize_achievements(items: Vec<GogAchievement>) -> Vec<NormalizedAchievement> {
    items
        .into_iter()
        .map(|a| {
            let unlock_time = a.date_unlocked.as_deref().and_then(parse_rfc3339);
            NormalizedAchievement {
                name: a.name.clone().unwrap_or_else(|| a.achievement_key.clone()),
                external_id: a.achievement_key,
                unlocked: unlock_time.is_some(),
                unlock_time,
            }
        })
        .collect()
}

fn parse_price_minor(raw: &str) -> Option<i64> {
    // "1999" or "1999 USD"
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok().filter(|v| *v > 0)
}

#[async_trait]
impl PlatformAdapter for GogAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Gog
    }

    async fn fetch_library(
        &self,
        binding: &PlatformBinding,
        _watermark: Option<DateTime<Utc>>,
    ) -> Result<Vec<NormalizedEntry>, AdapterError> {
        let auth = Self::bearer(binding)?;
        let mut products: Vec<GogProduct> = Vec::new();
        let mut page = 1u32;
        loop {
            let body = self.fetch_products_page(&auth, page).await?;
            let total_pages = body.total_pages.max(1);
            products.extend(body.products);
            if page >= total_pages {
                break;
            }
            page += 1;
        }

        let user_id = binding.platform_user_id.clone();
        let entries: Vec<NormalizedEntry> = stream::iter(products)
            .map(|p| {
                let auth = auth.clone();
                let user_id = user_id.clone();
                async move {
                    let (playtime_minutes, last_played) =
                        match self.fetch_playtime(&auth, &user_id, p.id).await {
                            Ok(v) => v,
                            Err(err) => {
                                warn!(product = p.id, error = %err, "gog: sessions lookup failed, keeping entry with zero playtime");
                                (0, None)
                            }
                        };
                    NormalizedEntry {
                        game: NormalizedGame {
                            external_id: p.id.to_string(),
                            name: p.title,
                            release_date: release_year_to_date(p.release_date),
                            header_image: p.image,
                        },
                        playtime_minutes,
                        last_played,
                        achievements_total: None,
                        achievements_unlocked: None,
                    }
                }
            })
            .buffer_unordered(self.session_concurrency)
            .collect()
            .await;
        Ok(entries)
    }

    async fn fetch_achievements(
        &self,
        binding: &PlatformBinding,
        game: &NormalizedGame,
    ) -> Result<Vec<NormalizedAchievement>, AdapterError> {
        let auth = Self::bearer(binding)?;
        let url = format!(
            "{GAMEPLAY_HOST}/clients/{}/users/{}/achievements",
            game.external_id, binding.platform_user_id
        );
        let resp = self
            .client
            .get(&url)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "gog achievements"))?;
        // No achievement support for this title.
        if resp.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "gog achievements"));
        }
        let body: AchievementsResp = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "gog achievements"))?;
        Ok(normalize_achievements(body.items))
    }

    async fn fetch_price(
        &self,
        external_id: &str,
    ) -> Result<Option<NormalizedPrice>, AdapterError> {
        let url = format!("{API_HOST}/products/{external_id}/prices");
        let resp = self
            .client
            .get(&url)
            .query(&[("countryCode", self.country.as_str())])
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "gog prices"))?;
        if !resp.status().is_success() {
            return Err(AdapterError::from_status(resp.status(), "gog prices"));
        }
        let body: PricesResp = resp
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, "gog prices"))?;
        let Some(price) = body.embedded.and_then(|e| e.prices.into_iter().next()) else {
            return Ok(None);
        };
        let base = price.base_price.as_deref().and_then(parse_price_minor);
        let fin = price.final_price.as_deref().and_then(parse_price_minor);
        Ok(match (fin, base) {
            (Some(current), Some(original)) => {
                Some(NormalizedPrice::from_prices(current, original))
            }
            (Some(current), None) => Some(NormalizedPrice::from_prices(current, current)),
            _ => None,
        })
    }
}
