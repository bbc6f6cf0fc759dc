//! Identity resolution: map a platform-specific game identifier to a
//! canonical game, creating one when no confident match exists.

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::adapters::NormalizedGame;
use crate::model::PlatformId;
use crate::normalization::name::{NameKey, NEAR_MISS_SIMILARITY};
use crate::store::{CatalogStore, NewCanonicalGame};

/// Candidates whose release years differ by more than this are not the
/// same game even under an identical name key (remakes, reboots).
const RELEASE_YEAR_TOLERANCE: i32 = 1;

/// Prefix length for the near-miss scan behind speculative creations.
const NEAR_MISS_PREFIX_LEN: usize = 4;
const NEAR_MISS_SCAN_LIMIT: usize = 50;

/// Outcome of resolving one platform identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub game_id: i64,
    /// A new canonical game was created for this identifier. Creations are
    /// always speculative: they happened without a high-confidence match
    /// and are pending manual review.
    pub created: bool,
    /// More than one existing game matched; surfaced in the job error list
    /// so the speculative row gets reviewed.
    pub ambiguous: bool,
}

/// Resolve `game` as reported by `platform` to a canonical game id.
///
/// 1. An existing platform-id binding is authoritative.
/// 2. Otherwise match on name-key equality + release-year proximity; a
///    single candidate wins and the identifier is bound to it.
/// 3. Otherwise create a new speculative game. Two already-distinct
///    canonical games are never merged here; cross-platform duplicate
///    correction stays a manual action.
pub async fn resolve<S: CatalogStore + ?Sized>(
    store: &S,
    platform: PlatformId,
    game: &NormalizedGame,
) -> Result<Resolution> {
    if let Some(game_id) = store.game_for_external(platform, &game.external_id).await? {
        return Ok(Resolution {
            game_id,
            created: false,
            ambiguous: false,
        });
    }

    let key = NameKey::new(&game.name);
    let candidates = if key.is_empty() {
        Vec::new()
    } else {
        store
            .games_by_name_key(key.normalized())
            .await?
            .into_iter()
            .filter(|c| years_compatible(c.release_date, game.release_date))
            .collect()
    };

    if candidates.len() == 1 {
        let matched = &candidates[0];
        store
            .bind_external(platform, &game.external_id, matched.game_id)
            .await?;
        info!(
            platform = %platform,
            external_id = %game.external_id,
            game_id = matched.game_id,
            "resolver: bound identifier to existing game"
        );
        return Ok(Resolution {
            game_id: matched.game_id,
            created: false,
            ambiguous: false,
        });
    }

    let ambiguous = candidates.len() > 1;
    if ambiguous {
        warn!(
            platform = %platform,
            external_id = %game.external_id,
            name = %game.name,
            candidates = candidates.len(),
            "resolver: ambiguous name match, creating speculative game"
        );
    } else if !key.is_empty() {
        log_near_miss(store, &key).await?;
    }

    let created = store
        .insert_game(NewCanonicalGame {
            name: game.name.clone(),
            name_key: key.normalized().to_string(),
            release_date: game.release_date,
            header_image: game.header_image.clone(),
            speculative: true,
        })
        .await?;
    store
        .bind_external(platform, &game.external_id, created.game_id)
        .await?;
    Ok(Resolution {
        game_id: created.game_id,
        created: true,
        ambiguous,
    })
}

fn years_compatible(a: Option<NaiveDate>, b: Option<NaiveDate>) -> bool {
    use chrono::Datelike;
    match (a, b) {
        (Some(a), Some(b)) => (a.year() - b.year()).abs() <= RELEASE_YEAR_TOLERANCE,
        // Several platforms report no release date; the name key has to
        // carry the match alone.
        _ => true,
    }
}

/// Surface the closest existing title for the reviewer of a speculative
/// creation. Best effort; a miss here never fails resolution.
async fn log_near_miss<S: CatalogStore + ?Sized>(store: &S, key: &NameKey) -> Result<()> {
    let prefix: String = key.normalized().chars().take(NEAR_MISS_PREFIX_LEN).collect();
    if prefix.len() < NEAR_MISS_PREFIX_LEN {
        return Ok(());
    }
    let neighbors = store
        .games_by_key_prefix(&prefix, NEAR_MISS_SCAN_LIMIT)
        .await?;
    let best = neighbors
        .iter()
        .map(|g| (g, key.similarity(&NameKey::new(&g.name))))
        .filter(|(_, score)| *score >= NEAR_MISS_SIMILARITY)
        .max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((game, score)) = best {
        info!(
            near_game_id = game.game_id,
            near_name = %game.name,
            score,
            "resolver: speculative creation has a near-miss candidate"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn game(external_id: &str, name: &str, year: Option<i32>) -> NormalizedGame {
        NormalizedGame {
            external_id: external_id.into(),
            name: name.into(),
            release_date: year.and_then(|y| NaiveDate::from_ymd_opt(y, 6, 1)),
            header_image: None,
        }
    }

    #[tokio::test]
    async fn existing_mapping_is_authoritative() {
        let store = MemoryStore::new();
        let first = resolve(&store, PlatformId::Steam, &game("620", "Portal 2", Some(2011)))
            .await
            .unwrap();
        assert!(first.created);

        let again = resolve(&store, PlatformId::Steam, &game("620", "Renamed Portal", None))
            .await
            .unwrap();
        assert_eq!(again.game_id, first.game_id);
        assert!(!again.created);
    }

    #[tokio::test]
    async fn single_candidate_binds_across_platforms() {
        let store = MemoryStore::new();
        let steam = resolve(&store, PlatformId::Steam, &game("620", "Portal 2", Some(2011)))
            .await
            .unwrap();

        let gog = resolve(&store, PlatformId::Gog, &game("1207664663", "Portal 2", Some(2011)))
            .await
            .unwrap();
        assert_eq!(gog.game_id, steam.game_id);
        assert!(!gog.created);
        assert!(!gog.ambiguous);
    }

    #[tokio::test]
    async fn year_gap_blocks_the_match() {
        let store = MemoryStore::new();
        let original = resolve(
            &store,
            PlatformId::Steam,
            &game("10", "Resident Evil 4", Some(2005)),
        )
        .await
        .unwrap();

        let remake = resolve(
            &store,
            PlatformId::Psn,
            &game("NPWR1_00", "Resident Evil 4", Some(2023)),
        )
        .await
        .unwrap();
        assert_ne!(remake.game_id, original.game_id);
        assert!(remake.created);
        assert!(!remake.ambiguous);
    }

    #[tokio::test]
    async fn multiple_candidates_create_ambiguous_speculative() {
        let store = MemoryStore::new();
        // two distinct canonical games, decades apart, same key
        resolve(&store, PlatformId::Steam, &game("1", "Doom", Some(1993)))
            .await
            .unwrap();
        resolve(&store, PlatformId::Gog, &game("2", "Doom", Some(2016)))
            .await
            .unwrap();

        let third = resolve(&store, PlatformId::Xbox, &game("3", "Doom", None))
            .await
            .unwrap();
        assert!(third.created);
        assert!(third.ambiguous);
    }

    #[tokio::test]
    async fn missing_years_still_match_on_name() {
        let store = MemoryStore::new();
        let steam = resolve(&store, PlatformId::Steam, &game("620", "Portal 2", None))
            .await
            .unwrap();
        let xbox = resolve(&store, PlatformId::Xbox, &game("999", "Portal 2", Some(2011)))
            .await
            .unwrap();
        assert_eq!(xbox.game_id, steam.game_id);
    }
}
