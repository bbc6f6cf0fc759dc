//! In-memory store: the fixture implementation behind unit tests and
//! standalone runs. One mutex around the whole state keeps each operation
//! atomic, which is exactly the uniqueness/transaction behavior the
//! Postgres store gets from its constraints.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CatalogStore, JobStore, LibraryStore, NewCanonicalGame, PriceStore};
use crate::aggregate;
use crate::merger::MergeBatch;
use crate::model::{
    AchievementState, AlertEvent, AlertKind, CanonicalGame, LibrarySummary, PlatformBinding,
    PlatformId, PlatformLibraryEntry, PriceObservation, SyncJob, WishlistSubscription,
};

#[derive(Default)]
struct State {
    next_id: i64,
    games: HashMap<i64, CanonicalGame>,
    external_ids: HashMap<(PlatformId, String), i64>,
    achievement_ids: HashMap<(i64, String), i64>,
    bindings: HashMap<(i64, PlatformId), PlatformBinding>,
    entries: HashMap<(String, PlatformId, i64), PlatformLibraryEntry>,
    unlock_states: HashMap<(i64, i64, PlatformId), AchievementState>,
    summaries: HashMap<i64, LibrarySummary>,
    jobs: HashMap<Uuid, SyncJob>,
    observations: HashMap<i64, PriceObservation>,
    subscriptions: HashMap<i64, WishlistSubscription>,
    alerts: Vec<AlertEvent>,
    alert_keys: HashSet<(i64, i64)>,
}

impl State {
    fn alloc_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn user_accounts(&self, user_id: i64) -> Vec<(PlatformId, String)> {
        self.bindings
            .values()
            .filter(|b| b.user_id == user_id)
            .map(|b| (b.platform, b.platform_user_id.clone()))
            .collect()
    }

    fn scan_user_entries(&self, user_id: i64) -> Vec<PlatformLibraryEntry> {
        let accounts = self.user_accounts(user_id);
        self.entries
            .values()
            .filter(|e| {
                accounts
                    .iter()
                    .any(|(p, acct)| *p == e.platform && *acct == e.platform_user_id)
            })
            .cloned()
            .collect()
    }

    fn scan_user_states(&self, user_id: i64) -> Vec<AchievementState> {
        self.unlock_states
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    fn recompute(&mut self, user_id: i64) -> LibrarySummary {
        let entries = self.scan_user_entries(user_id);
        let states = self.scan_user_states(user_id);
        let summary = aggregate::summarize(user_id, Utc::now(), &entries, &states);
        self.summaries.insert(user_id, summary.clone());
        summary
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a binding (account-linking is external to this crate).
    pub async fn add_binding(&self, binding: PlatformBinding) {
        let mut state = self.state.lock().await;
        state
            .bindings
            .insert((binding.user_id, binding.platform), binding);
    }

    pub async fn alert_count(&self) -> usize {
        self.state.lock().await.alerts.len()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn game_for_external(
        &self,
        platform: PlatformId,
        external_id: &str,
    ) -> Result<Option<i64>> {
        let state = self.state.lock().await;
        Ok(state.external_ids.get(&(platform, external_id.to_string())).copied())
    }

    async fn games_by_name_key(&self, name_key: &str) -> Result<Vec<CanonicalGame>> {
        let state = self.state.lock().await;
        Ok(state
            .games
            .values()
            .filter(|g| g.name_key == name_key)
            .cloned()
            .collect())
    }

    async fn games_by_key_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<CanonicalGame>> {
        let state = self.state.lock().await;
        Ok(state
            .games
            .values()
            .filter(|g| g.name_key.starts_with(prefix))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_game(&self, game: NewCanonicalGame) -> Result<CanonicalGame> {
        let mut state = self.state.lock().await;
        let game_id = state.alloc_id();
        let row = CanonicalGame {
            game_id,
            name: game.name,
            name_key: game.name_key,
            release_date: game.release_date,
            header_image: game.header_image,
            speculative: game.speculative,
            created_at: Utc::now(),
        };
        state.games.insert(game_id, row.clone());
        Ok(row)
    }

    async fn bind_external(
        &self,
        platform: PlatformId,
        external_id: &str,
        game_id: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .external_ids
            .entry((platform, external_id.to_string()))
            .or_insert(game_id);
        Ok(())
    }

    async fn ensure_achievement(
        &self,
        game_id: i64,
        external_key: &str,
        _name: &str,
    ) -> Result<i64> {
        let mut state = self.state.lock().await;
        if let Some(id) = state.achievement_ids.get(&(game_id, external_key.to_string())) {
            return Ok(*id);
        }
        let id = state.alloc_id();
        state
            .achievement_ids
            .insert((game_id, external_key.to_string()), id);
        Ok(id)
    }
}

#[async_trait]
impl LibraryStore for MemoryStore {
    async fn binding(
        &self,
        user_id: i64,
        platform: PlatformId,
    ) -> Result<Option<PlatformBinding>> {
        let state = self.state.lock().await;
        Ok(state.bindings.get(&(user_id, platform)).cloned())
    }

    async fn set_last_sync_time(&self, binding_id: i64, when: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        for binding in state.bindings.values_mut() {
            if binding.binding_id == binding_id {
                binding.last_sync_time = Some(when);
            }
        }
        Ok(())
    }

    async fn entries_for_account(
        &self,
        platform: PlatformId,
        platform_user_id: &str,
    ) -> Result<Vec<PlatformLibraryEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .values()
            .filter(|e| e.platform == platform && e.platform_user_id == platform_user_id)
            .cloned()
            .collect())
    }

    async fn achievement_states(
        &self,
        user_id: i64,
        platform: PlatformId,
    ) -> Result<Vec<AchievementState>> {
        let state = self.state.lock().await;
        Ok(state
            .unlock_states
            .values()
            .filter(|s| s.user_id == user_id && s.platform == platform)
            .cloned()
            .collect())
    }

    async fn entries_for_user(&self, user_id: i64) -> Result<Vec<PlatformLibraryEntry>> {
        let state = self.state.lock().await;
        Ok(state.scan_user_entries(user_id))
    }

    async fn achievement_states_for_user(&self, user_id: i64) -> Result<Vec<AchievementState>> {
        let state = self.state.lock().await;
        Ok(state.scan_user_states(user_id))
    }

    async fn summary(&self, user_id: i64) -> Result<Option<LibrarySummary>> {
        let state = self.state.lock().await;
        Ok(state.summaries.get(&user_id).cloned())
    }

    async fn commit_merge(&self, user_id: i64, batch: &MergeBatch) -> Result<LibrarySummary> {
        // One lock span = one transaction: rows and summary land together.
        let mut state = self.state.lock().await;
        for entry in &batch.entry_upserts {
            state.entries.insert(
                (
                    entry.platform_user_id.clone(),
                    entry.platform,
                    entry.game_id,
                ),
                entry.clone(),
            );
        }
        for unlock in &batch.achievement_upserts {
            state.unlock_states.insert(
                (unlock.user_id, unlock.achievement_id, unlock.platform),
                unlock.clone(),
            );
        }
        Ok(state.recompute(user_id))
    }

    async fn recompute_summary(&self, user_id: i64) -> Result<LibrarySummary> {
        let mut state = self.state.lock().await;
        Ok(state.recompute(user_id))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn upsert_job(&self, job: &SyncJob) -> Result<()> {
        let mut state = self.state.lock().await;
        state.jobs.insert(job.task_id, job.clone());
        Ok(())
    }

    async fn job(&self, task_id: Uuid) -> Result<Option<SyncJob>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&task_id).cloned())
    }

    async fn latest_job(&self, user_id: i64, platform: PlatformId) -> Result<Option<SyncJob>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.user_id == user_id && j.platform == platform)
            .max_by_key(|j| j.queued_at)
            .cloned())
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn record_observation(
        &self,
        observation: &PriceObservation,
    ) -> Result<PriceObservation> {
        let mut state = self.state.lock().await;
        if observation.observation_id != 0 {
            if let Some(existing) = state.observations.get(&observation.observation_id) {
                return Ok(existing.clone());
            }
            state.next_id = state.next_id.max(observation.observation_id);
            state
                .observations
                .insert(observation.observation_id, observation.clone());
            return Ok(observation.clone());
        }
        let mut stored = observation.clone();
        stored.observation_id = state.alloc_id();
        state.observations.insert(stored.observation_id, stored.clone());
        Ok(stored)
    }

    async fn active_subscriptions(
        &self,
        game_id: i64,
        platform: PlatformId,
    ) -> Result<Vec<WishlistSubscription>> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.is_active && s.game_id == game_id && s.platform == platform)
            .cloned()
            .collect())
    }

    async fn insert_alert_once(
        &self,
        subscription_id: i64,
        observation_id: i64,
        kind: AlertKind,
        triggered_at: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>> {
        let mut state = self.state.lock().await;
        if !state.alert_keys.insert((subscription_id, observation_id)) {
            return Ok(None);
        }
        let alert = AlertEvent {
            alert_id: state.alloc_id(),
            subscription_id,
            observation_id,
            kind,
            triggered_at,
        };
        state.alerts.push(alert.clone());
        Ok(Some(alert))
    }

    async fn upsert_subscription(&self, subscription: &WishlistSubscription) -> Result<i64> {
        let mut state = self.state.lock().await;
        let mut stored = subscription.clone();
        if stored.subscription_id == 0 {
            stored.subscription_id = state.alloc_id();
        }
        let id = stored.subscription_id;
        state.subscriptions.insert(id, stored);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlatformId;

    fn test_binding(user_id: i64, platform: PlatformId, account: &str) -> PlatformBinding {
        PlatformBinding {
            binding_id: user_id * 100 + 1,
            user_id,
            platform,
            platform_user_id: account.into(),
            access_token: Some("token".into()),
            active: true,
            expire_time: Utc::now() + chrono::Duration::hours(1),
            last_sync_time: None,
        }
    }

    #[tokio::test]
    async fn external_binding_is_first_write_wins() {
        let store = MemoryStore::new();
        store
            .bind_external(PlatformId::Steam, "620", 1)
            .await
            .unwrap();
        store
            .bind_external(PlatformId::Steam, "620", 2)
            .await
            .unwrap();
        assert_eq!(
            store
                .game_for_external(PlatformId::Steam, "620")
                .await
                .unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn commit_merge_updates_summary_atomically() {
        let store = MemoryStore::new();
        store
            .add_binding(test_binding(1, PlatformId::Steam, "7656119"))
            .await;
        let batch = MergeBatch {
            entry_upserts: vec![PlatformLibraryEntry {
                platform_user_id: "7656119".into(),
                platform: PlatformId::Steam,
                game_id: 42,
                playtime_minutes: 120,
                last_played: None,
                achievements_total: None,
                achievements_unlocked: None,
            }],
            ..Default::default()
        };
        let summary = store.commit_merge(1, &batch).await.unwrap();
        assert_eq!(summary.total_games_owned, 1);
        assert_eq!(store.summary(1).await.unwrap(), Some(summary));
    }

    #[tokio::test]
    async fn duplicate_alert_key_is_absorbed() {
        let store = MemoryStore::new();
        let first = store
            .insert_alert_once(5, 9, AlertKind::TargetDiscount, Utc::now())
            .await
            .unwrap();
        let second = store
            .insert_alert_once(5, 9, AlertKind::TargetDiscount, Utc::now())
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(store.alert_count().await, 1);
    }

    #[tokio::test]
    async fn replayed_observation_id_returns_stored_row() {
        let store = MemoryStore::new();
        let obs = PriceObservation {
            observation_id: 77,
            game_id: 1,
            platform: PlatformId::Steam,
            current_price_minor: 999,
            original_price_minor: 1999,
            discount_rate: 50,
            recorded_at: Utc::now(),
        };
        let stored = store.record_observation(&obs).await.unwrap();
        assert_eq!(stored.observation_id, 77);
        let replayed = store.record_observation(&obs).await.unwrap();
        assert_eq!(replayed, stored);
    }
}
