//! Sync orchestration: owns the per-(user, platform) job lifecycle and
//! drives adapter → resolver → merger → recompute. One accepted request is
//! one spawned task; the keyed lease keeps concurrent requests for the same
//! account out, a per-platform semaphore keeps the platform's rate limits
//! honest.

pub mod lease;
pub mod retry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::PlatformAdapter;
use crate::error::{AdapterError, SyncFailure};
use crate::merger;
use crate::model::{
    AchievementState, JobItemError, JobState, PlatformId, PlatformLibraryEntry, SyncJob, SyncMode,
};
use crate::resolver;
use crate::store::SyncStore;
use crate::util::env::env_parse;

use lease::KeyedLease;
use retry::{run_with_retry, RetryPolicy};

/// Floor for submit-time estimates when no prior job informs one.
const MIN_ESTIMATED_SECS: i64 = 30;

#[derive(Debug, Clone, Copy)]
pub struct SyncRequest {
    pub user_id: i64,
    pub platform: PlatformId,
    pub mode: SyncMode,
}

/// Accepted-request receipt handed back to the caller.
#[derive(Debug, Clone, Copy)]
pub struct SyncTicket {
    pub task_id: Uuid,
    pub state: JobState,
    pub estimated_secs: i64,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Mutual exclusion: one active job per (user, platform).
    #[error("a sync job for user {user_id} on {platform} is already active")]
    AlreadyRunning { user_id: i64, platform: PlatformId },
    #[error("no adapter registered for {0}")]
    UnsupportedPlatform(PlatformId),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct SyncOrchestrator {
    store: Arc<dyn SyncStore>,
    adapters: HashMap<PlatformId, Arc<dyn PlatformAdapter>>,
    leases: KeyedLease,
    limits: HashMap<PlatformId, Arc<Semaphore>>,
    retry: RetryPolicy,
    cancel_flags: std::sync::Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
    handles: std::sync::Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl SyncOrchestrator {
    /// Env: SYNC_PLATFORM_CONCURRENCY bounds concurrent jobs per platform;
    /// retry tuning via SYNC_RETRY_*.
    pub fn new(
        store: Arc<dyn SyncStore>,
        adapters: Vec<Arc<dyn PlatformAdapter>>,
    ) -> Self {
        let per_platform = env_parse("SYNC_PLATFORM_CONCURRENCY", 2usize).max(1);
        let mut map: HashMap<PlatformId, Arc<dyn PlatformAdapter>> = HashMap::new();
        let mut limits = HashMap::new();
        for adapter in adapters {
            limits.insert(adapter.platform(), Arc::new(Semaphore::new(per_platform)));
            map.insert(adapter.platform(), adapter);
        }
        Self {
            store,
            adapters: map,
            leases: KeyedLease::new(),
            limits,
            retry: RetryPolicy::from_env(),
            cancel_flags: std::sync::Mutex::new(HashMap::new()),
            handles: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Accept a sync request: queue a job and spawn its task. Rejected when
    /// a job for the same (user, platform) is already active.
    pub async fn submit(self: &Arc<Self>, req: SyncRequest) -> Result<SyncTicket, SubmitError> {
        let adapter = self
            .adapters
            .get(&req.platform)
            .cloned()
            .ok_or(SubmitError::UnsupportedPlatform(req.platform))?;
        let Some(lease) = self.leases.try_acquire(req.user_id, req.platform) else {
            return Err(SubmitError::AlreadyRunning {
                user_id: req.user_id,
                platform: req.platform,
            });
        };

        let job = SyncJob {
            task_id: Uuid::new_v4(),
            user_id: req.user_id,
            platform: req.platform,
            mode: req.mode,
            state: JobState::Queued,
            games_synced: 0,
            achievements_synced: 0,
            errors: Vec::new(),
            anomalies: Vec::new(),
            failure: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        // Estimate from the previous job's counters, so read it before the
        // fresh zero-counter job lands in the store.
        let estimated_secs = self.estimate(req.user_id, req.platform).await;
        self.store.upsert_job(&job).await?;

        let cancel = Arc::new(AtomicBool::new(false));
        lock_map(&self.cancel_flags).insert(job.task_id, Arc::clone(&cancel));

        let task_id = job.task_id;
        let limit = self
            .limits
            .get(&req.platform)
            .cloned()
            .unwrap_or_else(|| Arc::new(Semaphore::new(1)));
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // Lease covers the whole task, including time queued on the
            // platform's semaphore.
            let _lease = lease;
            let _permit = limit.acquire_owned().await;
            this.run_job(job, adapter, cancel).await;
            lock_map(&this.cancel_flags).remove(&task_id);
        });
        lock_map(&self.handles).insert(task_id, handle);

        info!(%task_id, user = req.user_id, platform = %req.platform, "sync job queued");
        Ok(SyncTicket {
            task_id,
            state: JobState::Queued,
            estimated_secs,
        })
    }

    /// Current job record for a poll.
    pub async fn status(&self, task_id: Uuid) -> Result<Option<SyncJob>> {
        self.store.job(task_id).await
    }

    /// Request cancellation. Returns false for unknown or already terminal
    /// jobs. Merges committed before the flag is honored stay committed.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        match lock_map(&self.cancel_flags).get(&task_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Block until the job's task finished (tests and the CLI poll loop).
    pub async fn wait(&self, task_id: Uuid) -> Result<()> {
        let handle = lock_map(&self.handles).remove(&task_id);
        if let Some(handle) = handle {
            handle.await.map_err(|e| anyhow::anyhow!("sync task panicked: {e}"))?;
        }
        Ok(())
    }

    async fn estimate(&self, user_id: i64, platform: PlatformId) -> i64 {
        match self.store.latest_job(user_id, platform).await {
            Ok(Some(prior)) => {
                let est =
                    prior.games_synced as i64 / 10 + prior.achievements_synced as i64 / 100;
                est.max(MIN_ESTIMATED_SECS)
            }
            _ => MIN_ESTIMATED_SECS,
        }
    }

    async fn run_job(
        &self,
        mut job: SyncJob,
        adapter: Arc<dyn PlatformAdapter>,
        cancel: Arc<AtomicBool>,
    ) {
        job.state = JobState::Running;
        job.started_at = Some(Utc::now());
        if let Err(err) = self.store.upsert_job(&job).await {
            error!(task_id = %job.task_id, error = %err, "failed to persist running state");
        }

        match self.execute(&mut job, adapter.as_ref(), &cancel).await {
            Ok(()) => {
                job.state = if job.errors.is_empty() {
                    JobState::Completed
                } else {
                    JobState::Partial
                };
            }
            Err(failure) => {
                job.state = JobState::Failed;
                job.failure = Some(failure.to_string());
            }
        }
        job.finished_at = Some(Utc::now());
        if let Err(err) = self.store.upsert_job(&job).await {
            error!(task_id = %job.task_id, error = %err, "failed to persist terminal state");
        }
        info!(
            task_id = %job.task_id,
            state = ?job.state,
            games = job.games_synced,
            achievements = job.achievements_synced,
            item_errors = job.errors.len(),
            anomalies = job.anomalies.len(),
            "sync job finished"
        );
    }

    /// The fetch → resolve → merge → recompute pipeline for one job.
    /// Per-item failures land in `job.errors`; a returned error is fatal to
    /// the job.
    async fn execute(
        &self,
        job: &mut SyncJob,
        adapter: &dyn PlatformAdapter,
        cancel: &AtomicBool,
    ) -> Result<(), SyncFailure> {
        let store = self.store.as_ref();
        let internal = |e: anyhow::Error| SyncFailure::Internal(e.to_string());

        let binding = store
            .binding(job.user_id, job.platform)
            .await
            .map_err(internal)?
            .filter(|b| b.active)
            .ok_or(SyncFailure::NoBinding)?;
        let started = Utc::now();
        if binding.is_expired(started) {
            return Err(SyncFailure::AuthExpired);
        }
        if cancel.load(Ordering::SeqCst) {
            return Err(SyncFailure::Cancelled);
        }

        let watermark = match job.mode {
            SyncMode::Incremental => binding.last_sync_time,
            SyncMode::Full => None,
        };

        let fetched = run_with_retry(&self.retry, "fetch_library", || {
            adapter.fetch_library(&binding, watermark)
        })
        .await
        .map_err(|err| match err {
            AdapterError::AuthExpired => SyncFailure::AuthExpired,
            AdapterError::Transient(msg) => SyncFailure::Exhausted(msg),
            AdapterError::NotFound(what) => {
                SyncFailure::Internal(format!("platform account data missing: {what}"))
            }
        })?;
        info!(
            task_id = %job.task_id,
            platform = %job.platform,
            entries = fetched.len(),
            incremental = watermark.is_some(),
            "library fetched"
        );

        let current_entries = store
            .entries_for_account(job.platform, &binding.platform_user_id)
            .await
            .map_err(internal)?;
        let current_states = store
            .achievement_states(job.user_id, job.platform)
            .await
            .map_err(internal)?;

        let mut incoming_entries: Vec<PlatformLibraryEntry> = Vec::new();
        let mut incoming_states: Vec<AchievementState> = Vec::new();

        for item in fetched {
            if cancel.load(Ordering::SeqCst) {
                return Err(SyncFailure::Cancelled);
            }

            let resolution = resolver::resolve(store, job.platform, &item.game)
                .await
                .map_err(internal)?;
            if resolution.ambiguous {
                job.anomalies.push(format!(
                    "{}: ambiguous canonical match, speculative game {} created for review",
                    item.game.external_id, resolution.game_id
                ));
            }

            let mut entry = PlatformLibraryEntry {
                platform_user_id: binding.platform_user_id.clone(),
                platform: job.platform,
                game_id: resolution.game_id,
                playtime_minutes: item.playtime_minutes,
                last_played: item.last_played,
                achievements_total: item.achievements_total,
                achievements_unlocked: item.achievements_unlocked,
            };

            match run_with_retry(&self.retry, "fetch_achievements", || {
                adapter.fetch_achievements(&binding, &item.game)
            })
            .await
            {
                Ok(achievements) => {
                    if !achievements.is_empty() {
                        // The detailed list beats the library endpoint's
                        // counters.
                        entry.achievements_total = Some(achievements.len() as i64);
                        entry.achievements_unlocked =
                            Some(achievements.iter().filter(|a| a.unlocked).count() as i64);
                    }
                    for ach in achievements {
                        let achievement_id = store
                            .ensure_achievement(resolution.game_id, &ach.external_id, &ach.name)
                            .await
                            .map_err(internal)?;
                        incoming_states.push(AchievementState {
                            user_id: job.user_id,
                            achievement_id,
                            platform: job.platform,
                            unlocked: ach.unlocked,
                            unlock_time: ach.unlock_time,
                        });
                        job.achievements_synced += 1;
                    }
                }
                Err(AdapterError::AuthExpired) => return Err(SyncFailure::AuthExpired),
                Err(err) => {
                    warn!(
                        task_id = %job.task_id,
                        game = %item.game.external_id,
                        error = %err,
                        "achievement fetch failed, continuing with remaining items"
                    );
                    job.errors.push(JobItemError {
                        game_ref: item.game.external_id.clone(),
                        message: format!("achievements: {err}"),
                    });
                }
            }

            incoming_entries.push(entry);
            job.games_synced += 1;
        }

        if cancel.load(Ordering::SeqCst) {
            return Err(SyncFailure::Cancelled);
        }

        let batch = merger::plan(
            &current_entries,
            incoming_entries,
            &current_states,
            incoming_states,
        );
        job.anomalies
            .extend(batch.anomalies.iter().map(|a| a.to_string()));

        let summary = store
            .commit_merge(job.user_id, &batch)
            .await
            .map_err(internal)?;
        info!(
            task_id = %job.task_id,
            user = job.user_id,
            games_owned = summary.total_games_owned,
            playtime = summary.total_playtime_minutes,
            "merge committed, summary recomputed"
        );

        // The watermark moves to the job's start time so changes landing
        // mid-sync are picked up next round.
        store
            .set_last_sync_time(binding.binding_id, started)
            .await
            .map_err(internal)?;
        Ok(())
    }
}

fn lock_map<K, V>(
    m: &std::sync::Mutex<HashMap<K, V>>,
) -> std::sync::MutexGuard<'_, HashMap<K, V>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{NormalizedAchievement, NormalizedEntry, NormalizedGame, NormalizedPrice};
    use crate::aggregate;
    use crate::model::PlatformBinding;
    use crate::store::{LibraryStore, MemoryStore};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::time::Duration;

    fn entry(external_id: &str, name: &str, playtime: i64) -> NormalizedEntry {
        NormalizedEntry {
            game: NormalizedGame {
                external_id: external_id.into(),
                name: name.into(),
                release_date: None,
                header_image: None,
            },
            playtime_minutes: playtime,
            last_played: None,
            achievements_total: None,
            achievements_unlocked: None,
        }
    }

    /// Scripted adapter fixture.
    #[derive(Default)]
    struct StubAdapter {
        library: Vec<NormalizedEntry>,
        library_error: Option<AdapterError>,
        achievements: HashMap<String, Vec<NormalizedAchievement>>,
        achievement_errors: HashMap<String, AdapterError>,
        delay: Option<Duration>,
        seen_watermarks: Arc<std::sync::Mutex<Vec<Option<DateTime<Utc>>>>>,
    }

    #[async_trait]
    impl PlatformAdapter for StubAdapter {
        fn platform(&self) -> PlatformId {
            PlatformId::Steam
        }

        fn supports_incremental(&self) -> bool {
            true
        }

        async fn fetch_library(
            &self,
            _binding: &PlatformBinding,
            watermark: Option<DateTime<Utc>>,
        ) -> Result<Vec<NormalizedEntry>, AdapterError> {
            self.seen_watermarks
                .lock()
                .expect("test mutex")
                .push(watermark);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = &self.library_error {
                return Err(err.clone());
            }
            Ok(self.library.clone())
        }

        async fn fetch_achievements(
            &self,
            _binding: &PlatformBinding,
            game: &NormalizedGame,
        ) -> Result<Vec<NormalizedAchievement>, AdapterError> {
            if let Some(err) = self.achievement_errors.get(&game.external_id) {
                return Err(err.clone());
            }
            Ok(self
                .achievements
                .get(&game.external_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn fetch_price(
            &self,
            _external_id: &str,
        ) -> Result<Option<NormalizedPrice>, AdapterError> {
            Ok(None)
        }
    }

    fn binding(user_id: i64) -> PlatformBinding {
        PlatformBinding {
            binding_id: 500 + user_id,
            user_id,
            platform: PlatformId::Steam,
            platform_user_id: format!("acct-{user_id}"),
            access_token: Some("token".into()),
            active: true,
            expire_time: Utc::now() + ChronoDuration::hours(2),
            last_sync_time: None,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    async fn orchestrator(
        store: Arc<MemoryStore>,
        adapter: StubAdapter,
    ) -> Arc<SyncOrchestrator> {
        let mut orch = SyncOrchestrator::new(store, vec![Arc::new(adapter)]);
        orch.retry = fast_retry();
        Arc::new(orch)
    }

    async fn run_sync(orch: &Arc<SyncOrchestrator>, user_id: i64, mode: SyncMode) -> SyncJob {
        let ticket = orch
            .submit(SyncRequest {
                user_id,
                platform: PlatformId::Steam,
                mode,
            })
            .await
            .expect("submit");
        orch.wait(ticket.task_id).await.expect("wait");
        orch.status(ticket.task_id)
            .await
            .expect("status")
            .expect("job exists")
    }

    #[tokio::test]
    async fn full_sync_builds_entries_and_summary() {
        let store = Arc::new(MemoryStore::new());
        store.add_binding(binding(1)).await;
        let adapter = StubAdapter {
            library: vec![entry("A", "Alpha Saga", 120), entry("B", "Beta Quest", 0)],
            ..Default::default()
        };
        let orch = orchestrator(Arc::clone(&store), adapter).await;

        let job = run_sync(&orch, 1, SyncMode::Full).await;
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.games_synced, 2);

        let entries = store.entries_for_user(1).await.unwrap();
        assert_eq!(entries.len(), 2);
        let summary = store.summary(1).await.unwrap().unwrap();
        assert_eq!(summary.total_games_owned, 2);
        assert_eq!(summary.games_played, 1);
        assert_eq!(summary.total_playtime_minutes, 120);
    }

    #[tokio::test]
    async fn repeated_full_sync_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        store.add_binding(binding(1)).await;
        let adapter = StubAdapter {
            library: vec![entry("A", "Alpha Saga", 120), entry("B", "Beta Quest", 0)],
            ..Default::default()
        };
        let orch = orchestrator(Arc::clone(&store), adapter).await;

        let first = run_sync(&orch, 1, SyncMode::Full).await;
        let summary_after_first = store.summary(1).await.unwrap().unwrap();
        let second = run_sync(&orch, 1, SyncMode::Full).await;

        assert_eq!(first.state, JobState::Completed);
        assert_eq!(second.state, JobState::Completed);
        assert!(second.anomalies.is_empty());
        let entries = store.entries_for_user(1).await.unwrap();
        assert_eq!(entries.len(), 2, "no duplicate rows from the replay");
        assert_eq!(store.summary(1).await.unwrap().unwrap(), summary_after_first);
    }

    #[tokio::test]
    async fn playtime_decrease_logs_anomaly_but_completes() {
        let store = Arc::new(MemoryStore::new());
        store.add_binding(binding(1)).await;
        let orch = orchestrator(
            Arc::clone(&store),
            StubAdapter {
                library: vec![entry("A", "Alpha Saga", 120)],
                ..Default::default()
            },
        )
        .await;
        run_sync(&orch, 1, SyncMode::Full).await;

        let orch = orchestrator(
            Arc::clone(&store),
            StubAdapter {
                library: vec![entry("A", "Alpha Saga", 90)],
                ..Default::default()
            },
        )
        .await;
        let job = run_sync(&orch, 1, SyncMode::Full).await;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.anomalies.len(), 1);
        assert!(job.anomalies[0].contains("playtime decrease"));
        let entries = store.entries_for_user(1).await.unwrap();
        assert_eq!(entries[0].playtime_minutes, 120);
    }

    #[tokio::test]
    async fn achievement_item_failure_yields_partial() {
        let store = Arc::new(MemoryStore::new());
        store.add_binding(binding(1)).await;
        let mut achievement_errors = HashMap::new();
        achievement_errors.insert(
            "B".to_string(),
            AdapterError::Transient("trophy backend down".into()),
        );
        let mut achievements = HashMap::new();
        achievements.insert(
            "A".to_string(),
            vec![NormalizedAchievement {
                external_id: "ACH_1".into(),
                name: "First Steps".into(),
                unlocked: true,
                unlock_time: Some(Utc::now()),
            }],
        );
        let orch = orchestrator(
            Arc::clone(&store),
            StubAdapter {
                library: vec![entry("A", "Alpha Saga", 60), entry("B", "Beta Quest", 30)],
                achievements,
                achievement_errors,
                ..Default::default()
            },
        )
        .await;

        let job = run_sync(&orch, 1, SyncMode::Full).await;
        assert_eq!(job.state, JobState::Partial);
        assert_eq!(job.errors.len(), 1);
        assert_eq!(job.errors[0].game_ref, "B");
        assert_eq!(job.achievements_synced, 1);
        // the failed item did not block the merge of either entry
        assert_eq!(store.entries_for_user(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn auth_expiry_fails_the_job() {
        let store = Arc::new(MemoryStore::new());
        store.add_binding(binding(1)).await;
        let orch = orchestrator(
            Arc::clone(&store),
            StubAdapter {
                library_error: Some(AdapterError::AuthExpired),
                ..Default::default()
            },
        )
        .await;
        let job = run_sync(&orch, 1, SyncMode::Full).await;
        assert_eq!(job.state, JobState::Failed);
        assert!(job.failure.as_deref().unwrap().contains("expired"));
    }

    #[tokio::test]
    async fn expired_binding_fails_without_network() {
        let store = Arc::new(MemoryStore::new());
        let mut b = binding(1);
        b.expire_time = Utc::now() - ChronoDuration::hours(1);
        store.add_binding(b).await;
        let orch = orchestrator(Arc::clone(&store), StubAdapter::default()).await;
        let job = run_sync(&orch, 1, SyncMode::Full).await;
        assert_eq!(job.state, JobState::Failed);
        assert!(job.failure.as_deref().unwrap().contains("expired"));
    }

    #[tokio::test]
    async fn transient_exhaustion_fails_the_job() {
        let store = Arc::new(MemoryStore::new());
        store.add_binding(binding(1)).await;
        let orch = orchestrator(
            Arc::clone(&store),
            StubAdapter {
                library_error: Some(AdapterError::Transient("rate limited".into())),
                ..Default::default()
            },
        )
        .await;
        let job = run_sync(&orch, 1, SyncMode::Full).await;
        assert_eq!(job.state, JobState::Failed);
        assert!(job.failure.as_deref().unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn concurrent_submit_for_same_key_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.add_binding(binding(1)).await;
        let orch = orchestrator(
            Arc::clone(&store),
            StubAdapter {
                library: vec![entry("A", "Alpha Saga", 10)],
                delay: Some(Duration::from_millis(100)),
                ..Default::default()
            },
        )
        .await;

        let ticket = orch
            .submit(SyncRequest {
                user_id: 1,
                platform: PlatformId::Steam,
                mode: SyncMode::Full,
            })
            .await
            .expect("first submit");
        let second = orch
            .submit(SyncRequest {
                user_id: 1,
                platform: PlatformId::Steam,
                mode: SyncMode::Full,
            })
            .await;
        assert!(matches!(second, Err(SubmitError::AlreadyRunning { .. })));

        orch.wait(ticket.task_id).await.unwrap();
        // lease released: a follow-up submit is accepted again
        assert!(orch
            .submit(SyncRequest {
                user_id: 1,
                platform: PlatformId::Steam,
                mode: SyncMode::Full,
            })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn cancellation_reaches_failed_with_reason() {
        let store = Arc::new(MemoryStore::new());
        store.add_binding(binding(1)).await;
        let orch = orchestrator(
            Arc::clone(&store),
            StubAdapter {
                library: vec![entry("A", "Alpha Saga", 10)],
                delay: Some(Duration::from_millis(100)),
                ..Default::default()
            },
        )
        .await;
        let ticket = orch
            .submit(SyncRequest {
                user_id: 1,
                platform: PlatformId::Steam,
                mode: SyncMode::Full,
            })
            .await
            .unwrap();
        assert!(orch.cancel(ticket.task_id));
        orch.wait(ticket.task_id).await.unwrap();
        let job = orch.status(ticket.task_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn incremental_passes_watermark_after_first_sync() {
        let store = Arc::new(MemoryStore::new());
        store.add_binding(binding(1)).await;
        let marks = Arc::new(std::sync::Mutex::new(Vec::new()));
        let adapter = StubAdapter {
            library: vec![entry("A", "Alpha Saga", 10)],
            seen_watermarks: Arc::clone(&marks),
            ..Default::default()
        };
        let orch = orchestrator(Arc::clone(&store), adapter).await;

        run_sync(&orch, 1, SyncMode::Full).await;
        let b = store.binding(1, PlatformId::Steam).await.unwrap().unwrap();
        assert!(b.last_sync_time.is_some(), "watermark advanced");

        run_sync(&orch, 1, SyncMode::Incremental).await;
        let seen = marks.lock().expect("test mutex").clone();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_none(), "full sync carries no watermark");
        assert_eq!(seen[1], b.last_sync_time, "incremental passes the stored watermark");
    }

    #[tokio::test]
    async fn summary_always_equals_full_scan() {
        let store = Arc::new(MemoryStore::new());
        store.add_binding(binding(1)).await;
        let mut achievements = HashMap::new();
        achievements.insert(
            "A".to_string(),
            vec![
                NormalizedAchievement {
                    external_id: "ACH_1".into(),
                    name: "One".into(),
                    unlocked: true,
                    unlock_time: Some(Utc::now()),
                },
                NormalizedAchievement {
                    external_id: "ACH_2".into(),
                    name: "Two".into(),
                    unlocked: false,
                    unlock_time: None,
                },
            ],
        );
        let orch = orchestrator(
            Arc::clone(&store),
            StubAdapter {
                library: vec![entry("A", "Alpha Saga", 300), entry("B", "Beta Quest", 0)],
                achievements,
                ..Default::default()
            },
        )
        .await;
        run_sync(&orch, 1, SyncMode::Full).await;

        let stored = store.summary(1).await.unwrap().unwrap();
        let entries = store.entries_for_user(1).await.unwrap();
        let states = store.achievement_states_for_user(1).await.unwrap();
        let rescanned = aggregate::summarize(1, Utc::now(), &entries, &states);
        assert_eq!(stored, rescanned);
        assert_eq!(stored.unlocked_achievements, 1);
        assert_eq!(stored.total_achievements, 2);
    }
}
