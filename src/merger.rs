//! Library merger: turns resolved adapter output into an idempotent batch
//! of row upserts. Planning is pure; `LibraryStore::commit_merge` applies a
//! batch (plus the summary recompute) as one atomic unit.

use std::collections::HashMap;

use tracing::warn;

use crate::error::MergeAnomaly;
use crate::model::{AchievementState, PlatformLibraryEntry};

/// Row writes for one job. Rows identical to what is already stored are
/// not included, so replaying a sync against unchanged data produces an
/// empty batch.
#[derive(Debug, Clone, Default)]
pub struct MergeBatch {
    pub entry_upserts: Vec<PlatformLibraryEntry>,
    pub achievement_upserts: Vec<AchievementState>,
    pub anomalies: Vec<MergeAnomaly>,
}

impl MergeBatch {
    pub fn is_empty(&self) -> bool {
        self.entry_upserts.is_empty() && self.achievement_upserts.is_empty()
    }
}

/// Compute the batch for one job from the currently stored rows and the
/// incoming resolved rows.
///
/// Playtime only moves up: platform counters can reset, so a reported
/// decrease keeps the stored maximum and is recorded as an anomaly rather
/// than silently accepted. Achievement unlocks only flip false→true.
pub fn plan(
    current_entries: &[PlatformLibraryEntry],
    incoming_entries: Vec<PlatformLibraryEntry>,
    current_states: &[AchievementState],
    incoming_states: Vec<AchievementState>,
) -> MergeBatch {
    let mut batch = MergeBatch::default();

    let by_game: HashMap<i64, &PlatformLibraryEntry> =
        current_entries.iter().map(|e| (e.game_id, e)).collect();

    for incoming in incoming_entries {
        match by_game.get(&incoming.game_id) {
            None => batch.entry_upserts.push(incoming),
            Some(current) => {
                let mut merged = incoming.clone();
                if incoming.playtime_minutes < current.playtime_minutes {
                    let anomaly = MergeAnomaly::PlaytimeDecrease {
                        game_id: incoming.game_id,
                        stored_minutes: current.playtime_minutes,
                        reported_minutes: incoming.playtime_minutes,
                    };
                    warn!(
                        platform = %incoming.platform,
                        account = %incoming.platform_user_id,
                        "merge anomaly: {anomaly}"
                    );
                    batch.anomalies.push(anomaly);
                    merged.playtime_minutes = current.playtime_minutes;
                }
                merged.last_played = match (current.last_played, incoming.last_played) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                merged.achievements_total =
                    incoming.achievements_total.or(current.achievements_total);
                merged.achievements_unlocked =
                    match (current.achievements_unlocked, incoming.achievements_unlocked) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        (a, b) => a.or(b),
                    };
                if &merged != *current {
                    batch.entry_upserts.push(merged);
                }
            }
        }
    }

    let by_key: HashMap<(i64, i64), &AchievementState> = current_states
        .iter()
        .map(|s| ((s.achievement_id, s.user_id), s))
        .collect();

    for incoming in incoming_states {
        match by_key.get(&(incoming.achievement_id, incoming.user_id)) {
            None => batch.achievement_upserts.push(incoming),
            Some(current) => {
                if current.unlocked && !incoming.unlocked {
                    let anomaly = MergeAnomaly::AchievementRevoked {
                        achievement_id: incoming.achievement_id,
                    };
                    warn!(
                        platform = %incoming.platform,
                        user = incoming.user_id,
                        "merge anomaly: {anomaly}"
                    );
                    batch.anomalies.push(anomaly);
                    continue;
                }
                let mut merged = incoming.clone();
                if current.unlocked {
                    // Keep the first recorded unlock time.
                    merged.unlock_time = current.unlock_time.or(incoming.unlock_time);
                }
                if &merged != *current {
                    batch.achievement_upserts.push(merged);
                }
            }
        }
    }

    batch
}
