//! Summary recomputation: a pure fold over a user's entry and unlock rows.
//! Stores run this (or SQL provably equal to it) inside every merge commit,
//! so the summary can never drift from the rows that produced it.

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;

use crate::model::{AchievementState, LibrarySummary, PlatformLibraryEntry};

/// Window for the "recently played" counters.
pub const RECENT_WINDOW_DAYS: i64 = 14;

/// Full-scan fold. A canonical game owned on several platforms counts once
/// toward ownership, while playtime sums over every per-platform entry.
pub fn summarize(
    user_id: i64,
    now: DateTime<Utc>,
    entries: &[PlatformLibraryEntry],
    states: &[AchievementState],
) -> LibrarySummary {
    let recent_cutoff = now - Duration::days(RECENT_WINDOW_DAYS);

    let total_games_owned = entries.iter().map(|e| e.game_id).unique().count() as i64;
    let games_played = entries
        .iter()
        .filter(|e| e.playtime_minutes > 0)
        .map(|e| e.game_id)
        .unique()
        .count() as i64;
    let total_playtime_minutes = entries.iter().map(|e| e.playtime_minutes).sum();
    let total_achievements = entries
        .iter()
        .filter_map(|e| e.achievements_total)
        .sum::<i64>();
    let unlocked_achievements = states.iter().filter(|s| s.unlocked).count() as i64;

    let recent: Vec<&PlatformLibraryEntry> = entries
        .iter()
        .filter(|e| e.last_played.is_some_and(|played| played >= recent_cutoff))
        .collect();
    let recently_played_count = recent.len() as i64;
    let recent_playtime_minutes = recent.iter().map(|e| e.playtime_minutes).sum();

    LibrarySummary {
        user_id,
        total_games_owned,
        games_played,
        total_playtime_minutes,
        total_achievements,
        unlocked_achievements,
        recently_played_count,
        recent_playtime_minutes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlatformId;
    use chrono::TimeZone;

    fn entry(
        platform: PlatformId,
        game_id: i64,
        playtime: i64,
        last_played: Option<DateTime<Utc>>,
    ) -> PlatformLibraryEntry {
        PlatformLibraryEntry {
            platform_user_id: format!("acct-{platform}"),
            platform,
            game_id,
            playtime_minutes: playtime,
            last_played,
            achievements_total: Some(10),
            achievements_unlocked: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn two_steam_games_one_played() {
        let entries = vec![
            entry(PlatformId::Steam, 1, 120, None),
            entry(PlatformId::Steam, 2, 0, None),
        ];
        let s = summarize(1, now(), &entries, &[]);
        assert_eq!(s.total_games_owned, 2);
        assert_eq!(s.games_played, 1);
        assert_eq!(s.total_playtime_minutes, 120);
    }

    #[test]
    fn cross_platform_ownership_counts_once_but_playtime_sums() {
        let entries = vec![
            entry(PlatformId::Steam, 1, 300, None),
            entry(PlatformId::Gog, 1, 45, None),
            entry(PlatformId::Psn, 2, 0, None),
        ];
        let s = summarize(1, now(), &entries, &[]);
        assert_eq!(s.total_games_owned, 2);
        assert_eq!(s.games_played, 1);
        assert_eq!(s.total_playtime_minutes, 345);
        assert_eq!(s.total_achievements, 30);
    }

    #[test]
    fn recent_window_splits_entries() {
        let fresh = now() - Duration::days(3);
        let stale = now() - Duration::days(40);
        let entries = vec![
            entry(PlatformId::Steam, 1, 500, Some(fresh)),
            entry(PlatformId::Steam, 2, 900, Some(stale)),
            entry(PlatformId::Steam, 3, 0, None),
        ];
        let s = summarize(1, now(), &entries, &[]);
        assert_eq!(s.recently_played_count, 1);
        assert_eq!(s.recent_playtime_minutes, 500);
    }

    #[test]
    fn unlocked_achievements_count_unlocked_states_only() {
        let states = vec![
            AchievementState {
                user_id: 1,
                achievement_id: 10,
                platform: PlatformId::Steam,
                unlocked: true,
                unlock_time: Some(now()),
            },
            AchievementState {
                user_id: 1,
                achievement_id: 11,
                platform: PlatformId::Steam,
                unlocked: false,
                unlock_time: None,
            },
        ];
        let s = summarize(1, now(), &[], &states);
        assert_eq!(s.unlocked_achievements, 1);
        assert_eq!(s.total_achievements, 0);
    }

    #[test]
    fn empty_library_summarizes_to_zeroes() {
        let s = summarize(9, now(), &[], &[]);
        assert_eq!(s, LibrarySummary { user_id: 9, ..Default::default() });
    }
}
