use thiserror::Error;

/// Typed failure surface of a platform adapter call.
///
/// The split matters to the orchestrator: `Transient` is the only variant
/// worth retrying, `AuthExpired` aborts the whole job, `NotFound` fails the
/// single item it was raised for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Timeout, 5xx or rate limiting on the platform side.
    #[error("transient platform error: {0}")]
    Transient(String),
    /// Credentials attached to the binding are no longer valid. The caller
    /// must re-authenticate out of band; adapters never refresh tokens.
    #[error("platform credentials expired")]
    AuthExpired,
    #[error("not found on platform: {0}")]
    NotFound(String),
}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }

    /// Shared HTTP status classification for all adapters.
    pub fn from_status(status: reqwest::StatusCode, what: &str) -> AdapterError {
        match status.as_u16() {
            401 | 403 => AdapterError::AuthExpired,
            404 => AdapterError::NotFound(what.to_string()),
            429 => AdapterError::Transient(format!("{what}: rate limited")),
            s if s >= 500 => AdapterError::Transient(format!("{what}: upstream {s}")),
            s => AdapterError::Transient(format!("{what}: unexpected status {s}")),
        }
    }

    /// Network-layer errors (connect failures, timeouts) are retryable.
    pub fn from_reqwest(err: reqwest::Error, what: &str) -> AdapterError {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            AdapterError::Transient(format!("{what}: {err}"))
        } else {
            AdapterError::Transient(format!("{what}: body error {err}"))
        }
    }
}

/// Terminal reason for a job that ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncFailure {
    #[error("platform credentials expired; account must be re-linked")]
    AuthExpired,
    #[error("retry budget exhausted: {0}")]
    Exhausted(String),
    #[error("cancelled")]
    Cancelled,
    #[error("no active binding for this user/platform")]
    NoBinding,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Non-fatal findings raised while merging adapter data into stored rows.
///
/// Anomalies never abort a merge: the monotonic value is kept and the
/// finding is logged and surfaced in the job's error list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAnomaly {
    /// A platform reported less playtime than we have stored. Counters can
    /// reset on some platforms; the stored maximum is kept.
    PlaytimeDecrease {
        game_id: i64,
        stored_minutes: i64,
        reported_minutes: i64,
    },
    /// A platform reported a previously unlocked achievement as locked.
    /// Unlocks are one-directional; the unlock is kept.
    AchievementRevoked { achievement_id: i64 },
}

impl std::fmt::Display for MergeAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeAnomaly::PlaytimeDecrease {
                game_id,
                stored_minutes,
                reported_minutes,
            } => write!(
                f,
                "playtime decrease for game {game_id}: stored {stored_minutes}m, reported {reported_minutes}m"
            ),
            MergeAnomaly::AchievementRevoked { achievement_id } => {
                write!(f, "achievement {achievement_id} reported locked after unlock")
            }
        }
    }
}
