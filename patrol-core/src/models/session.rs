use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::patrol::ActiveSessionRow;

/// One in-flight patrol as tracked in memory.
///
/// Identity fields (`user_key`, `external_id`, `record_id`, `started_at`) are
/// fixed at construction. The accumulator only moves forward through
/// [`Session::record_active`].
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    user_key: String,
    external_id: String,
    record_id: i64,
    started_at: DateTime<Utc>,
    active_seconds: i64,
    last_seen_at: Option<DateTime<Utc>>,
    callsign: Option<String>,
    stale: bool,
    #[serde(skip)]
    checkpointed_seconds: i64,
    #[serde(skip)]
    checkpointed_at: DateTime<Utc>,
}

impl Session {
    /// A freshly started patrol. Its durable row already exists with zero seconds.
    pub fn new(
        user_key: impl Into<String>,
        external_id: impl Into<String>,
        record_id: i64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_key: user_key.into(),
            external_id: external_id.into(),
            record_id,
            started_at,
            active_seconds: 0,
            last_seen_at: None,
            callsign: None,
            stale: false,
            checkpointed_seconds: 0,
            checkpointed_at: started_at,
        }
    }

    /// Rebuild a session from its open durable row. The stored seconds count as
    /// already checkpointed, and the checkpoint clock restarts at `now`.
    pub fn restored(row: ActiveSessionRow, now: DateTime<Utc>) -> Self {
        let active_seconds = row.active_seconds.max(0);
        Self {
            user_key: row.user_key,
            external_id: row.external_id,
            record_id: row.record_id,
            started_at: row.start_time,
            active_seconds,
            last_seen_at: None,
            callsign: row.callsign,
            stale: false,
            checkpointed_seconds: active_seconds,
            checkpointed_at: now,
        }
    }

    pub fn user_key(&self) -> &str {
        &self.user_key
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn record_id(&self) -> i64 {
        self.record_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn active_seconds(&self) -> i64 {
        self.active_seconds
    }

    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen_at
    }

    pub fn callsign(&self) -> Option<&str> {
        self.callsign.as_deref()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn checkpointed_seconds(&self) -> i64 {
        self.checkpointed_seconds
    }

    /// Credit one active poll cycle.
    pub fn record_active(&mut self, seconds: i64, seen_at: DateTime<Utc>) {
        self.active_seconds += seconds.max(0);
        self.last_seen_at = Some(seen_at);
        self.stale = false;
    }

    /// Remember the latest callsign reported by the feed. Returns `true` when it changed.
    pub fn observe_callsign(&mut self, callsign: &str) -> bool {
        if self.callsign.as_deref() == Some(callsign) {
            return false;
        }
        self.callsign = Some(callsign.to_string());
        true
    }

    pub fn has_unpersisted_seconds(&self) -> bool {
        self.active_seconds > self.checkpointed_seconds
    }

    /// Wall-clock cadence: due once `every` has passed since the last successful
    /// checkpoint and there is something new to write.
    pub fn checkpoint_due(&self, now: DateTime<Utc>, every: Duration) -> bool {
        self.has_unpersisted_seconds() && now - self.checkpointed_at >= every
    }

    pub fn mark_checkpointed(&mut self, seconds: i64, at: DateTime<Utc>) {
        self.checkpointed_seconds = self.checkpointed_seconds.max(seconds);
        self.checkpointed_at = at;
    }

    /// Last active sighting, or the start time if the pilot was never seen flying.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_seen_at.unwrap_or(self.started_at)
    }

    /// Flags the session once it has gone `after` without an active sighting.
    /// Returns `true` only on the cycle that sets the flag.
    pub fn flag_if_stale(&mut self, now: DateTime<Utc>, after: Duration) -> bool {
        if self.stale || now - self.last_activity() < after {
            return false;
        }
        self.stale = true;
        true
    }
}
