//! Patrol monitor: presence polling and active-time accrual
//!
//! One background task per process. Each cycle:
//! 1. fetch the presence feed (on failure: log, short backoff, retry)
//! 2. index players by identifier
//! 3. for every tracked session, match on external id; an active match
//!    credits one poll interval and stamps `last_seen_at`
//! 4. propagate the feed callsign to the patrol row when it changes
//! 5. checkpoint accumulators on a wall-clock cadence
//! 6. sleep until the next cycle
//!
//! Cycles never overlap. Stopping cancels the pending sleep or abandons an
//! in-flight fetch; a reconciliation that has started always runs to the end.
//! Unpersisted seconds are flushed once on the way out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use patrol_core::activity::{is_active, ActivityThresholds};
use patrol_core::config::MonitorConfig;
use patrol_core::feed::{build_player_index, PlayerRecord, PresenceFeed};
use patrol_core::models::Session;
use patrol_core::registry::SessionRegistry;
use patrol_core::store::SessionStore;
use patrol_core::PatrolError;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tokio_util::sync::CancellationToken;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Runtime form of [`MonitorConfig`].
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub checkpoint_every: chrono::Duration,
    pub stale_after: Option<chrono::Duration>,
    /// Total attempts at reading open patrols on start.
    pub restore_attempts: usize,
    pub thresholds: ActivityThresholds,
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            retry_backoff: Duration::from_secs(config.retry_backoff_seconds),
            checkpoint_every: chrono_seconds(config.checkpoint_interval_seconds),
            stale_after: config
                .stale_after_minutes
                .map(|m| chrono_seconds(m.saturating_mul(60))),
            restore_attempts: config.restore_attempts.max(1),
            thresholds: ActivityThresholds::from(config),
        }
    }
}

/// Saturates at `chrono::Duration::MAX` instead of panicking on huge values.
fn chrono_seconds(seconds: u64) -> chrono::Duration {
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Stopped,
    Running,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub tracked: usize,
    pub matched: usize,
    pub active: usize,
    pub idle: usize,
    pub unmatched: usize,
    pub stale: usize,
    pub callsigns_updated: usize,
    pub checkpoints_written: usize,
    pub checkpoint_failures: usize,
}

pub struct PatrolMonitor {
    worker: Arc<MonitorWorker>,
    running: Mutex<Option<RunningLoop>>,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PatrolMonitor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        feed: Arc<dyn PresenceFeed>,
        store: Arc<dyn SessionStore>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            worker: Arc::new(MonitorWorker {
                registry,
                feed,
                store,
                settings,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.worker.registry
    }

    pub async fn state(&self) -> MonitorState {
        match self.running.lock().await.as_ref() {
            Some(active) if !active.handle.is_finished() => MonitorState::Running,
            _ => MonitorState::Stopped,
        }
    }

    /// Restore open patrols from the store, then begin polling.
    ///
    /// A no-op while already running. If the store cannot be read after the
    /// configured attempts the error is returned and the monitor stays stopped.
    pub async fn start(&self) -> Result<(), PatrolError> {
        let mut running = self.running.lock().await;
        if let Some(active) = running.as_ref() {
            if !active.handle.is_finished() {
                tracing::debug!("Patrol monitor already running");
                return Ok(());
            }
        }

        let restored = self.worker.restore().await?;
        tracing::info!(
            restored,
            tracked = self.worker.registry.len().await,
            "Restored open patrols"
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.worker.clone().run(cancel.clone()));
        *running = Some(RunningLoop { cancel, handle });
        Ok(())
    }

    /// Cancel the loop and wait for it to flush. Safe to call when stopped.
    pub async fn stop(&self) {
        let active = self.running.lock().await.take();
        let Some(active) = active else {
            tracing::debug!("Patrol monitor not running; nothing to stop");
            return;
        };

        active.cancel.cancel();
        if let Err(e) = active.handle.await {
            tracing::error!(error = %e, "Patrol monitor task ended abnormally");
        }
    }

    /// Fetch and reconcile once, outside the background loop.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<CycleReport, PatrolError> {
        let players = self.worker.feed.fetch().await?;
        Ok(self.worker.reconcile(players, now).await)
    }

    pub async fn reconcile(&self, players: Vec<PlayerRecord>, now: DateTime<Utc>) -> CycleReport {
        self.worker.reconcile(players, now).await
    }

    /// Write every unpersisted accumulator. Returns the number written.
    pub async fn flush(&self, now: DateTime<Utc>) -> usize {
        self.worker.flush(now).await
    }
}

// ============================================================================
// INTERNAL HELPERS
// ============================================================================

struct MonitorWorker {
    registry: Arc<SessionRegistry>,
    feed: Arc<dyn PresenceFeed>,
    store: Arc<dyn SessionStore>,
    settings: MonitorSettings,
}

impl MonitorWorker {
    async fn restore(&self) -> Result<usize, PatrolError> {
        let strategy = ExponentialBackoff::from_millis(500)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.settings.restore_attempts.saturating_sub(1));

        let rows = Retry::spawn(strategy, || self.store.restore_active_sessions())
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to restore open patrols"))?;

        let now = Utc::now();
        let sessions = rows
            .into_iter()
            .map(|row| Session::restored(row, now))
            .collect();
        Ok(self.registry.restore(sessions).await)
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.settings.poll_interval.as_secs(),
            feed = %self.feed.endpoint(),
            "Patrol monitor started"
        );

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.feed.fetch() => result,
            };

            let delay = match fetched {
                Ok(players) => {
                    let report = self.reconcile(players, Utc::now()).await;
                    tracing::debug!(
                        tracked = report.tracked,
                        matched = report.matched,
                        active = report.active,
                        checkpoints = report.checkpoints_written,
                        "Poll cycle complete"
                    );
                    self.settings.poll_interval
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        backoff_secs = self.settings.retry_backoff.as_secs(),
                        "Presence feed fetch failed; retrying after backoff"
                    );
                    self.settings.retry_backoff
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let flushed = self.flush(Utc::now()).await;
        tracing::info!(flushed, "Patrol monitor stopped");
    }

    async fn reconcile(&self, players: Vec<PlayerRecord>, now: DateTime<Utc>) -> CycleReport {
        let index = build_player_index(players);
        let credit = self.settings.poll_interval.as_secs() as i64;
        let mut report = CycleReport::default();

        for session in self.registry.snapshot().await {
            report.tracked += 1;
            let user_key = session.user_key();
            let record_id = session.record_id();

            match index.get(session.external_id()) {
                Some(player) => {
                    report.matched += 1;
                    if is_active(player, &self.settings.thresholds) {
                        let credited = self
                            .registry
                            .update(user_key, record_id, |s| s.record_active(credit, now))
                            .await;
                        if credited.is_some() {
                            report.active += 1;
                        }
                    } else {
                        report.idle += 1;
                        self.check_stale(&session, now, &mut report).await;
                    }

                    if let Some(callsign) = player.callsign() {
                        self.propagate_callsign(&session, &callsign, &mut report)
                            .await;
                    }
                }
                None => {
                    report.unmatched += 1;
                    self.check_stale(&session, now, &mut report).await;
                }
            }

            self.checkpoint_if_due(user_key, record_id, now, &mut report)
                .await;
        }

        report
    }

    async fn check_stale(&self, session: &Session, now: DateTime<Utc>, report: &mut CycleReport) {
        let Some(after) = self.settings.stale_after else {
            return;
        };

        let outcome = self
            .registry
            .update(session.user_key(), session.record_id(), |s| {
                (s.flag_if_stale(now, after), s.is_stale())
            })
            .await;

        if let Some((newly_flagged, stale)) = outcome {
            if newly_flagged {
                tracing::warn!(
                    user_key = %session.user_key(),
                    external_id = %session.external_id(),
                    last_activity = %session.last_activity(),
                    "Patrol has no active sighting within the stale window"
                );
            }
            if stale {
                report.stale += 1;
            }
        }
    }

    async fn propagate_callsign(
        &self,
        session: &Session,
        callsign: &str,
        report: &mut CycleReport,
    ) {
        if session.callsign() == Some(callsign) {
            return;
        }

        match self.store.update_callsign(session.record_id(), callsign).await {
            Ok(()) => {
                self.registry
                    .update(session.user_key(), session.record_id(), |s| {
                        s.observe_callsign(callsign)
                    })
                    .await;
                report.callsigns_updated += 1;
            }
            Err(e) => {
                tracing::warn!(
                    record_id = session.record_id(),
                    error = %e,
                    "Failed to update patrol callsign"
                );
            }
        }
    }

    async fn checkpoint_if_due(
        &self,
        user_key: &str,
        record_id: i64,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let every = self.settings.checkpoint_every;
        let due = self
            .registry
            .update(user_key, record_id, |s| {
                s.checkpoint_due(now, every).then(|| s.active_seconds())
            })
            .await
            .flatten();

        let Some(seconds) = due else {
            return;
        };

        match self.store.write_active_seconds(record_id, seconds).await {
            Ok(()) => {
                self.registry
                    .update(user_key, record_id, |s| s.mark_checkpointed(seconds, now))
                    .await;
                report.checkpoints_written += 1;
            }
            Err(e) => {
                // In-memory value stays authoritative; next cycle retries.
                tracing::warn!(
                    record_id,
                    seconds,
                    error = %e,
                    "Checkpoint write failed"
                );
                report.checkpoint_failures += 1;
            }
        }
    }

    async fn flush(&self, now: DateTime<Utc>) -> usize {
        let mut written = 0;
        for session in self.registry.snapshot().await {
            if !session.has_unpersisted_seconds() {
                continue;
            }
            let seconds = session.active_seconds();
            match self
                .store
                .write_active_seconds(session.record_id(), seconds)
                .await
            {
                Ok(()) => {
                    self.registry
                        .update(session.user_key(), session.record_id(), |s| {
                            s.mark_checkpointed(seconds, now)
                        })
                        .await;
                    written += 1;
                }
                Err(e) => tracing::warn!(
                    record_id = session.record_id(),
                    error = %e,
                    "Failed to flush patrol seconds"
                ),
            }
        }
        written
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::test_support::{MemoryStore, ScriptedFeed};
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::seconds(seconds)
    }

    fn settings_30s() -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(10),
            checkpoint_every: chrono::Duration::seconds(300),
            stale_after: None,
            restore_attempts: 1,
            thresholds: ActivityThresholds::default(),
        }
    }

    #[test]
    fn test_settings_from_huge_config_saturates() {
        let config = MonitorConfig {
            checkpoint_interval_seconds: u64::MAX,
            stale_after_minutes: Some(u64::MAX),
            ..MonitorConfig::default()
        };
        let settings = MonitorSettings::from(&config);
        assert_eq!(settings.checkpoint_every, chrono::Duration::MAX);
        assert_eq!(settings.stale_after, Some(chrono::Duration::MAX));

        // A saturated cadence never comes due
        let mut session = Session::new("u1", "p1", 1, t0());
        session.record_active(30, at(30));
        assert!(!session.checkpoint_due(at(86_400), settings.checkpoint_every));
    }

    fn fast_settings() -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(20),
            retry_backoff: Duration::from_millis(10),
            ..settings_30s()
        }
    }

    struct Harness {
        monitor: PatrolMonitor,
        registry: Arc<SessionRegistry>,
        feed: Arc<ScriptedFeed>,
        store: Arc<MemoryStore>,
    }

    fn harness(settings: MonitorSettings) -> Harness {
        let registry = Arc::new(SessionRegistry::new());
        let feed = Arc::new(ScriptedFeed::new());
        let store = Arc::new(MemoryStore::new());
        let monitor = PatrolMonitor::new(registry.clone(), feed.clone(), store.clone(), settings);
        Harness {
            monitor,
            registry,
            feed,
            store,
        }
    }

    async fn track(h: &Harness, user_key: &str, external_id: &str) -> i64 {
        let record_id = h.store.seed_open_patrol(user_key, external_id, t0(), 0);
        h.registry
            .insert(Session::new(user_key, external_id, record_id, t0()))
            .await
            .unwrap();
        record_id
    }

    async fn seconds(h: &Harness, user_key: &str) -> i64 {
        h.registry.get(user_key).await.unwrap().active_seconds()
    }

    // ========================================================================
    // Accrual
    // ========================================================================

    #[tokio::test]
    async fn test_scenario_active_absent_idle() {
        let h = harness(settings_30s());
        track(&h, "u1", "p1").await;

        for cycle in 1..=3 {
            h.feed.push_body(json!([{"id": "p1", "speed": 10}]));
            h.monitor.poll_once(at(30 * cycle)).await.unwrap();
        }
        assert_eq!(seconds(&h, "u1").await, 90);

        for cycle in 4..=5 {
            h.feed.push_body(json!([{"id": "someone-else", "speed": 300}]));
            let report = h.monitor.poll_once(at(30 * cycle)).await.unwrap();
            assert_eq!(report.unmatched, 1);
        }
        assert_eq!(seconds(&h, "u1").await, 90);

        h.feed.push_body(json!([{"id": "p1", "speed": 0, "altitude": 0}]));
        let report = h.monitor.poll_once(at(180)).await.unwrap();
        assert_eq!(report.idle, 1);
        assert_eq!(seconds(&h, "u1").await, 90);
    }

    #[tokio::test]
    async fn test_last_seen_only_set_on_active_match() {
        let h = harness(settings_30s());
        track(&h, "u1", "p1").await;

        h.monitor
            .reconcile(
                patrol_core::normalize_players(json!([{"id": "p1", "speed": 0}])),
                at(30),
            )
            .await;
        assert!(h.registry.get("u1").await.unwrap().last_seen_at().is_none());

        h.monitor
            .reconcile(
                patrol_core::normalize_players(json!([{"id": "p1", "alt": 1500}])),
                at(60),
            )
            .await;
        assert_eq!(h.registry.get("u1").await.unwrap().last_seen_at(), Some(at(60)));

        h.monitor.reconcile(Vec::new(), at(90)).await;
        assert_eq!(h.registry.get("u1").await.unwrap().last_seen_at(), Some(at(60)));
    }

    #[tokio::test]
    async fn test_only_matching_sessions_accrue() {
        let h = harness(settings_30s());
        track(&h, "u1", "p1").await;
        track(&h, "u2", "p2").await;
        track(&h, "u3", "p3").await;

        h.feed.push_body(json!({"players": [
            {"id": "p1", "speed": 120},
            {"uid": "p2", "speed": 0, "alt": 0},
        ]}));
        let report = h.monitor.poll_once(at(30)).await.unwrap();

        assert_eq!(report.tracked, 3);
        assert_eq!(report.matched, 2);
        assert_eq!(report.active, 1);
        assert_eq!(report.unmatched, 1);
        assert_eq!(seconds(&h, "u1").await, 30);
        assert_eq!(seconds(&h, "u2").await, 0);
        assert_eq!(seconds(&h, "u3").await, 0);
    }

    #[tokio::test]
    async fn test_shared_external_id_credits_both_sessions() {
        let h = harness(settings_30s());
        track(&h, "u1", "shared").await;
        track(&h, "u2", "shared").await;

        h.feed.push_body(json!([{"id": "shared", "speed": 40}]));
        h.monitor.poll_once(at(30)).await.unwrap();

        assert_eq!(seconds(&h, "u1").await, 30);
        assert_eq!(seconds(&h, "u2").await, 30);
    }

    #[tokio::test]
    async fn test_failed_fetch_loses_only_that_interval() {
        let h = harness(settings_30s());
        track(&h, "u1", "p1").await;

        h.feed.push_body(json!([{"id": "p1", "speed": 10}]));
        h.monitor.poll_once(at(30)).await.unwrap();

        h.feed.push_status(500);
        let failed = h.monitor.poll_once(at(60)).await;
        assert!(matches!(failed, Err(PatrolError::FeedUnavailable(_))));
        assert_eq!(seconds(&h, "u1").await, 30);

        h.feed.push_body(json!([{"id": "p1", "speed": 10}]));
        h.monitor.poll_once(at(90)).await.unwrap();
        assert_eq!(seconds(&h, "u1").await, 60);
    }

    // ========================================================================
    // Callsign propagation
    // ========================================================================

    #[tokio::test]
    async fn test_callsign_written_once_per_change() {
        let h = harness(settings_30s());
        let record_id = track(&h, "u1", "p1").await;

        for cycle in 1..=3 {
            h.feed
                .push_body(json!([{"id": "p1", "speed": 0, "callsign": "RAVEN"}]));
            h.monitor.poll_once(at(30 * cycle)).await.unwrap();
        }
        assert_eq!(h.store.callsign_writes.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.patrol(record_id).unwrap().callsign.as_deref(), Some("RAVEN"));

        h.feed.push_body(json!([{"id": "p1", "label": "RAVEN 2"}]));
        let report = h.monitor.poll_once(at(120)).await.unwrap();
        assert_eq!(report.callsigns_updated, 1);
        assert_eq!(h.registry.get("u1").await.unwrap().callsign(), Some("RAVEN 2"));
    }

    // ========================================================================
    // Checkpointing
    // ========================================================================

    #[tokio::test]
    async fn test_checkpoint_follows_wall_clock_and_never_exceeds_memory() {
        let h = harness(settings_30s());
        let record_id = track(&h, "u1", "p1").await;

        for cycle in 1..=12 {
            h.feed.push_body(json!([{"id": "p1", "speed": 10}]));
            h.monitor.poll_once(at(30 * cycle)).await.unwrap();

            let stored = h.store.stored_seconds(record_id);
            let in_memory = seconds(&h, "u1").await;
            assert!(stored <= in_memory, "stored {} > memory {}", stored, in_memory);
        }

        // Boundary at 300s after start; next one not due until 600s
        assert_eq!(h.store.stored_seconds(record_id), 300);
        assert_eq!(seconds(&h, "u1").await, 360);
        assert_eq!(h.store.write_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_cadence_independent_of_interval_divisibility() {
        let mut settings = settings_30s();
        settings.poll_interval = Duration::from_secs(45);
        let h = harness(settings);
        let record_id = track(&h, "u1", "p1").await;

        for cycle in 1..=7 {
            h.feed.push_body(json!([{"id": "p1", "speed": 10}]));
            h.monitor.poll_once(at(45 * cycle)).await.unwrap();
        }

        // 315s elapsed at cycle 7 crosses the 300s window even though
        // 315 is not a multiple of 300
        assert_eq!(h.store.stored_seconds(record_id), 315);
    }

    #[tokio::test]
    async fn test_failed_checkpoint_keeps_memory_and_retries_next_cycle() {
        let h = harness(settings_30s());
        let record_id = track(&h, "u1", "p1").await;
        h.store.fail_writes.store(1, Ordering::SeqCst);

        for cycle in 1..=10 {
            h.feed.push_body(json!([{"id": "p1", "speed": 10}]));
            h.monitor.poll_once(at(30 * cycle)).await.unwrap();
        }
        assert_eq!(h.store.stored_seconds(record_id), 0);
        assert_eq!(seconds(&h, "u1").await, 300);

        // Absent from the feed, but the pending checkpoint still goes out
        h.feed.push_body(json!([]));
        let report = h.monitor.poll_once(at(330)).await.unwrap();
        assert_eq!(report.checkpoints_written, 1);
        assert_eq!(h.store.stored_seconds(record_id), 300);
        assert_eq!(seconds(&h, "u1").await, 300);
    }

    #[tokio::test]
    async fn test_flush_writes_only_unpersisted_sessions() {
        let h = harness(settings_30s());
        let r1 = track(&h, "u1", "p1").await;
        let r2 = track(&h, "u2", "p2").await;

        h.feed.push_body(json!([{"id": "p1", "speed": 10}]));
        h.monitor.poll_once(at(30)).await.unwrap();

        assert_eq!(h.monitor.flush(at(40)).await, 1);
        assert_eq!(h.store.stored_seconds(r1), 30);
        assert_eq!(h.store.stored_seconds(r2), 0);
        assert_eq!(h.monitor.flush(at(50)).await, 0);
    }

    // ========================================================================
    // Stale sessions
    // ========================================================================

    #[tokio::test]
    async fn test_stale_sessions_flagged_but_kept() {
        let mut settings = settings_30s();
        settings.stale_after = Some(chrono::Duration::minutes(10));
        let h = harness(settings);
        track(&h, "u1", "p1").await;

        let report = h.monitor.reconcile(Vec::new(), at(540)).await;
        assert_eq!(report.stale, 0);

        let report = h.monitor.reconcile(Vec::new(), at(600)).await;
        assert_eq!(report.stale, 1);
        assert!(h.registry.get("u1").await.unwrap().is_stale());

        h.feed.push_body(json!([{"id": "p1", "speed": 10}]));
        let report = h.monitor.poll_once(at(630)).await.unwrap();
        assert_eq!(report.stale, 0);
        let session = h.registry.get("u1").await.unwrap();
        assert!(!session.is_stale());
        assert_eq!(session.active_seconds(), 30);
    }

    #[tokio::test]
    async fn test_stale_check_disabled_by_default() {
        let h = harness(settings_30s());
        track(&h, "u1", "p1").await;

        let report = h.monitor.reconcile(Vec::new(), at(86_400)).await;
        assert_eq!(report.stale, 0);
        assert!(!h.registry.get("u1").await.unwrap().is_stale());
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let h = harness(fast_settings());
        h.monitor.stop().await;
        h.monitor.stop().await;
        assert_eq!(h.monitor.state().await, MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_start_restores_open_patrols_and_is_idempotent() {
        let h = harness(fast_settings());
        h.store.seed_open_patrol("u1", "p1", t0(), 120);
        h.store.seed_open_patrol("u2", "p2", t0(), 0);

        h.monitor.start().await.unwrap();
        h.monitor.start().await.unwrap();
        assert_eq!(h.monitor.state().await, MonitorState::Running);
        assert_eq!(h.registry.len().await, 2);
        assert_eq!(seconds(&h, "u1").await, 120);

        h.monitor.stop().await;
        assert_eq!(h.monitor.state().await, MonitorState::Stopped);
        h.monitor.stop().await;
    }

    #[tokio::test]
    async fn test_loop_keeps_polling_through_feed_failures() {
        let h = harness(fast_settings());
        h.feed.push_status(503);
        h.feed.push_status(500);
        h.feed.push_body(json!([]));

        h.monitor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.monitor.state().await, MonitorState::Running);
        assert!(h.feed.calls() >= 4, "expected repeated polls, got {}", h.feed.calls());

        h.monitor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_flushes_unpersisted_seconds() {
        let h = harness(fast_settings());
        let record_id = h.store.seed_open_patrol("u1", "p1", t0(), 0);

        h.monitor.start().await.unwrap();
        h.registry
            .update("u1", record_id, |s| s.record_active(45, Utc::now()))
            .await
            .expect("restored session should be tracked");

        h.monitor.stop().await;
        assert_eq!(h.store.stored_seconds(record_id), 45);
    }

    #[tokio::test]
    async fn test_stop_interrupts_long_sleep_promptly() {
        let mut settings = fast_settings();
        settings.poll_interval = Duration::from_secs(3600);
        let h = harness(settings);

        h.monitor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopped = tokio::time::timeout(Duration::from_secs(2), h.monitor.stop()).await;
        assert!(stopped.is_ok(), "stop should not wait out the poll interval");
    }

    #[tokio::test]
    async fn test_start_surfaces_restore_failure() {
        let h = harness(fast_settings());
        h.store.fail_restores.store(5, Ordering::SeqCst);

        assert!(h.monitor.start().await.is_err());
        assert_eq!(h.monitor.state().await, MonitorState::Stopped);
        assert_eq!(h.feed.calls(), 0);
    }

    #[tokio::test]
    async fn test_restore_retries_transient_failure() {
        let mut settings = fast_settings();
        settings.restore_attempts = 3;
        let h = harness(settings);
        h.store.seed_open_patrol("u1", "p1", t0(), 60);
        h.store.fail_restores.store(1, Ordering::SeqCst);

        h.monitor.start().await.unwrap();
        assert_eq!(h.registry.len().await, 1);
        h.monitor.stop().await;
    }

    #[test]
    fn test_settings_from_config() {
        let config = MonitorConfig {
            poll_interval_seconds: 45,
            stale_after_minutes: Some(90),
            restore_attempts: 0,
            ..MonitorConfig::default()
        };
        let settings = MonitorSettings::from(&config);

        assert_eq!(settings.poll_interval, Duration::from_secs(45));
        assert_eq!(settings.retry_backoff, Duration::from_secs(10));
        assert_eq!(settings.checkpoint_every, chrono::Duration::seconds(300));
        assert_eq!(settings.stale_after, Some(chrono::Duration::minutes(90)));
        assert_eq!(settings.restore_attempts, 1);
    }
}
