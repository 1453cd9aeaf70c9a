//! In-memory store and scripted feed shared by the subsystem unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patrol_core::feed::{FeedError, PlayerRecord, PresenceFeed};
use patrol_core::models::{ActiveSessionRow, PatrolDebrief, Pilot};
use patrol_core::store::{PatrolStore, SessionStore};
use patrol_core::PatrolError;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct StoredPatrol {
    pub user_key: String,
    pub external_id: String,
    pub callsign: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub active_seconds: i64,
    pub debrief: Option<PatrolDebrief>,
}

#[derive(Default)]
pub struct MemoryStore {
    pilots: Mutex<HashMap<String, Pilot>>,
    patrols: Mutex<BTreeMap<i64, StoredPatrol>>,
    next_id: AtomicI64,
    /// Number of upcoming `write_active_seconds` calls to fail.
    pub fail_writes: AtomicUsize,
    /// Number of upcoming `restore_active_sessions` calls to fail.
    pub fail_restores: AtomicUsize,
    pub fail_finish: AtomicBool,
    pub write_calls: AtomicUsize,
    pub callsign_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an open patrol row as if left behind by a previous process.
    pub fn seed_open_patrol(
        &self,
        user_key: &str,
        external_id: &str,
        start_time: DateTime<Utc>,
        active_seconds: i64,
    ) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.patrols.lock().unwrap().insert(
            id,
            StoredPatrol {
                user_key: user_key.to_string(),
                external_id: external_id.to_string(),
                callsign: None,
                start_time,
                end_time: None,
                active_seconds,
                debrief: None,
            },
        );
        id
    }

    pub fn patrol(&self, record_id: i64) -> Option<StoredPatrol> {
        self.patrols.lock().unwrap().get(&record_id).cloned()
    }

    pub fn stored_seconds(&self, record_id: i64) -> i64 {
        self.patrol(record_id).map(|p| p.active_seconds).unwrap_or(-1)
    }

    pub fn patrol_count(&self) -> usize {
        self.patrols.lock().unwrap().len()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn restore_active_sessions(&self) -> Result<Vec<ActiveSessionRow>, PatrolError> {
        if Self::take_failure(&self.fail_restores) {
            return Err(PatrolError::Other("store offline".to_string()));
        }
        Ok(self
            .patrols
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| p.end_time.is_none())
            .map(|(id, p)| ActiveSessionRow {
                record_id: *id,
                user_key: p.user_key.clone(),
                external_id: p.external_id.clone(),
                start_time: p.start_time,
                active_seconds: p.active_seconds,
                callsign: p.callsign.clone(),
            })
            .collect())
    }

    async fn write_active_seconds(&self, record_id: i64, seconds: i64) -> Result<(), PatrolError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_writes) {
            return Err(PatrolError::StorageWrite {
                record_id,
                reason: "disk full".to_string(),
            });
        }
        if let Some(p) = self.patrols.lock().unwrap().get_mut(&record_id) {
            p.active_seconds = p.active_seconds.max(seconds);
        }
        Ok(())
    }

    async fn update_callsign(&self, record_id: i64, callsign: &str) -> Result<(), PatrolError> {
        self.callsign_writes.fetch_add(1, Ordering::SeqCst);
        if let Some(p) = self.patrols.lock().unwrap().get_mut(&record_id) {
            p.callsign = Some(callsign.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl PatrolStore for MemoryStore {
    async fn upsert_pilot(
        &self,
        user_key: &str,
        external_id: &str,
        callsign: &str,
    ) -> Result<Pilot, PatrolError> {
        let pilot = Pilot {
            user_key: user_key.to_string(),
            external_id: external_id.to_string(),
            callsign: callsign.to_string(),
            registered_at: Utc::now(),
        };
        self.pilots
            .lock()
            .unwrap()
            .insert(user_key.to_string(), pilot.clone());
        Ok(pilot)
    }

    async fn find_pilot(&self, user_key: &str) -> Result<Option<Pilot>, PatrolError> {
        Ok(self.pilots.lock().unwrap().get(user_key).cloned())
    }

    async fn create_patrol(
        &self,
        pilot: &Pilot,
        started_at: DateTime<Utc>,
    ) -> Result<i64, PatrolError> {
        let mut patrols = self.patrols.lock().unwrap();
        if patrols
            .values()
            .any(|p| p.user_key == pilot.user_key && p.end_time.is_none())
        {
            return Err(PatrolError::DuplicateSession {
                user_key: pilot.user_key.clone(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        patrols.insert(
            id,
            StoredPatrol {
                user_key: pilot.user_key.clone(),
                external_id: pilot.external_id.clone(),
                callsign: Some(pilot.callsign.clone()),
                start_time: started_at,
                end_time: None,
                active_seconds: 0,
                debrief: None,
            },
        );
        Ok(id)
    }

    async fn finish_patrol(
        &self,
        record_id: i64,
        active_seconds: i64,
        ended_at: DateTime<Utc>,
        debrief: &PatrolDebrief,
    ) -> Result<(), PatrolError> {
        if self.fail_finish.load(Ordering::SeqCst) {
            return Err(PatrolError::StorageWrite {
                record_id,
                reason: "connection reset".to_string(),
            });
        }
        let mut patrols = self.patrols.lock().unwrap();
        match patrols.get_mut(&record_id) {
            Some(p) if p.end_time.is_none() => {
                p.end_time = Some(ended_at);
                p.active_seconds = p.active_seconds.max(active_seconds);
                p.debrief = Some(debrief.clone());
                Ok(())
            }
            _ => Err(PatrolError::StorageWrite {
                record_id,
                reason: "no open patrol row".to_string(),
            }),
        }
    }

    async fn discard_patrol(&self, record_id: i64) -> Result<(), PatrolError> {
        self.patrols.lock().unwrap().remove(&record_id);
        Ok(())
    }
}

/// Feed that replays a queue of canned responses, then repeats the last one.
#[derive(Default)]
pub struct ScriptedFeed {
    responses: Mutex<VecDeque<Result<Value, u16>>>,
    last: Mutex<Option<Result<Value, u16>>>,
    pub calls: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_body(&self, body: Value) {
        self.responses.lock().unwrap().push_back(Ok(body));
    }

    pub fn push_status(&self, code: u16) {
        self.responses.lock().unwrap().push_back(Err(code));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PresenceFeed for ScriptedFeed {
    async fn fetch(&self) -> Result<Vec<PlayerRecord>, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut queue = self.responses.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(response) = queue.pop_front() {
                *last = Some(response.clone());
            }
            last.clone()
        };
        match next {
            Some(Ok(body)) => Ok(patrol_core::normalize_players(body)),
            Some(Err(code)) => Err(FeedError::Status { code }),
            None => Ok(Vec::new()),
        }
    }

    fn endpoint(&self) -> &str {
        "scripted"
    }
}
