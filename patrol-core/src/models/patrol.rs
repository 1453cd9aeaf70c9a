use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open patrol row as read back at startup.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActiveSessionRow {
    pub record_id: i64,
    pub user_key: String,
    pub external_id: String,
    pub start_time: DateTime<Utc>,
    pub active_seconds: i64,
    pub callsign: Option<String>,
}

/// Details a pilot files when closing a patrol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatrolDebrief {
    pub aircraft: Option<String>,
    pub armament: Option<String>,
    pub status: Option<String>,
    pub base_takeoff: Option<String>,
    pub base_landed: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatrolSummary {
    pub record_id: i64,
    pub user_key: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub active_seconds: i64,
}
