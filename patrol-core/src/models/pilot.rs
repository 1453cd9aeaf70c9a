use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's registration: which feed identifier to watch for them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Pilot {
    pub user_key: String,
    pub external_id: String,
    pub callsign: String,
    pub registered_at: DateTime<Utc>,
}
