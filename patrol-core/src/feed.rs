//! Presence feed client
//!
//! Fetches the multiplayer presence feed and normalizes it into loosely-typed
//! [`PlayerRecord`]s. The feed's schema is not ours: records are kept as raw
//! JSON maps and every logical field (identifier, speed, altitude, callsign)
//! is read through an ordered list of candidate names.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::FeedConfig;

/// Top-level keys that may hold the player list.
const LIST_KEYS: &[&str] = &["players", "pilots"];
const ID_FIELDS: &[&str] = &["id", "uid", "userId", "pid"];
const SPEED_FIELDS: &[&str] = &["speed", "v", "groundSpeed"];
const ALTITUDE_FIELDS: &[&str] = &["alt", "altitude", "z"];
const CALLSIGN_FIELDS: &[&str] = &["callsign", "label", "name"];

// ============================================================================
// PresenceFeed trait
// ============================================================================

#[async_trait]
pub trait PresenceFeed: Send + Sync {
    /// One request against the feed. Unrecognized shapes yield an empty list.
    async fn fetch(&self) -> Result<Vec<PlayerRecord>, FeedError>;

    /// Endpoint description for logging.
    fn endpoint(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed returned status {code}")]
    Status { code: u16 },

    #[error("malformed feed body: {0}")]
    Decode(String),
}

// ============================================================================
// PlayerRecord
// ============================================================================

/// One player entry from the feed, field names untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerRecord(Map<String, Value>);

impl PlayerRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Identifier from the first non-empty field among `id`, `uid`,
    /// `userId`, `pid`. Strings and numbers both count; numbers are rendered
    /// as text. A non-empty value of any other type yields `None`.
    pub fn identifier(&self) -> Option<String> {
        self.first_present(ID_FIELDS).and_then(coerce_identifier)
    }

    /// Speed-like reading. Only the first non-empty candidate is read;
    /// `0.0` when it is missing or does not parse.
    pub fn speed(&self) -> f64 {
        self.first_number(SPEED_FIELDS)
    }

    /// Altitude-like reading, probed the same way as [`PlayerRecord::speed`].
    pub fn altitude(&self) -> f64 {
        self.first_number(ALTITUDE_FIELDS)
    }

    pub fn callsign(&self) -> Option<String> {
        CALLSIGN_FIELDS
            .iter()
            .filter_map(|field| self.0.get(*field))
            .find_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()))
            .map(str::to_string)
    }

    /// First candidate holding a non-empty value. Later fields are never
    /// consulted once one is found, even if it fails to coerce.
    fn first_present(&self, fields: &[&str]) -> Option<&Value> {
        fields
            .iter()
            .filter_map(|field| self.0.get(*field))
            .find(|value| !is_empty_value(value))
    }

    fn first_number(&self, fields: &[&str]) -> f64 {
        self.first_present(fields)
            .and_then(coerce_number)
            .unwrap_or(0.0)
    }
}

/// Null, `false`, zero, blank strings and empty containers carry no reading.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(true) => 1.0,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn coerce_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Accepts `{"players": [...]}`, `{"pilots": [...]}` or a bare list.
/// Anything else, and any list entry that is not an object, is dropped.
pub fn normalize_players(body: Value) -> Vec<PlayerRecord> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => {
            let list = LIST_KEYS.iter().find_map(|key| match obj.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            });
            match list {
                Some(items) => items,
                None => {
                    tracing::debug!("Presence feed object has no player list; treating as empty");
                    Vec::new()
                }
            }
        }
        other => {
            tracing::debug!(kind = json_kind(&other), "Unrecognized presence feed shape");
            Vec::new()
        }
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(fields) => Some(PlayerRecord::new(fields)),
            _ => None,
        })
        .collect()
}

/// Identifier → record. Records without an identifier are skipped; on
/// duplicate identifiers the later record wins.
pub fn build_player_index(records: Vec<PlayerRecord>) -> HashMap<String, PlayerRecord> {
    let mut index = HashMap::with_capacity(records.len());
    for record in records {
        if let Some(id) = record.identifier() {
            index.insert(id, record);
        }
    }
    index
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// HttpPresenceFeed
// ============================================================================

/// Presence feed served over plain HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpPresenceFeed {
    client: Client,
    url: String,
}

impl HttpPresenceFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FeedError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &FeedConfig) -> Result<Self, FeedError> {
        Self::new(
            config.url.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }
}

#[async_trait]
impl PresenceFeed for HttpPresenceFeed {
    async fn fetch(&self) -> Result<Vec<PlayerRecord>, FeedError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(FeedError::Status {
                code: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let value: Value =
            serde_json::from_slice(&body).map_err(|e| FeedError::Decode(e.to_string()))?;

        Ok(normalize_players(value))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

// ============================================================================
// TESTS
// ============================================================================
