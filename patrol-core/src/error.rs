use thiserror::Error;

use crate::feed::FeedError;

#[derive(Error, Debug)]
pub enum PatrolError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Presence feed unavailable: {0}")]
    FeedUnavailable(#[from] FeedError),

    #[error("A patrol is already active for user {user_key}")]
    DuplicateSession { user_key: String },

    #[error("User {user_key} has not registered an external id")]
    NotRegistered { user_key: String },

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Failed to persist patrol {record_id}: {reason}")]
    StorageWrite { record_id: i64, reason: String },

    #[error("Other error: {0}")]
    Other(String),
}
