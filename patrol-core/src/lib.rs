pub mod activity;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod registry;
pub mod store;

pub use activity::{is_active, ActivityThresholds};
pub use config::PatrolConfig;
pub use error::PatrolError;
pub use feed::{
    build_player_index, normalize_players, FeedError, HttpPresenceFeed, PlayerRecord,
    PresenceFeed,
};
pub use models::{ActiveSessionRow, PatrolDebrief, Pilot, Session};
pub use registry::SessionRegistry;
pub use store::{PatrolStore, PgPatrolStore, SessionStore};
