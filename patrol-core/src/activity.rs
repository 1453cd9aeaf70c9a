//! Activity classification
//!
//! A player counts as flying when either reading is strictly above its
//! threshold. Missing or garbled fields read as zero, so a bad record is
//! simply "not active".

use crate::config::MonitorConfig;
use crate::feed::PlayerRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityThresholds {
    pub min_speed: f64,
    pub min_altitude: f64,
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self {
            min_speed: 5.0,
            min_altitude: 5.0,
        }
    }
}

impl From<&MonitorConfig> for ActivityThresholds {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            min_speed: config.min_speed,
            min_altitude: config.min_altitude,
        }
    }
}

pub fn is_active(player: &PlayerRecord, thresholds: &ActivityThresholds) -> bool {
    player.speed() > thresholds.min_speed || player.altitude() > thresholds.min_altitude
}
