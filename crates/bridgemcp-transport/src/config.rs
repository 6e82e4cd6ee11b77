//! Transport-layer configuration (components I, J, K).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::manager::TransportChoice;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub choice: TransportChoice,
    pub oauth_enabled: bool,
    /// How many of the newest events per stream `CleanupOldEvents` keeps.
    pub event_retention_count: usize,
    /// How old a session can get before `CleanupOldSessions` deletes it.
    pub session_max_age: Duration,
    /// How often the background cleanup sweep runs.
    pub cleanup_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            choice: TransportChoice::Http,
            oauth_enabled: true,
            event_retention_count: 1000,
            session_max_age: Duration::from_secs(7 * 24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}
