//! State held by the presence tracker between observations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the tracker believes about the monitored server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub server_up: bool,
    /// Player name -> Unix seconds the player was first seen in the current online stretch.
    pub player_join_times: HashMap<String, i64>,
    /// Unix seconds of the last up transition, if known.
    pub up_since: Option<i64>,
}

impl PresenceState {
    /// State for a server already known to be up, e.g. restored from persisted open sessions.
    pub fn up(player_join_times: HashMap<String, i64>, up_since: Option<i64>) -> Self {
        Self {
            server_up: true,
            player_join_times,
            up_since,
        }
    }
}
