//! One decoded status response.

use serde::{Deserialize, Serialize};

/// Status of the monitored server at one point in time.
///
/// All fields are kept as transmitted; only `players` is structured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Server name, may contain `§x` color codes.
    pub hostname: String,
    pub gametype: String,
    pub game_id: String,
    pub version: String,
    pub plugins: String,
    pub map: String,
    pub numplayers: String,
    pub maxplayers: String,
    pub hostport: String,
    pub hostip: String,
    /// Player names in wire order.
    pub players: Vec<String>,
}

impl Snapshot {
    /// Fields in the order the status response carries them.
    pub fn fields(&self) -> [&str; 10] {
        [
            self.hostname.as_str(),
            self.gametype.as_str(),
            self.game_id.as_str(),
            self.version.as_str(),
            self.plugins.as_str(),
            self.map.as_str(),
            self.numplayers.as_str(),
            self.maxplayers.as_str(),
            self.hostport.as_str(),
            self.hostip.as_str(),
        ]
    }

    /// Snapshot with only a roster set. Handy for fakes and tests.
    pub fn with_players<I, S>(players: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let players: Vec<String> = players.into_iter().map(Into::into).collect();
        Self {
            numplayers: players.len().to_string(),
            players,
            ..Default::default()
        }
    }
}
