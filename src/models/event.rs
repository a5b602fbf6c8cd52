//! Domain events emitted by the presence tracker and the batch handed to sinks.

use serde::{Deserialize, Serialize};

/// One presence transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    ServerCameUp,
    ServerWentDown {
        /// Seconds since the last up transition, when known.
        preceding_uptime_seconds: Option<i64>,
    },
    PlayerJoined {
        name: String,
    },
    PlayerLeft {
        name: String,
        online_seconds: i64,
    },
}

/// Events of one poll cycle plus the context a notifier needs to describe them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    /// Unix seconds of the observation.
    pub time: i64,
    /// Last seen hostname with color codes stripped.
    pub server_name: String,
    pub events: Vec<DomainEvent>,
    /// Sorted roster after the cycle (empty when the server is down).
    pub players: Vec<String>,
}

impl EventBatch {
    pub fn joined(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|e| match e {
            DomainEvent::PlayerJoined { name } => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn left(&self) -> impl Iterator<Item = (&str, i64)> {
        self.events.iter().filter_map(|e| match e {
            DomainEvent::PlayerLeft {
                name,
                online_seconds,
            } => Some((name.as_str(), *online_seconds)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(DomainEvent::PlayerLeft {
            name: "alice".to_string(),
            online_seconds: 250,
        })
        .unwrap();
        assert_eq!(json["event"], "player_left");
        assert_eq!(json["name"], "alice");
        assert_eq!(json["online_seconds"], 250);

        let json = serde_json::to_value(DomainEvent::ServerCameUp).unwrap();
        assert_eq!(json["event"], "server_came_up");
    }

    #[test]
    fn batch_splits_joined_and_left() {
        let batch = EventBatch {
            time: 10,
            server_name: "srv".to_string(),
            events: vec![
                DomainEvent::PlayerJoined {
                    name: "bob".to_string(),
                },
                DomainEvent::PlayerLeft {
                    name: "alice".to_string(),
                    online_seconds: 5,
                },
            ],
            players: vec!["bob".to_string()],
        };
        assert_eq!(batch.joined().collect::<Vec<_>>(), vec!["bob"]);
        assert_eq!(batch.left().collect::<Vec<_>>(), vec![("alice", 5)]);
    }
}
