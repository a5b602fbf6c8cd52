//! Presence tracker: turns successive snapshots into up/down and join/leave events.

use crate::models::event::DomainEvent;
use crate::models::presence::PresenceState;
use crate::models::snapshot::Snapshot;
use std::collections::{BTreeSet, HashMap};

/// Owns the [`PresenceState`] of one monitored server. Single writer: only the
/// poll loop calls [`PresenceTracker::observe`].
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    state: PresenceState,
}

impl PresenceTracker {
    /// Server down, nobody online.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known state, e.g. players whose sessions are still open in storage.
    pub fn with_state(state: PresenceState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &PresenceState {
        &self.state
    }

    /// Applies one observation taken at `now` (Unix seconds). `None` means unreachable.
    ///
    /// Order of the returned events: server transition first, then joins, then
    /// leaves; names inside each group are sorted.
    pub fn observe(&mut self, now: i64, latest: Option<&Snapshot>) -> Vec<DomainEvent> {
        let mut events = Vec::new();

        let current: BTreeSet<&str> = match (self.state.server_up, latest) {
            (false, Some(snapshot)) => {
                self.state.server_up = true;
                self.state.up_since = Some(now);
                events.push(DomainEvent::ServerCameUp);
                snapshot.players.iter().map(String::as_str).collect()
            }
            (true, None) => {
                self.state.server_up = false;
                let preceding_uptime_seconds = self.state.up_since.take().map(|t| now - t);
                events.push(DomainEvent::ServerWentDown {
                    preceding_uptime_seconds,
                });
                BTreeSet::new()
            }
            (false, None) => return events,
            (true, Some(snapshot)) => snapshot.players.iter().map(String::as_str).collect(),
        };

        let known = &self.state.player_join_times;
        if current.len() == known.len() && current.iter().all(|p| known.contains_key(*p)) {
            return events;
        }

        let joined: Vec<String> = current
            .iter()
            .filter(|p| !known.contains_key(**p))
            .map(|p| p.to_string())
            .collect();
        let mut left: Vec<String> = known
            .keys()
            .filter(|p| !current.contains(p.as_str()))
            .cloned()
            .collect();
        left.sort();

        for name in joined {
            self.state.player_join_times.insert(name.clone(), now);
            events.push(DomainEvent::PlayerJoined { name });
        }
        for name in left {
            if let Some(joined_at) = self.state.player_join_times.remove(&name) {
                events.push(DomainEvent::PlayerLeft {
                    name,
                    online_seconds: now - joined_at,
                });
            }
        }

        events
    }

    /// Current roster, sorted.
    pub fn online_players(&self) -> Vec<String> {
        let mut players: Vec<String> = self.state.player_join_times.keys().cloned().collect();
        players.sort();
        players
    }

    /// Join times, for callers that need to report current online time.
    pub fn join_times(&self) -> &HashMap<String, i64> {
        &self.state.player_join_times
    }
}
