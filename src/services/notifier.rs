//! Notification delivery: renders event batches and mod changes as chat-ready
//! text and publishes them on a Redis channel for the chat bridge to pick up.

use crate::error::AppResult;
use crate::models::event::{DomainEvent, EventBatch};
use crate::models::mods::ModChange;
use crate::repositories::RedisRepository;
use crate::services::store::{EventSink, ModSink};
use async_trait::async_trait;
use chrono::{Local, TimeZone};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

const COLOR_TAG: char = '§';
/// Longest message the chat bridge forwards in one piece.
pub const MESSAGE_LIMIT: usize = 2000;

/// Removes `§x` color codes from a server or player name.
pub fn clear_color_tags(tagged: &str) -> String {
    let mut out = String::with_capacity(tagged.len());
    let mut chars = tagged.chars();
    while let Some(c) = chars.next() {
        if c == COLOR_TAG {
            chars.next();
            continue;
        }
        out.push(c);
    }
    out
}

/// `"1h 2m 3s"`, leaving out zero parts.
pub fn human_readable_time(seconds: i64) -> String {
    if seconds < 0 {
        return format!("error: {}", seconds);
    }
    if seconds == 0 {
        return "0s".to_string();
    }

    let h = seconds / 3600;
    let m = seconds % 3600 / 60;
    let s = seconds % 60;

    let mut parts = Vec::with_capacity(3);
    if h > 0 {
        parts.push(format!("{}h", h));
    }
    if m > 0 {
        parts.push(format!("{}m", m));
    }
    if s > 0 {
        parts.push(format!("{}s", s));
    }
    parts.join(" ")
}

/// Local time as `yyyy.mm.dd. hh:mm:ss`.
pub fn format_time(unix_seconds: i64) -> String {
    match Local.timestamp_opt(unix_seconds, 0).single() {
        Some(t) => t.format("%Y.%m.%d. %H:%M:%S").to_string(),
        None => unix_seconds.to_string(),
    }
}

/// Chat messages for one batch: a server transition message and/or a roster message.
pub fn render_messages(batch: &EventBatch) -> Vec<String> {
    let time = format_time(batch.time);
    let name = &batch.server_name;
    let mut messages = Vec::new();

    for event in &batch.events {
        match event {
            DomainEvent::ServerCameUp => {
                messages.push(format!("server **{}** is **up** ({})!", name, time));
            }
            DomainEvent::ServerWentDown {
                preceding_uptime_seconds,
            } => {
                let mut msg = format!("server **{}** is **down** ({})", name, time);
                if let Some(uptime) = preceding_uptime_seconds {
                    msg.push_str(&format!(" after {}", human_readable_time(*uptime)));
                }
                msg.push('!');
                messages.push(msg);
            }
            _ => {}
        }
    }

    let mut joined: Vec<&str> = batch.joined().collect();
    let mut left: Vec<(&str, i64)> = batch.left().collect();
    if joined.is_empty() && left.is_empty() {
        return messages;
    }

    let mut msg = String::new();
    if !joined.is_empty() {
        joined.sort_unstable();
        msg.push_str(&format!(
            "**Player(s) joined** ({}):\n- {}\n",
            time,
            joined.join("\n- ")
        ));
    }
    if !left.is_empty() {
        left.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        msg.push_str(&format!("**Player(s) left** ({}):\n", time));
        for (player, online) in left {
            msg.push_str(&format!(
                "- {} (after {} of gaming)\n",
                player,
                human_readable_time(online)
            ));
        }
    }
    if batch.players.is_empty() {
        msg.push_str("Server is empty");
    } else {
        msg.push_str(&format!("**Current players**: {}", batch.players.join(", ")));
    }
    messages.push(msg);

    messages
}

/// Announcement of one mod folder change, split into chat-sized pieces.
pub fn render_mod_change(change: &ModChange) -> Vec<String> {
    let mut msg = format!(
        "**{} mods changed** ({}):\n",
        change.folder.title(),
        format_time(change.time)
    );
    for name in &change.removed {
        msg.push_str(&format!("- \\- **{}**\n", name));
    }
    for name in &change.added {
        msg.push_str(&format!("- + **{}**\n", name));
    }
    split_on_lines(&msg, MESSAGE_LIMIT)
}

/// Splits `msg` into pieces of at most `limit` characters, cutting at the last
/// newline of each piece. The newline at a cut is dropped. A line longer than
/// `limit` is cut mid-line.
pub fn split_on_lines(msg: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = msg;
    while let Some((cut, _)) = rest.char_indices().nth(limit) {
        let window = &rest[..cut];
        match window.rfind('\n') {
            Some(newline) => {
                pieces.push(window[..newline].to_string());
                rest = &rest[newline + 1..];
            }
            None => {
                pieces.push(window.to_string());
                rest = &rest[cut..];
            }
        }
    }
    pieces.push(rest.to_string());
    pieces
}

#[derive(Debug, Serialize)]
struct Notification<'a, D> {
    event: &'static str,
    channel: &'a str,
    data: D,
}

#[derive(Debug, Serialize)]
struct NotificationData<'a> {
    batch: &'a EventBatch,
    messages: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ModNotificationData<'a> {
    change: &'a ModChange,
    messages: Vec<String>,
}

/// Publishes batches as JSON on one Redis channel.
#[derive(Clone)]
pub struct RedisNotifier {
    repo: Arc<RedisRepository>,
    channel: String,
}

impl RedisNotifier {
    pub fn new(repo: Arc<RedisRepository>, channel: impl Into<String>) -> Self {
        Self {
            repo,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl EventSink for RedisNotifier {
    async fn publish(&self, batch: &EventBatch) -> AppResult<()> {
        let payload = serde_json::to_string(&Notification {
            event: "presence",
            channel: &self.channel,
            data: NotificationData {
                batch,
                messages: render_messages(batch),
            },
        })?;
        let count = self.repo.publish(&self.channel, &payload).await?;
        info!(channel = %self.channel, events = batch.events.len(), count, "notification published");
        Ok(())
    }
}

#[async_trait]
impl ModSink for RedisNotifier {
    async fn publish_mods(&self, change: &ModChange) -> AppResult<()> {
        let payload = serde_json::to_string(&Notification {
            event: "mods",
            channel: &self.channel,
            data: ModNotificationData {
                change,
                messages: render_mod_change(change),
            },
        })?;
        let count = self.repo.publish(&self.channel, &payload).await?;
        info!(channel = %self.channel, folder = ?change.folder, count, "mod change published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mods::ModFolder;

    fn batch(events: Vec<DomainEvent>, players: &[&str]) -> EventBatch {
        EventBatch {
            time: 1_700_000_000,
            server_name: "Apple MC".to_string(),
            events,
            players: players.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn clear_color_tags_strips_codes() {
        assert_eq!(clear_color_tags("§aApple§r MC"), "Apple MC");
        assert_eq!(clear_color_tags("plain"), "plain");
        assert_eq!(clear_color_tags("trailing§"), "trailing");
    }

    #[test]
    fn human_readable_time_parts() {
        assert_eq!(human_readable_time(3725), "1h 2m 5s");
        assert_eq!(human_readable_time(3600), "1h");
        assert_eq!(human_readable_time(61), "1m 1s");
        assert_eq!(human_readable_time(0), "0s");
        assert_eq!(human_readable_time(-4), "error: -4");
    }

    #[test]
    fn renders_up_message() {
        let messages = render_messages(&batch(vec![DomainEvent::ServerCameUp], &[]));
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("server **Apple MC** is **up** ("));
    }

    #[test]
    fn renders_down_with_uptime_and_mass_leave() {
        let messages = render_messages(&batch(
            vec![
                DomainEvent::ServerWentDown {
                    preceding_uptime_seconds: Some(7200),
                },
                DomainEvent::PlayerLeft {
                    name: "bob".to_string(),
                    online_seconds: 60,
                },
                DomainEvent::PlayerLeft {
                    name: "alice".to_string(),
                    online_seconds: 120,
                },
            ],
            &[],
        ));
        assert_eq!(messages.len(), 2);
        assert!(messages[0].ends_with(" after 2h!"));
        let roster = &messages[1];
        let alice = roster.find("- alice (after 2m of gaming)").unwrap();
        let bob = roster.find("- bob (after 1m of gaming)").unwrap();
        assert!(alice < bob);
        assert!(roster.ends_with("Server is empty"));
    }

    #[test]
    fn renders_joined_and_current_players() {
        let messages = render_messages(&batch(
            vec![
                DomainEvent::PlayerJoined {
                    name: "carol".to_string(),
                },
                DomainEvent::PlayerJoined {
                    name: "alice".to_string(),
                },
            ],
            &["alice", "bob", "carol"],
        ));
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("):\n- alice\n- carol\n"));
        assert!(messages[0].ends_with("**Current players**: alice, bob, carol"));
    }

    #[test]
    fn renders_mod_change_removed_first() {
        let change = ModChange {
            time: 1_700_000_000,
            folder: ModFolder::BothOptional,
            added: vec!["b.jar".to_string()],
            removed: vec!["a.jar".to_string()],
        };
        let messages = render_mod_change(&change);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("**Hoster's optional both mods changed** ("));
        assert!(messages[0].ends_with("):\n- \\- **a.jar**\n- + **b.jar**\n"));
    }

    #[test]
    fn long_mod_list_is_split_at_line_ends() {
        let change = ModChange {
            time: 0,
            folder: ModFolder::Server,
            added: (0..200).map(|i| format!("mod-{:03}.jar", i)).collect(),
            removed: vec![],
        };
        let messages = render_mod_change(&change);
        assert!(messages.len() > 1);
        for piece in &messages {
            assert!(piece.chars().count() <= MESSAGE_LIMIT);
        }
        let lines: usize = messages.iter().map(|m| m.lines().count()).sum();
        assert_eq!(lines, 201);
        assert!(messages[1].starts_with("- + **mod-"));
    }

    #[test]
    fn split_on_lines_edges() {
        assert_eq!(split_on_lines("short", 10), vec!["short"]);
        assert_eq!(split_on_lines("ab\ncd\nef", 6), vec!["ab\ncd", "ef"]);
        assert_eq!(split_on_lines("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(split_on_lines("ééé\nö", 4), vec!["ééé", "ö"]);
    }

    #[test]
    fn nothing_to_render() {
        assert!(render_messages(&batch(vec![], &["alice"])).is_empty());
    }
}
