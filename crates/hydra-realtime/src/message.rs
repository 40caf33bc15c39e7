//! Channel broadcast frames and the typed payloads they carry.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{RealtimeError, Result};
use crate::protocol::{self, ChannelId};

/// Broadcast message types pushed by the server.
pub mod kinds {
    /// Plain-text chat line.
    pub const CHAT: &str = "CHAT";
    /// Race status change.
    pub const RACE_UPDATE: &str = "RACE_UPDATE";
    /// Entrant status change.
    pub const ENTRY_UPDATE: &str = "ENTRY_UPDATE";
    /// Error generated on the client side of a channel.
    pub const CLIENT_ERROR: &str = "CLIENT_ERROR";
    /// Server-side critical notice.
    pub const CRITICAL: &str = "CRITICAL";
}

/// Short public description of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserBlurb {
    /// Stable user id.
    pub guid: String,
    /// URL slug, if the user has one.
    pub slug: Option<String>,
    /// Display name.
    pub name: String,
}

impl UserBlurb {
    /// Reads a sender object, tolerating missing or mistyped fields.
    ///
    /// Returns `None` unless `value` is an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            guid: text("guid").unwrap_or_default(),
            slug: text("slug"),
            name: text("name").unwrap_or_default(),
        })
    }
}

/// One broadcast as it arrived on a channel.
///
/// The frame keeps the server's object untouched; the accessors read the
/// well-known fields leniently, so a field of an unexpected shape reads as
/// absent instead of rejecting the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFrame {
    channel: ChannelId,
    raw: Map<String, Value>,
}

impl ChannelFrame {
    /// Wraps a broadcast object. Returns `None` when its `channel` is falsy.
    ///
    /// A non-string channel is keyed by its JSON text, so `7` and `"7"`
    /// reach the same handles.
    pub fn from_object(raw: Map<String, Value>) -> Option<Self> {
        let channel = match raw.get("channel")? {
            Value::String(name) if !name.is_empty() => name.clone(),
            other if protocol::is_truthy(other) => other.to_string(),
            _ => return None,
        };
        Some(Self { channel, raw })
    }

    /// Channel the broadcast belongs to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Message type, see [`kinds`].
    pub fn kind(&self) -> Option<&str> {
        self.raw.get("type").and_then(Value::as_str)
    }

    /// Author of the message, `None` for system messages.
    pub fn sender(&self) -> Option<UserBlurb> {
        self.raw.get("sender").and_then(UserBlurb::from_value)
    }

    /// Server time in unix seconds; numeric strings are accepted.
    pub fn stamp(&self) -> Option<f64> {
        self.raw.get("stamp").and_then(coerce_number)
    }

    /// Type-specific payload, `Null` when absent.
    pub fn message(&self) -> &Value {
        static NULL: Value = Value::Null;
        self.raw.get("message").unwrap_or(&NULL)
    }

    /// Any top-level field, including ones this client does not model.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    /// The frame exactly as the server sent it.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Consumes the frame, returning the server's object.
    pub fn into_raw(self) -> Map<String, Value> {
        self.raw
    }

    /// Decodes the payload according to the frame's type.
    pub fn decode(&self) -> Result<RealtimeMessage> {
        let payload = self.message().clone();
        let decoded = match self.kind() {
            Some(kinds::CHAT) => RealtimeMessage::Chat(serde_json::from_value(payload)?),
            Some(kinds::RACE_UPDATE) => {
                RealtimeMessage::RaceUpdate(serde_json::from_value(payload)?)
            }
            Some(kinds::ENTRY_UPDATE) => {
                RealtimeMessage::EntryUpdate(serde_json::from_value(payload)?)
            }
            Some(kinds::CLIENT_ERROR) => {
                RealtimeMessage::ClientError(serde_json::from_value(payload)?)
            }
            Some(kinds::CRITICAL) => RealtimeMessage::Critical(serde_json::from_value(payload)?),
            other => RealtimeMessage::Other {
                kind: other.map(str::to_string),
                payload,
            },
        };
        Ok(decoded)
    }
}

impl Serialize for ChannelFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChannelFrame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Map::deserialize(deserializer)?;
        Self::from_object(raw).ok_or_else(|| de::Error::custom("broadcast without a channel"))
    }
}

impl TryFrom<Value> for ChannelFrame {
    type Error = RealtimeError;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Object(raw) = value else {
            return Err(RealtimeError::InvalidPayload {
                reason: "broadcast is not a JSON object".to_string(),
            });
        };
        Self::from_object(raw).ok_or_else(|| RealtimeError::InvalidPayload {
            reason: "broadcast without a channel".to_string(),
        })
    }
}

/// Typed view of a broadcast payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeMessage {
    /// Chat text.
    Chat(String),
    /// Race status change.
    RaceUpdate(RaceUpdate),
    /// Entrant status change.
    EntryUpdate(EntryUpdate),
    /// Client-side error text.
    ClientError(String),
    /// Critical server notice.
    Critical(String),
    /// A type this client does not know about.
    Other {
        /// Raw type field.
        kind: Option<String>,
        /// Raw payload.
        payload: Value,
    },
}

/// Visual weight of a rendered chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Ordinary chat.
    Normal,
    /// Informational system notice.
    Info,
    /// Needs attention.
    Critical,
}

/// Human-readable rendering of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    /// Rendered text.
    pub text: String,
    /// Visual weight.
    pub severity: Severity,
}

impl ChatLine {
    fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }
}

impl RealtimeMessage {
    /// Renders the line a chat log shows for this message, if any.
    pub fn describe(&self) -> Option<ChatLine> {
        match self {
            RealtimeMessage::Chat(text) => Some(ChatLine::new(text.clone(), Severity::Normal)),
            RealtimeMessage::ClientError(text) | RealtimeMessage::Critical(text) => {
                Some(ChatLine::new(text.clone(), Severity::Critical))
            }
            RealtimeMessage::RaceUpdate(update) => update.describe(),
            RealtimeMessage::EntryUpdate(update) => Some(update.describe()),
            RealtimeMessage::Other { .. } => None,
        }
    }
}

/// Race lifecycle status carried by `RACE_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RaceStatus {
    /// Counting down to the start; the parameter carries seconds left.
    Countdown,
    /// Ten seconds to the start.
    TenSeconds,
    /// The race is running.
    Started,
    /// Every entrant is finished or out.
    Ended,
    /// Called off.
    Canceled,
    /// Late entrants may no longer join.
    LateCutoff,
    /// Quitting is penalized from here on.
    QuitCutoff,
    /// A status this client does not know.
    Other(String),
}

impl From<String> for RaceStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "COUNTDOWN" => RaceStatus::Countdown,
            "10SEC" => RaceStatus::TenSeconds,
            "STARTED" => RaceStatus::Started,
            "ENDED" => RaceStatus::Ended,
            "CANCELED" => RaceStatus::Canceled,
            "LATECUTOFF" => RaceStatus::LateCutoff,
            "QUITCUTOFF" => RaceStatus::QuitCutoff,
            _ => RaceStatus::Other(raw),
        }
    }
}

impl From<RaceStatus> for String {
    fn from(status: RaceStatus) -> Self {
        status.as_str().to_string()
    }
}

impl RaceStatus {
    /// Wire spelling of the status.
    pub fn as_str(&self) -> &str {
        match self {
            RaceStatus::Countdown => "COUNTDOWN",
            RaceStatus::TenSeconds => "10SEC",
            RaceStatus::Started => "STARTED",
            RaceStatus::Ended => "ENDED",
            RaceStatus::Canceled => "CANCELED",
            RaceStatus::LateCutoff => "LATECUTOFF",
            RaceStatus::QuitCutoff => "QUITCUTOFF",
            RaceStatus::Other(raw) => raw,
        }
    }
}

/// Payload of a `RACE_UPDATE` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceUpdate {
    /// Race id, when the server includes it.
    #[serde(default)]
    pub race: Option<String>,
    /// New status.
    pub status: RaceStatus,
    /// Server time of the change.
    #[serde(default)]
    pub stamp: Option<f64>,
    /// Status parameter, e.g. seconds left during a countdown.
    #[serde(default)]
    pub parameter: Option<i64>,
}

impl RaceUpdate {
    fn describe(&self) -> Option<ChatLine> {
        let line = match &self.status {
            RaceStatus::Canceled => ChatLine::new("The race has been canceled.", Severity::Info),
            RaceStatus::Ended => ChatLine::new("The race has ended.", Severity::Info),
            RaceStatus::Countdown => match self.parameter {
                Some(secs @ (10 | 5)) => ChatLine::new(
                    format!("The race will start in {secs} seconds."),
                    Severity::Critical,
                ),
                Some(secs @ 1..=4) => ChatLine::new(format!("{secs}..."), Severity::Critical),
                _ => return None,
            },
            RaceStatus::TenSeconds => return None,
            RaceStatus::Started => ChatLine::new("The race has started!", Severity::Critical),
            RaceStatus::LateCutoff => {
                ChatLine::new("The race is now closed to late entrants.", Severity::Info)
            }
            RaceStatus::QuitCutoff => {
                ChatLine::new("The penalty-free quit period has ended.", Severity::Info)
            }
            RaceStatus::Other(raw) => ChatLine::new(
                format!("The race status has been set to {raw}"),
                Severity::Info,
            ),
        };
        Some(line)
    }
}

/// Entrant status carried by `ENTRY_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryStatus {
    /// Entered the race.
    Joined,
    /// Ready to start.
    Ready,
    /// Finished.
    Done,
    /// Did not finish.
    Dnf,
    /// Disqualified.
    Dq,
    /// Quit before the start.
    Dropped,
    /// Removed by a moderator.
    Removed,
    /// A status this client does not know.
    Other(String),
}

impl From<String> for EntryStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "JOINED" => EntryStatus::Joined,
            "READY" => EntryStatus::Ready,
            "DONE" => EntryStatus::Done,
            "DNF" => EntryStatus::Dnf,
            "DQ" => EntryStatus::Dq,
            "DROPPED" => EntryStatus::Dropped,
            "REMOVED" => EntryStatus::Removed,
            _ => EntryStatus::Other(raw),
        }
    }
}

impl From<EntryStatus> for String {
    fn from(status: EntryStatus) -> Self {
        status.as_str().to_string()
    }
}

impl EntryStatus {
    /// Wire spelling of the status.
    pub fn as_str(&self) -> &str {
        match self {
            EntryStatus::Joined => "JOINED",
            EntryStatus::Ready => "READY",
            EntryStatus::Done => "DONE",
            EntryStatus::Dnf => "DNF",
            EntryStatus::Dq => "DQ",
            EntryStatus::Dropped => "DROPPED",
            EntryStatus::Removed => "REMOVED",
            EntryStatus::Other(raw) => raw,
        }
    }
}

/// Payload of an `ENTRY_UPDATE` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryUpdate {
    /// The entry as the server describes it; `entry.player.name` is used for rendering.
    #[serde(default)]
    pub entry: Value,
    /// New status.
    pub status: EntryStatus,
    /// Server time of the change.
    #[serde(default)]
    pub stamp: Option<f64>,
    /// Seconds since the race start.
    #[serde(default)]
    pub offset: Option<f64>,
    /// Category startup offset; numeric or numeric string.
    #[serde(default)]
    pub startup_offset: Option<Value>,
    /// Status parameter.
    #[serde(default)]
    pub parameter: Option<i64>,
}

impl EntryUpdate {
    /// Display name of the entrant.
    pub fn player_name(&self) -> &str {
        self.entry
            .get("player")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    /// Finish time in seconds: `offset + startupOffset`.
    pub fn finish_offset(&self) -> f64 {
        let startup = self
            .startup_offset
            .as_ref()
            .and_then(coerce_number)
            .unwrap_or(0.0);
        self.offset.unwrap_or(0.0) + startup
    }

    fn describe(&self) -> ChatLine {
        let name = self.player_name();
        let text = match &self.status {
            EntryStatus::Joined => format!("{name} has joined the race."),
            EntryStatus::Ready => format!("{name} is ready."),
            EntryStatus::Done => format!(
                "{name} just finished with a time of {}.",
                format_duration(self.finish_offset(), true)
            ),
            EntryStatus::Dnf => format!("{name} has forfeited."),
            EntryStatus::Dq => format!("{name} has been disqualified."),
            EntryStatus::Dropped => format!("{name} has quit."),
            EntryStatus::Removed => format!("{name} has been removed from the race."),
            EntryStatus::Other(raw) => format!("{name}'s status has changed to {raw}"),
        };
        ChatLine::new(text, Severity::Info)
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Formats seconds as `[-][Nd ]HH:MM:SS`.
///
/// Days are split out only when `show_days` is set; otherwise hours grow
/// past 24.
pub fn format_duration(seconds: f64, show_days: bool) -> String {
    let mut out = String::new();
    let mut duration = seconds;
    if duration < 0.0 {
        out.push('-');
        duration = -duration;
    }

    let total = duration.floor() as u64;
    let secs = total % 60;
    let minutes = (total / 60) % 60;
    let total_hours = total / 3600;

    if show_days {
        let days = total_hours / 24;
        if days > 0 {
            out.push_str(&format!("{days}d "));
        }
        out.push_str(&format!("{:02}:{minutes:02}:{secs:02}", total_hours % 24));
    } else {
        out.push_str(&format!("{total_hours:02}:{minutes:02}:{secs:02}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(kind: &str, message: Value) -> ChannelFrame {
        ChannelFrame::try_from(json!({
            "channel": "c7cda03c",
            "type": kind,
            "stamp": 1000,
            "message": message,
        }))
        .unwrap()
    }

    #[test]
    fn test_frame_parses_from_wire() {
        let frame: ChannelFrame = serde_json::from_value(json!({
            "channel": "abc",
            "type": "CHAT",
            "sender": {"guid": "u1", "slug": "runner", "name": "Runner"},
            "stamp": 1000,
            "message": "hi"
        }))
        .unwrap();
        assert_eq!(frame.kind(), Some("CHAT"));
        assert_eq!(frame.sender().map(|s| s.name), Some("Runner".to_string()));
        assert_eq!(frame.stamp(), Some(1000.0));
        assert_eq!(frame.decode().unwrap(), RealtimeMessage::Chat("hi".to_string()));
    }

    #[test]
    fn test_frame_keeps_unknown_fields_verbatim() {
        let wire = json!({
            "channel": "c7",
            "type": "CHAT",
            "message": "hi",
            "stamp": 1000,
            "guid": "msg-42"
        });
        let frame = ChannelFrame::try_from(wire.clone()).unwrap();
        assert_eq!(frame.get("guid"), Some(&json!("msg-42")));
        assert_eq!(serde_json::to_value(&frame).unwrap(), wire);
        assert_eq!(frame.into_raw()["stamp"], json!(1000));
    }

    #[test]
    fn test_odd_field_shapes_read_leniently() {
        let frame = ChannelFrame::try_from(json!({
            "channel": "c7",
            "type": "CHAT",
            "sender": {"guid": "u1", "name": null},
            "stamp": "1000",
            "message": "hi"
        }))
        .unwrap();
        let sender = frame.sender().unwrap();
        assert_eq!(sender.guid, "u1");
        assert_eq!(sender.name, "");
        assert_eq!(frame.stamp(), Some(1000.0));

        let odd =
            ChannelFrame::try_from(json!({"channel": 7, "type": 3, "sender": "bob"})).unwrap();
        assert_eq!(odd.channel(), "7");
        assert_eq!(odd.kind(), None);
        assert!(odd.sender().is_none());
        assert_eq!(odd.message(), &Value::Null);
    }

    #[test]
    fn test_frame_needs_truthy_channel() {
        assert!(ChannelFrame::try_from(json!({"channel": ""})).is_err());
        assert!(ChannelFrame::try_from(json!({"channel": 0})).is_err());
        assert!(ChannelFrame::try_from(json!({"type": "CHAT"})).is_err());
        assert!(ChannelFrame::try_from(json!("c7")).is_err());
        assert!(serde_json::from_str::<ChannelFrame>(r#"{"channel":null}"#).is_err());
    }

    #[test]
    fn test_race_update_decoding() {
        let msg = frame(
            kinds::RACE_UPDATE,
            json!({"status": "COUNTDOWN", "stamp": 50, "parameter": 5}),
        )
        .decode()
        .unwrap();
        let line = msg.describe().unwrap();
        assert_eq!(line.text, "The race will start in 5 seconds.");
        assert_eq!(line.severity, Severity::Critical);

        let quiet = frame(kinds::RACE_UPDATE, json!({"status": "COUNTDOWN", "parameter": 7}))
            .decode()
            .unwrap();
        assert!(quiet.describe().is_none());

        let ten = frame(kinds::RACE_UPDATE, json!({"status": "10SEC"})).decode().unwrap();
        assert!(ten.describe().is_none());

        let custom = frame(kinds::RACE_UPDATE, json!({"status": "PAUSED"})).decode().unwrap();
        assert_eq!(
            custom.describe().unwrap().text,
            "The race status has been set to PAUSED"
        );
    }

    #[test]
    fn test_entry_done_uses_startup_offset() {
        let msg = frame(
            kinds::ENTRY_UPDATE,
            json!({
                "entry": {"player": {"name": "Alice"}},
                "status": "DONE",
                "offset": 3600.5,
                "startupOffset": "61"
            }),
        )
        .decode()
        .unwrap();
        match &msg {
            RealtimeMessage::EntryUpdate(update) => {
                assert_eq!(update.status, EntryStatus::Done);
                assert_eq!(update.finish_offset(), 3661.5);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            msg.describe().unwrap().text,
            "Alice just finished with a time of 01:01:01."
        );
    }

    #[test]
    fn test_entry_status_lines() {
        let dropped = frame(
            kinds::ENTRY_UPDATE,
            json!({"entry": {"player": {"name": "Bob"}}, "status": "DROPPED"}),
        )
        .decode()
        .unwrap();
        assert_eq!(dropped.describe().unwrap().text, "Bob has quit.");
    }

    #[test]
    fn test_unknown_kind_is_other() {
        let msg = frame("MYSTERY", json!({"x": 1})).decode().unwrap();
        assert!(matches!(msg, RealtimeMessage::Other { .. }));
        assert!(msg.describe().is_none());
    }

    #[test]
    fn test_critical_severity() {
        let msg = frame(kinds::CRITICAL, json!("server restarting")).decode().unwrap();
        assert_eq!(msg.describe().unwrap().severity, Severity::Critical);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0, false), "00:00:00");
        assert_eq!(format_duration(59.9, false), "00:00:59");
        assert_eq!(format_duration(-61.0, false), "-00:01:01");
        assert_eq!(format_duration(90000.0, false), "25:00:00");
        assert_eq!(format_duration(90000.0, true), "1d 01:00:00");
    }
}
