//! Rendering of channel broadcasts for the terminal.

use chrono::{DateTime, Utc};
use hydra_realtime::{ChannelFrame, Severity};

/// How broadcasts are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One human-readable line per displayable message.
    Text,
    /// Every frame verbatim, one JSON object per line.
    Json,
}

/// Renders `frame`, or `None` when there is nothing to show.
pub fn render(frame: &ChannelFrame, format: OutputFormat) -> Option<String> {
    match format {
        OutputFormat::Json => match serde_json::to_string(frame.raw()) {
            Ok(line) => Some(line),
            Err(e) => {
                tracing::warn!(channel = %frame.channel(), error = %e, "cannot encode frame");
                None
            }
        },
        OutputFormat::Text => render_text(frame),
    }
}

fn render_text(frame: &ChannelFrame) -> Option<String> {
    let message = match frame.decode() {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(channel = %frame.channel(), error = %e, "undecodable payload");
            return None;
        }
    };
    let line = message.describe()?;

    let marker = match line.severity {
        Severity::Normal => frame
            .sender()
            .filter(|sender| !sender.name.is_empty())
            .map(|sender| format!("<{}> ", sender.name))
            .unwrap_or_default(),
        Severity::Info => "* ".to_string(),
        Severity::Critical => "! ".to_string(),
    };
    Some(format!(
        "{} [{}] {}{}",
        clock(frame.stamp()),
        frame.channel(),
        marker,
        line.text
    ))
}

fn clock(stamp: Option<f64>) -> String {
    stamp
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs.floor() as i64, 0))
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn wire(kind: &str, message: Value) -> Value {
        json!({
            "channel": "race-7",
            "type": kind,
            "sender": {"guid": "g-1", "name": "bob"},
            "stamp": 3_723,
            "message": message,
        })
    }

    fn frame(kind: &str, message: Value) -> ChannelFrame {
        ChannelFrame::try_from(wire(kind, message)).unwrap()
    }

    #[test]
    fn test_chat_line() {
        let line = render(&frame("CHAT", json!("hello")), OutputFormat::Text).unwrap();
        assert_eq!(line, "01:02:03 [race-7] <bob> hello");
    }

    #[test]
    fn test_system_lines_are_marked() {
        let started = frame("RACE_UPDATE", json!({"status": "STARTED"}));
        assert_eq!(
            render(&started, OutputFormat::Text).unwrap(),
            "01:02:03 [race-7] ! The race has started!"
        );

        let ended = frame("RACE_UPDATE", json!({"status": "ENDED"}));
        assert!(render(&ended, OutputFormat::Text).unwrap().contains("* The race has ended."));
    }

    #[test]
    fn test_silent_messages() {
        let ten = frame("RACE_UPDATE", json!({"status": "10SEC"}));
        assert!(render(&ten, OutputFormat::Text).is_none());

        let unknown = frame("SOMETHING_NEW", json!({}));
        assert!(render(&unknown, OutputFormat::Text).is_none());

        let broken = frame("CHAT", json!({"not": "a string"}));
        assert!(render(&broken, OutputFormat::Text).is_none());
    }

    #[test]
    fn test_json_is_verbatim() {
        let mut sent = wire("CHAT", json!("hello"));
        sent["guid"] = json!("msg-9");
        let chat = ChannelFrame::try_from(sent.clone()).unwrap();
        let line = render(&chat, OutputFormat::Json).unwrap();
        let printed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(printed, sent);
        assert_eq!(printed["stamp"], json!(3_723));
    }

    #[test]
    fn test_missing_stamp() {
        let chat = ChannelFrame::try_from(json!({
            "channel": "race-7",
            "type": "CHAT",
            "message": "hi"
        }))
        .unwrap();
        assert_eq!(
            render(&chat, OutputFormat::Text).unwrap(),
            "--:--:-- [race-7] hi"
        );
    }

    #[test]
    fn test_odd_sender_and_text_stamp() {
        let chat = ChannelFrame::try_from(json!({
            "channel": "race-7",
            "type": "CHAT",
            "sender": {"guid": "g-1", "name": null},
            "stamp": "3723",
            "message": "hi"
        }))
        .unwrap();
        assert_eq!(
            render(&chat, OutputFormat::Text).unwrap(),
            "01:02:03 [race-7] hi"
        );
    }
}
