use chrono::TimeZone;
use serde::{Deserialize, Serialize};

/// Callback message kinds accepted from 企业微信.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    Text,
    Image,
    Voice,
    Video,
    File,
    Location,
    Link,
    Event,
}

impl MsgType {
    pub const ALL: [MsgType; 8] = [
        MsgType::Text,
        MsgType::Image,
        MsgType::Voice,
        MsgType::Video,
        MsgType::File,
        MsgType::Location,
        MsgType::Link,
        MsgType::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::Text => "text",
            MsgType::Image => "image",
            MsgType::Voice => "voice",
            MsgType::Video => "video",
            MsgType::File => "file",
            MsgType::Location => "location",
            MsgType::Link => "link",
            MsgType::Event => "event",
        }
    }
}

impl std::str::FromStr for MsgType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MsgType::Text),
            "image" => Ok(MsgType::Image),
            "voice" => Ok(MsgType::Voice),
            "video" => Ok(MsgType::Video),
            "file" => Ok(MsgType::File),
            "location" => Ok(MsgType::Location),
            "link" => Ok(MsgType::Link),
            "event" => Ok(MsgType::Event),
            other => Err(crate::Error::Validation(format!("unknown message type '{}'", other))),
        }
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an earlier message that the current one replies to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuotedMessage {
    pub quoted_msg_id: Option<String>,
    pub quoted_content: Option<String>,
    pub quoted_from_user: Option<String>,
    pub quoted_from_user_name: Option<String>,
    pub quoted_msg_type: Option<String>,
}

/// One inbound callback message as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub message_id: String,
    pub config_code: String,
    pub from_user: String,
    pub from_user_name: Option<String>,
    pub to_user: Option<String>,
    pub agent_id: Option<i64>,
    pub msg_type: MsgType,

    pub content: Option<String>,
    pub media_id: Option<String>,
    pub pic_url: Option<String>,
    /// Voice codec (`amr`, `speex`).
    pub format: Option<String>,
    pub recognition: Option<String>,
    pub thumb_media_id: Option<String>,
    pub location_x: Option<f64>,
    pub location_y: Option<f64>,
    pub scale: Option<i64>,
    pub label: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,

    pub quote: Option<QuotedMessage>,

    pub event_type: Option<String>,
    pub event_key: Option<String>,

    /// Epoch seconds from the `CreateTime` field.
    pub create_time: i64,
    /// `YYYY-MM-DD HH:MM:SS` in the display timezone.
    pub created_time: String,
    /// `YYYY-MM-DD` in the display timezone, used for range queries.
    pub created_date: String,
    pub is_reply: bool,
    #[serde(default)]
    pub is_read: bool,
}

impl ReceivedMessage {
    /// Best display name: resolved name, falling back to the raw sender id.
    pub fn sender_display(&self) -> &str {
        self.from_user_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.from_user)
    }
}

/// Render epoch seconds as (display timestamp, date bucket) in `tz`.
///
/// Out-of-range timestamps render as the epoch rather than failing the message.
pub fn local_time_parts<Tz: TimeZone>(epoch_secs: i64, tz: &Tz) -> (String, String)
where
    Tz::Offset: std::fmt::Display,
{
    let utc = chrono::DateTime::from_timestamp(epoch_secs, 0).unwrap_or_default();
    let local = utc.with_timezone(tz);
    (
        local.format("%Y-%m-%d %H:%M:%S").to_string(),
        local.format("%Y-%m-%d").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_type_round_trip() {
        for t in MsgType::ALL {
            assert_eq!(t.as_str().parse::<MsgType>().unwrap(), t);
        }
        assert!(matches!(
            "mpnews".parse::<MsgType>(),
            Err(crate::Error::Validation(_))
        ));
        assert_eq!(serde_json::to_string(&MsgType::Location).unwrap(), "\"location\"");
    }

    #[test]
    fn test_local_time_parts_shanghai() {
        // 1700000000 = 2023-11-14 22:13:20 UTC
        let (ts, date) = local_time_parts(1_700_000_000, &chrono_tz::Asia::Shanghai);
        assert_eq!(ts, "2023-11-15 06:13:20");
        assert_eq!(date, "2023-11-15");

        let (ts, date) = local_time_parts(1_700_000_000, &chrono_tz::UTC);
        assert_eq!(ts, "2023-11-14 22:13:20");
        assert_eq!(date, "2023-11-14");
    }
}
