//! Wire payloads exchanged with subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::Channel;

/// Discriminator value of a speaking-state update.
pub const SPEAKING_STATE_TYPE: &str = "speaking_state";

/// Message fanned out to every live connection on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub text: String,
    pub session: Channel,
}

/// Speaking flags reported by a subscriber. Absent channels are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<bool>,
}

impl SpeakingUpdate {
    /// The flags this update carries, in channel order.
    pub fn flags(&self) -> Vec<(Channel, bool)> {
        [
            (Channel::Left, self.left),
            (Channel::Right, self.right),
            (Channel::Audience, self.audience),
        ]
        .into_iter()
        .filter_map(|(channel, flag)| flag.map(|f| (channel, f)))
        .collect()
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Speaking(SpeakingUpdate),
    /// Text to enqueue on the sender's own channel.
    Message(String),
}

impl InboundFrame {
    /// Classify a text frame.
    ///
    /// A JSON object whose `type` is `speaking_state` is a speaking update.
    /// A JSON object with a string `text` or `message` field enqueues that
    /// string. Anything else enqueues the raw frame.
    pub fn parse(raw: &str) -> Self {
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(raw) else {
            return InboundFrame::Message(raw.to_string());
        };

        if object.get("type").and_then(Value::as_str) == Some(SPEAKING_STATE_TYPE) {
            let update = serde_json::from_value::<SpeakingUpdate>(Value::Object(object.clone()));
            if let Ok(update) = update {
                return InboundFrame::Speaking(update);
            }
        }

        object
            .get("text")
            .or_else(|| object.get("message"))
            .and_then(Value::as_str)
            .map(|s| InboundFrame::Message(s.to_string()))
            .unwrap_or_else(|| InboundFrame::Message(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_shape() {
        let payload = OutboundPayload {
            text: "Hello".into(),
            session: Channel::Left,
        };
        let json: Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({"text": "Hello", "session": "left"}));
    }

    #[test]
    fn test_parse_speaking_update() {
        let frame = InboundFrame::parse(r#"{"type":"speaking_state","left":false,"right":true}"#);
        let InboundFrame::Speaking(update) = frame else {
            panic!("expected speaking update");
        };
        assert_eq!(
            update.flags(),
            vec![(Channel::Left, false), (Channel::Right, true)]
        );
    }

    #[test]
    fn test_parse_speaking_update_with_bad_field_falls_back_to_message() {
        let raw = r#"{"type":"speaking_state","left":"yes"}"#;
        assert_eq!(InboundFrame::parse(raw), InboundFrame::Message(raw.to_string()));
    }

    #[test]
    fn test_parse_object_with_text_field() {
        assert_eq!(
            InboundFrame::parse(r#"{"text":"Hi there"}"#),
            InboundFrame::Message("Hi there".into())
        );
        assert_eq!(
            InboundFrame::parse(r#"{"message":"From message"}"#),
            InboundFrame::Message("From message".into())
        );
    }

    #[test]
    fn test_parse_plain_text_and_other_json() {
        assert_eq!(
            InboundFrame::parse("just words"),
            InboundFrame::Message("just words".into())
        );
        assert_eq!(
            InboundFrame::parse("[1,2,3]"),
            InboundFrame::Message("[1,2,3]".into())
        );
        assert_eq!(
            InboundFrame::parse(r#"{"foo":1}"#),
            InboundFrame::Message(r#"{"foo":1}"#.into())
        );
    }
}
