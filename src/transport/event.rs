//! Typed events carried by the `/chat/send-message` stream.
//!
//! Each line of the response body is one JSON object with a `type` tag and a
//! `data` payload:
//!
//! ```text
//! {"type":"delta","data":"<partial text>"}
//! {"type":"done","data":{"chatId":"...","title":"...","inputTokens":N,"outputTokens":N}}
//! {"type":"error","data":{"message":"..."}}
//! ```

use serde::{Deserialize, Serialize};

/// One event of a streamed turn. Zero or more `Delta`s, then exactly one
/// `Done` or `Error`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "WireEvent")]
pub enum StreamEvent {
    Delta {
        text: String,
        image_url: Option<String>,
    },
    Done(DoneEvent),
    Error {
        reason: String,
    },
}

impl StreamEvent {
    /// Parses a single (already trimmed) line of the stream body.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// True for the events that end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done(_) | StreamEvent::Error { .. })
    }
}

/// Payload of the terminal `done` event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoneEvent {
    pub chat_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Deserialize, Debug)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
enum WireEvent {
    Delta(DeltaData),
    Done(DoneEvent),
    Error(ErrorData),
}

/// Delta data is usually a bare string; image generation sends an object.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum DeltaData {
    Text(String),
    Rich {
        #[serde(default)]
        text: String,
        #[serde(default, rename = "imageUrl")]
        image_url: Option<String>,
    },
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ErrorData {
    Object {
        #[serde(default)]
        message: String,
    },
    Text(String),
}

impl From<WireEvent> for StreamEvent {
    fn from(wire: WireEvent) -> Self {
        match wire {
            WireEvent::Delta(DeltaData::Text(text)) => StreamEvent::Delta {
                text,
                image_url: None,
            },
            WireEvent::Delta(DeltaData::Rich { text, image_url }) => {
                StreamEvent::Delta { text, image_url }
            }
            WireEvent::Done(done) => StreamEvent::Done(done),
            WireEvent::Error(ErrorData::Object { message } | ErrorData::Text(message)) => {
                StreamEvent::Error { reason: message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_with_plain_text() {
        let event = StreamEvent::from_line(r#"{"type":"delta","data":"Hel"}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Delta {
                text: "Hel".to_string(),
                image_url: None
            }
        );
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_delta_with_image_object() {
        let line = r#"{"type":"delta","data":{"text":"","imageUrl":"https://cdn/img.png"}}"#;
        let event = StreamEvent::from_line(line).unwrap();
        assert_eq!(
            event,
            StreamEvent::Delta {
                text: String::new(),
                image_url: Some("https://cdn/img.png".to_string())
            }
        );
    }

    #[test]
    fn test_done_payload() {
        let line = r#"{"type":"done","data":{"chatId":"c1","title":"Greeting","inputTokens":12,"outputTokens":40}}"#;
        let StreamEvent::Done(done) = StreamEvent::from_line(line).unwrap() else {
            panic!("expected done");
        };
        assert_eq!(done.chat_id, "c1");
        assert_eq!(done.title, "Greeting");
        assert_eq!(done.input_tokens, Some(12));
        assert_eq!(done.output_tokens, Some(40));
        assert_eq!(done.image_url, None);
    }

    #[test]
    fn test_error_payload() {
        let line = r#"{"type":"error","data":{"message":"model overloaded"}}"#;
        let event = StreamEvent::from_line(line).unwrap();
        assert_eq!(
            event,
            StreamEvent::Error {
                reason: "model overloaded".to_string()
            }
        );
        assert!(event.is_terminal());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(StreamEvent::from_line(r#"{"type":"ping","data":null}"#).is_err());
    }

    #[test]
    fn test_truncated_line_is_rejected() {
        assert!(StreamEvent::from_line(r#"{"type":"delta","da"#).is_err());
    }
}
