//! Chat message domain types.
//!
//! A message is a role plus an ordered, non-empty sequence of content parts.
//! Media parts carry raw bytes with their MIME type; on disk the bytes are
//! stored base64-encoded to keep conversation files valid JSON.

use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Parse a role from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    /// Wire string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One typed piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPart {
    Text(String),
    Image {
        #[serde(with = "b64_bytes")]
        data: Vec<u8>,
        mime: String,
    },
    Audio {
        #[serde(with = "b64_bytes")]
        data: Vec<u8>,
        mime: String,
    },
}

impl ContentPart {
    /// Text content, if this part carries any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    /// Build a message from a role and parts.
    #[must_use]
    pub const fn new(role: Role, parts: Vec<ContentPart>) -> Self {
        Self { role, parts }
    }

    /// Convenience constructor for a single-part text message.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    /// An assistant reply holding one text part.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Concatenation of all text parts, in order.
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Serde helper storing byte payloads as base64 strings.
mod b64_bytes {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_and_render_agree() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("tool"), None);
    }

    #[test]
    fn media_bytes_survive_json() {
        let message = Message::new(
            Role::User,
            vec![
                ContentPart::Text("look at this".into()),
                ContentPart::Image {
                    data: vec![0xff, 0xd8, 0xff, 0x00],
                    mime: "image/jpeg".into(),
                },
            ],
        );
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn joined_text_skips_media_parts() {
        let message = Message::new(
            Role::User,
            vec![
                ContentPart::Text("a".into()),
                ContentPart::Audio {
                    data: vec![1, 2, 3],
                    mime: "audio/wav".into(),
                },
                ContentPart::Text("b".into()),
            ],
        );
        assert_eq!(message.joined_text(), "a b");
    }
}
