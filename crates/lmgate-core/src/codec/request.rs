//! Wire request decoding.
//!
//! `content` on the wire is either a plain string or an array of typed
//! parts. Media parts must carry RFC-2397 base64 data URLs; malformed parts
//! are dropped with a log entry, and if a message loses every part it falls
//! back to one text part holding the stringified content so the engine
//! still receives something.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::{ContentPart, Message, Role};
use crate::error::CodecError;

/// A decoded generation request: the messages appended this turn plus
/// optional sampling overrides.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    /// Echoed into the reply envelope; otherwise ignored.
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRequest {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    top_k: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Value,
}

/// Decode a request payload.
pub fn decode_chat_request(payload: &str) -> Result<ChatRequest, CodecError> {
    let wire: WireRequest =
        serde_json::from_str(payload).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let mut messages = Vec::with_capacity(wire.messages.len());
    for message in wire.messages {
        let role =
            Role::parse(&message.role).ok_or_else(|| CodecError::InvalidRole(message.role))?;
        messages.push(Message::new(role, decode_content(&message.content)));
    }

    Ok(ChatRequest {
        messages,
        temperature: wire.temperature,
        top_p: wire.top_p,
        top_k: wire.top_k,
        model: wire.model,
    })
}

/// Decode a `content` value into at least one part.
fn decode_content(content: &Value) -> Vec<ContentPart> {
    match content {
        Value::String(text) => vec![ContentPart::Text(text.clone())],
        Value::Array(items) => {
            let parts: Vec<ContentPart> = items.iter().filter_map(decode_part).collect();
            if parts.is_empty() {
                // Nothing usable survived; hand the engine the raw content.
                vec![ContentPart::Text(content.to_string())]
            } else {
                parts
            }
        }
        other => vec![ContentPart::Text(other.to_string())],
    }
}

/// Decode one typed content part. Returns `None` for anything malformed.
fn decode_part(part: &Value) -> Option<ContentPart> {
    let kind = part.get("type").and_then(Value::as_str)?;
    match kind {
        "text" => {
            let text = part.get("text").and_then(Value::as_str)?;
            Some(ContentPart::Text(text.to_string()))
        }
        "image_url" => {
            let url = part
                .get("image_url")
                .and_then(|v| v.get("url"))
                .and_then(Value::as_str)?;
            match parse_data_url(url, "image/") {
                Some((data, mime)) => Some(ContentPart::Image { data, mime }),
                None => {
                    warn!("Dropping image part with malformed data URL");
                    None
                }
            }
        }
        "audio_url" => {
            let url = part
                .get("audio_url")
                .and_then(|v| v.get("url"))
                .and_then(Value::as_str)?;
            match parse_data_url(url, "audio/") {
                Some((data, mime)) => Some(ContentPart::Audio { data, mime }),
                None => {
                    warn!("Dropping audio part with malformed data URL");
                    None
                }
            }
        }
        other => {
            warn!(part_type = other, "Dropping content part of unknown type");
            None
        }
    }
}

/// Parse a `data:<mime>;base64,<payload>` URL whose MIME type starts with
/// `family`. Returns the decoded bytes and the normalized MIME type.
fn parse_data_url(url: &str, family: &str) -> Option<(Vec<u8>, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    let mime = mime.trim().to_ascii_lowercase();
    if mime.is_empty() || !mime.starts_with(family) {
        return None;
    }
    let data = BASE64.decode(payload).ok()?;
    Some((data, mime))
}

/// Render a part back to its canonical wire JSON.
#[must_use]
pub fn encode_content_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text(text) => serde_json::json!({ "type": "text", "text": text }),
        ContentPart::Image { data, mime } => serde_json::json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{};base64,{}", mime, BASE64.encode(data)) },
        }),
        ContentPart::Audio { data, mime } => serde_json::json!({
            "type": "audio_url",
            "audio_url": { "url": format!("data:{};base64,{}", mime, BASE64.encode(data)) },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_content_becomes_one_text_part() {
        let req = decode_chat_request(r#"{"messages":[{"role":"user","content":"Hi"}]}"#).unwrap();
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
        assert_eq!(req.messages[0].parts, vec![ContentPart::Text("Hi".into())]);
    }

    #[test]
    fn sampling_overrides_are_optional() {
        let req = decode_chat_request(
            r#"{"messages":[{"role":"user","content":"x"}],"temperature":0.1,"top_k":5}"#,
        )
        .unwrap();
        assert_eq!(req.temperature, Some(0.1));
        assert_eq!(req.top_p, None);
        assert_eq!(req.top_k, Some(5));
    }

    #[test]
    fn mixed_part_array_decodes_in_order() {
        let b64 = BASE64.encode([1u8, 2, 3]);
        let payload = format!(
            r#"{{"messages":[{{"role":"user","content":[
                {{"type":"text","text":"describe"}},
                {{"type":"image_url","image_url":{{"url":"data:image/png;base64,{b64}"}}}}
            ]}}]}}"#
        );
        let req = decode_chat_request(&payload).unwrap();
        assert_eq!(
            req.messages[0].parts,
            vec![
                ContentPart::Text("describe".into()),
                ContentPart::Image {
                    data: vec![1, 2, 3],
                    mime: "image/png".into()
                },
            ]
        );
    }

    #[test]
    fn malformed_media_urls_are_dropped() {
        let payload = r#"{"messages":[{"role":"user","content":[
            {"type":"text","text":"hello"},
            {"type":"image_url","image_url":{"url":"https://example.com/cat.png"}}
        ]}]}"#;
        let req = decode_chat_request(payload).unwrap();
        assert_eq!(
            req.messages[0].parts,
            vec![ContentPart::Text("hello".into())]
        );
    }

    #[test]
    fn all_parts_dropped_falls_back_to_stringified_content() {
        let payload = r#"{"messages":[{"role":"user","content":[{"type":"video_url"}]}]}"#;
        let req = decode_chat_request(payload).unwrap();
        assert_eq!(req.messages[0].parts.len(), 1);
        let ContentPart::Text(text) = &req.messages[0].parts[0] else {
            panic!("expected text fallback");
        };
        assert!(text.contains("video_url"));
    }

    #[test]
    fn audio_family_is_enforced() {
        let b64 = BASE64.encode([9u8]);
        let payload = format!(
            r#"{{"messages":[{{"role":"user","content":[
                {{"type":"audio_url","audio_url":{{"url":"data:image/png;base64,{b64}"}}}}
            ]}}]}}"#
        );
        let req = decode_chat_request(&payload).unwrap();
        // Wrong family drops the part, leaving the stringified fallback.
        assert_eq!(req.messages[0].parts.len(), 1);
        assert!(matches!(req.messages[0].parts[0], ContentPart::Text(_)));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err =
            decode_chat_request(r#"{"messages":[{"role":"tool","content":"x"}]}"#).unwrap_err();
        assert_eq!(err, CodecError::InvalidRole("tool".into()));
    }

    #[test]
    fn parts_survive_decode_encode_round_trip() {
        let b64 = BASE64.encode([4u8, 5]);
        let payload = format!(
            r#"{{"messages":[{{"role":"user","content":[
                {{"type":"text","text":"t"}},
                {{"type":"audio_url","audio_url":{{"url":"data:audio/wav;base64,{b64}"}}}}
            ]}}]}}"#
        );
        let req = decode_chat_request(&payload).unwrap();
        let encoded: Vec<Value> = req.messages[0].parts.iter().map(encode_content_part).collect();
        assert_eq!(encoded[0], serde_json::json!({"type": "text", "text": "t"}));
        assert_eq!(
            encoded[1],
            serde_json::json!({
                "type": "audio_url",
                "audio_url": {"url": format!("data:audio/wav;base64,{b64}")}
            })
        );
    }
}
