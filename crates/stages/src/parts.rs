//! Multi-part response handling for the generative edit service.
//!
//! Kept free of any transport so it can be exercised against synthetic payloads.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;

use crate::image::DEFAULT_MIME_TYPE;
use crate::ImageRef;

/// One part of a generated candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    /// Base64 image payload as sent by the service.
    InlineImage { data: String, mime_type: String },
    Text(String),
    Other,
}

/// Flatten `candidates[*].content.parts[*]` into [`ResponsePart`]s, in order.
pub fn collect_parts(response: &Value) -> Vec<ResponsePart> {
    let Some(candidates) = response.get("candidates").and_then(Value::as_array) else {
        return Vec::new();
    };

    candidates
        .iter()
        .filter_map(|candidate| candidate.pointer("/content/parts").and_then(Value::as_array))
        .flatten()
        .map(parse_part)
        .collect()
}

fn parse_part(part: &Value) -> ResponsePart {
    let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
    if let Some(inline) = inline {
        let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
        if !data.is_empty() {
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_MIME_TYPE);
            return ResponsePart::InlineImage {
                data: data.to_string(),
                mime_type: mime_type.to_string(),
            };
        }
    }
    match part.get("text").and_then(Value::as_str) {
        Some(text) => ResponsePart::Text(text.to_string()),
        None => ResponsePart::Other,
    }
}

/// Pick the first part carrying image data.
///
/// Without one, the text parts are joined into the error message; if there is no text
/// either, a generic message is returned. A part whose payload is not valid base64 is
/// skipped rather than accepted.
pub fn first_image(parts: &[ResponsePart]) -> Result<ImageRef, String> {
    for part in parts {
        if let ResponsePart::InlineImage { data, mime_type } = part {
            match BASE64.decode(data.as_bytes()) {
                Ok(bytes) if !bytes.is_empty() => {
                    return Ok(ImageRef::inline(bytes, mime_type.clone()))
                }
                _ => continue,
            }
        }
    }

    let explanation = parts
        .iter()
        .filter_map(|part| match part {
            ResponsePart::Text(text) => Some(text.trim()),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if explanation.is_empty() {
        Err("edit service returned no image".to_string())
    } else {
        Err(explanation)
    }
}
