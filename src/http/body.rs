//! Request body decoding.
//!
//! # Responsibilities
//! - Drain the engine's chunk stream into one contiguous buffer
//! - Pick a decoder from the declared content type
//! - Contain every decode failure as the empty value
//!
//! # Decoders
//! ```text
//! application/json                  → Body::Json   (malformed → Body::Empty)
//! application/x-www-form-urlencoded → Body::Fields (last duplicate wins)
//! multipart/form-data               → Body::Fields (named parts only)
//! anything else                     → Body::Text
//! empty payload                     → Body::Empty
//! ```

use std::collections::HashMap;
use std::sync::OnceLock;

use futures_util::StreamExt;
use regex::Regex;
use serde_json::{Map, Value};

use crate::engine::BodyStream;
use crate::error::BoxError;

/// Field map produced by form decoders.
pub type Fields = HashMap<String, String>;

/// A decoded request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Parsed `application/json` payload.
    Json(Value),
    /// Urlencoded or multipart form fields.
    Fields(Fields),
    /// Any other content type, as UTF-8 text.
    Text(String),
    /// Nothing usable was sent (empty payload or a failed decode).
    Empty,
}

impl Body {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_fields(&self) -> Option<&Fields> {
        match self {
            Body::Fields(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Look up a form field, or a string member of a JSON object.
    pub fn field(&self, name: &str) -> Option<&str> {
        match self {
            Body::Fields(fields) => fields.get(name).map(String::as_str),
            Body::Json(Value::Object(map)) => map.get(name).and_then(Value::as_str),
            _ => None,
        }
    }

    /// True for the empty value and for empty maps/objects/text.
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Fields(fields) => fields.is_empty(),
            Body::Text(text) => text.is_empty(),
            Body::Json(Value::Object(map)) => map.is_empty(),
            Body::Json(_) => false,
        }
    }

    /// Structured view of any body. The empty value becomes `{}`.
    pub fn to_json(&self) -> Value {
        match self {
            Body::Json(value) => value.clone(),
            Body::Fields(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
            Body::Text(text) => Value::String(text.clone()),
            Body::Empty => Value::Object(Map::new()),
        }
    }
}

/// Drain a body stream, concatenating chunks in arrival order.
pub async fn collect(mut stream: BodyStream) -> Result<Vec<u8>, BoxError> {
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer)
}

/// Decode a complete payload according to `content_type`. Never fails.
pub fn decode(content_type: &str, raw: &[u8]) -> Body {
    if raw.is_empty() {
        return Body::Empty;
    }

    let text = String::from_utf8_lossy(raw);
    let kind = content_type.to_ascii_lowercase();

    if kind.contains("application/json") {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Body::Json(value),
            Err(e) => {
                tracing::debug!(error = %e, "Malformed JSON body");
                Body::Empty
            }
        }
    } else if kind.contains("application/x-www-form-urlencoded") {
        Body::Fields(parse_urlencoded(&text))
    } else if kind.contains("multipart/form-data") {
        // Boundaries are case-sensitive: read them from the header as sent.
        match boundary(content_type) {
            Some(boundary) => Body::Fields(parse_multipart(&text, boundary)),
            None => {
                tracing::debug!(content_type = %content_type, "Multipart body without boundary");
                Body::Empty
            }
        }
    } else {
        Body::Text(text.into_owned())
    }
}

/// `key=value&…` pairs, percent-decoded; later duplicates overwrite earlier ones.
pub fn parse_urlencoded(input: &str) -> Fields {
    url::form_urlencoded::parse(input.as_bytes())
        .into_owned()
        .collect()
}

/// Everything after `boundary=`, minus optional quotes.
fn boundary(content_type: &str) -> Option<&str> {
    let (_, rest) = content_type.split_once("boundary=")?;
    let boundary = rest.trim().trim_matches('"');
    (!boundary.is_empty()).then_some(boundary)
}

fn disposition_name() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r#"(?:^|[;\s])name="([^"]+)""#).expect("static regex"))
}

/// Split on `--boundary` and keep every part whose disposition names a field.
pub fn parse_multipart(body: &str, boundary: &str) -> Fields {
    let delimiter = format!("--{boundary}");
    let mut fields = Fields::new();

    for part in body.split(delimiter.as_str()) {
        let trimmed = part.trim();
        if trimmed.is_empty() || trimmed == "--" {
            continue;
        }

        let (raw_headers, content) = part.split_once("\r\n\r\n").unwrap_or((part, ""));

        let headers: HashMap<String, &str> = raw_headers
            .split("\r\n")
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim(), value.trim()))
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();

        let name = headers
            .get("content-disposition")
            .and_then(|d| disposition_name().captures(d))
            .and_then(|c| c.get(1));

        if let Some(name) = name {
            fields.insert(name.as_str().to_string(), content.trim().to_string());
        }
    }

    fields
}
