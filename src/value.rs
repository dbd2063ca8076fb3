//! Field value extraction – converts heterogeneous record-field values into
//! display strings / HTML fragments.
//!
//! External records arrive as loosely-shaped JSON. Instead of sniffing shapes
//! on every extraction, [`FieldValue::decode`] classifies each cell exactly
//! once at the record boundary into a closed set of variants; [`extract`] is a
//! total function over those variants and never fails.

use chrono::DateTime;
use serde_json::Value;

/// Platform media endpoint used when an attachment carries no resolved URL.
const MEDIA_DOWNLOAD_BASE: &str = "https://open.feishu.cn/open-apis/drive/v1/medias";

/// A record cell, decoded from raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
    /// File/image attachments (multi-file cells).
    Attachments(Vec<Attachment>),
    /// Rich-text segment runs.
    Segments(Vec<TextSegment>),
    /// Any other list shape (multi-select, people, lookups, ...).
    List(Vec<FieldValue>),
    /// A single structured object.
    Entity(EntityValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub token: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextSegment {
    pub kind: String,
    pub text: String,
}

/// Structured single-object shapes, in the priority order they are probed.
/// The overlap between segment-like (`text`) and auto-number-like (`value`)
/// objects is resolved by that order: `text` wins.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityValue {
    Segment { text: String },
    Named { name: String },
    Location { full_address: String },
    Link { text: String },
    AutoNumber { value: String },
    /// Fallback: first non-empty string-valued property, possibly empty.
    Opaque { display: String },
}

impl FieldValue {
    /// Classify one raw JSON cell.
    pub fn decode(raw: &Value) -> FieldValue {
        match raw {
            Value::Null => FieldValue::Null,
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Number(n) => FieldValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Array(items) => decode_list(items),
            Value::Object(_) => FieldValue::Entity(decode_entity(raw)),
        }
    }
}

fn decode_list(items: &[Value]) -> FieldValue {
    if items.is_empty() {
        return FieldValue::List(Vec::new());
    }

    // Attachment cells: any element carrying a token and a size.
    let has_attachment = items.iter().any(|item| {
        item.get("token").and_then(Value::as_str).is_some() && item.get("size").is_some()
    });
    if has_attachment {
        let attachments = items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| Attachment {
                token: str_prop(item, "token").unwrap_or_default(),
                name: str_prop(item, "name"),
                mime_type: str_prop(item, "type"),
                url: str_prop(item, "tmp_url").or_else(|| str_prop(item, "url")),
            })
            .collect();
        return FieldValue::Attachments(attachments);
    }

    // Rich-text runs: every element has both `type` and `text`.
    let all_segments = items
        .iter()
        .all(|item| item.get("text").is_some() && item.get("type").is_some());
    if all_segments {
        let segments = items
            .iter()
            .map(|item| TextSegment {
                kind: str_prop(item, "type").unwrap_or_default(),
                text: str_prop(item, "text").unwrap_or_default(),
            })
            .collect();
        return FieldValue::Segments(segments);
    }

    FieldValue::List(items.iter().map(FieldValue::decode).collect())
}

fn decode_entity(obj: &Value) -> EntityValue {
    if let Some(text) = obj.get("text") {
        return EntityValue::Segment {
            text: scalar_to_string(text),
        };
    }
    if let Some(name) = str_prop(obj, "name").filter(|s| !s.is_empty()) {
        return EntityValue::Named { name };
    }
    if let Some(name) = str_prop(obj, "enName")
        .or_else(|| str_prop(obj, "en_name"))
        .filter(|s| !s.is_empty())
    {
        return EntityValue::Named { name };
    }
    if let Some(addr) = str_prop(obj, "fullAddress")
        .or_else(|| str_prop(obj, "full_address"))
        .filter(|s| !s.is_empty())
    {
        return EntityValue::Location { full_address: addr };
    }
    if obj.get("recordIds").is_some() || obj.get("record_ids").is_some() {
        // Linked-record cells display their text, which is absent here
        // (the `text` branch above would have caught it).
        return EntityValue::Link {
            text: String::new(),
        };
    }
    if let Some(value) = obj.get("value") {
        return EntityValue::AutoNumber {
            value: scalar_to_string(value),
        };
    }
    // Fallback: first non-empty string-valued property, in authored order
    // (serde_json's preserve_order feature).
    let display = obj
        .as_object()
        .and_then(|map| {
            map.values()
                .filter_map(Value::as_str)
                .find(|s| !s.is_empty())
        })
        .unwrap_or("")
        .to_string();
    EntityValue::Opaque { display }
}

fn str_prop(obj: &Value, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => format_number(n.as_f64().unwrap_or(0.0)),
        Value::Bool(b) => localized_bool(*b).to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Render a decoded cell as display text / an HTML fragment. Total: every
/// variant yields a string, an unresolvable value yields `""`.
pub fn extract(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Text(s) => text_to_paragraphs(s),
        FieldValue::Number(n) => extract_number(*n),
        FieldValue::Bool(b) => localized_bool(*b).to_string(),
        FieldValue::Attachments(items) => extract_attachments(items),
        FieldValue::Segments(segments) => {
            let raw: String = segments.iter().map(|s| s.text.as_str()).collect();
            text_to_paragraphs(&raw)
        }
        FieldValue::List(items) => items
            .iter()
            .map(extract_list_item)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        FieldValue::Entity(entity) => entity_text(entity),
    }
}

fn entity_text(entity: &EntityValue) -> String {
    match entity {
        EntityValue::Segment { text } => text.clone(),
        EntityValue::Named { name } => name.clone(),
        EntityValue::Location { full_address } => full_address.clone(),
        EntityValue::Link { text } => text.clone(),
        EntityValue::AutoNumber { value } => value.clone(),
        EntityValue::Opaque { display } => display.clone(),
    }
}

/// List elements render with scalar rules; unlike top-level strings they are
/// never paragraph-wrapped (joined inline with `", "`).
fn extract_list_item(item: &FieldValue) -> String {
    match item {
        FieldValue::Text(s) => s.clone(),
        FieldValue::Number(n) => extract_number(*n),
        FieldValue::Bool(b) => localized_bool(*b).to_string(),
        FieldValue::Entity(entity) => entity_text(entity),
        other => extract(other),
    }
}

fn extract_number(n: f64) -> String {
    let repr = format_number(n);
    // 13 digits: a millisecond timestamp (progress/rating/currency values
    // never reach that magnitude).
    if repr.len() == 13 && repr.bytes().all(|b| b.is_ascii_digit()) {
        if let Some(ts) = DateTime::from_timestamp_millis(n as i64) {
            return ts.format("%Y/%m/%d %H:%M").to_string();
        }
    }
    repr
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn localized_bool(b: bool) -> &'static str {
    if b {
        "是"
    } else {
        "否"
    }
}

/// Multi-line text becomes one `<p>` per line, matching the paragraph
/// structure manual Enter presses produce; single-line text stays verbatim so
/// inline placeholders keep flowing inline.
fn text_to_paragraphs(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() <= 1 {
        return text.to_string();
    }
    lines
        .iter()
        .map(|line| {
            if line.is_empty() {
                "<p><br></p>".to_string()
            } else {
                format!("<p>{line}</p>")
            }
        })
        .collect()
}

fn extract_attachments(items: &[Attachment]) -> String {
    items
        .iter()
        .map(|item| {
            let url = item.url.clone().unwrap_or_else(|| {
                format!("{MEDIA_DOWNLOAD_BASE}/{}/download", item.token)
            });
            if is_image_attachment(item) {
                let alt = item.name.as_deref().unwrap_or("图片");
                format!(
                    r#"<img src="{url}" style="width: 100%;" alt="{alt}" crossorigin="anonymous" />"#
                )
            } else {
                let label = item.name.as_deref().unwrap_or("附件");
                format!(
                    r#"<a href="{url}" target="_blank" class="attachment-file-link">{label}</a>"#
                )
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_image_attachment(item: &Attachment) -> bool {
    if let Some(mime) = &item.mime_type {
        if mime.starts_with("image/") {
            return true;
        }
    }
    let Some(name) = &item.name else {
        return false;
    };
    let lower = name.to_ascii_lowercase();
    ["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"]
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}
