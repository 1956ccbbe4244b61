use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("request body must be a JSON object or an array of objects, got {0}")]
    UnexpectedShape(&'static str),

    #[error("batch item {index} must be a JSON object, got {kind}")]
    InvalidItem { index: usize, kind: &'static str },

    #[error("batch of {count} items exceeds the limit of {max}")]
    TooManyItems { count: usize, max: usize },

    #[error("request body exceeds the size limit")]
    BodyTooLarge,

    #[error("request body could not be read: {0}")]
    Unreadable(String),
}

/// One content item as a JSON object, forwarded to the classifier verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ModerationItem(Map<String, Value>);

impl ModerationItem {
    pub fn from_value(value: Value) -> Result<Self, &'static str> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(kind_of(&other)),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.0.get("text").and_then(Value::as_str)
    }

    pub fn image_url(&self) -> Option<&str> {
        self.0.get("image_url").and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Request body, decided once at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationPayload {
    Single(ModerationItem),
    Batch(Vec<ModerationItem>),
}

impl ModerationPayload {
    pub fn parse(body: &[u8], max_batch_items: usize) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(body).map_err(|e| PayloadError::InvalidJson(e.to_string()))?;

        match value {
            Value::Object(map) => Ok(ModerationPayload::Single(ModerationItem(map))),
            Value::Array(values) => {
                if values.len() > max_batch_items {
                    return Err(PayloadError::TooManyItems {
                        count: values.len(),
                        max: max_batch_items,
                    });
                }
                values
                    .into_iter()
                    .enumerate()
                    .map(|(index, value)| {
                        ModerationItem::from_value(value).map_err(|kind| PayloadError::InvalidItem { index, kind })
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(ModerationPayload::Batch)
            }
            other => Err(PayloadError::UnexpectedShape(kind_of(&other))),
        }
    }

    pub fn item_count(&self) -> usize {
        match self {
            ModerationPayload::Single(_) => 1,
            ModerationPayload::Batch(items) => items.len(),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, ModerationPayload::Batch(_))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
