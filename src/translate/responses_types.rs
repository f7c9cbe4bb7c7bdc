//! Responses-style session wire types.
//!
//! A session is an ordered list of typed items. The request's `input` may be a
//! bare string, an array of raw items, or (from an in-process caller) items
//! that were already decoded.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: ResponsesInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

/// `input` as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    Text(String),
    Items(Vec<Value>),
}

/// New input handed to the session flattener.
#[derive(Debug, Clone)]
pub enum SessionInput {
    Text(String),
    Raw(Vec<Value>),
    Typed(Vec<SessionItem>),
}

impl From<ResponsesInput> for SessionInput {
    fn from(input: ResponsesInput) -> Self {
        match input {
            ResponsesInput::Text(text) => Self::Text(text),
            ResponsesInput::Items(items) => Self::Raw(items),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionItem {
    Message {
        role: String,
        content: SessionContent,
    },
    InputText {
        text: String,
    },
    OutputText {
        text: String,
    },
    InputImage {
        image_url: String,
    },
    /// Accepted, never converted
    ToolCall {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    /// Accepted, never converted
    ToolResult {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionContent {
    Text(String),
    Parts(Vec<SessionPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionPart {
    InputText {
        text: String,
    },
    OutputText {
        text: String,
    },
    InputImage {
        image_url: String,
    },
    #[serde(other)]
    Unknown,
}

const KNOWN_ITEM_TYPES: &[&str] = &[
    "message",
    "input_text",
    "output_text",
    "input_image",
    "tool_call",
    "tool_result",
];

impl SessionItem {
    /// Decode one raw item. An item with a `role` and no `type` is a message.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let item_type = match raw.get("type").and_then(Value::as_str) {
            Some(t) => t,
            None if raw.get("role").is_some() => "message",
            None => return Err(ProxyError::unrecognized_item("<missing>")),
        };

        if !KNOWN_ITEM_TYPES.contains(&item_type) {
            return Err(ProxyError::unrecognized_item(item_type));
        }

        let mut tagged = raw.clone();
        if let Some(obj) = tagged.as_object_mut() {
            obj.insert("type".to_string(), Value::String(item_type.to_string()));
        }

        serde_json::from_value(tagged)
            .map_err(|e| ProxyError::decode(format!("invalid {item_type} item: {e}")))
    }
}
