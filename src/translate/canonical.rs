//! Provider-neutral message model.
//!
//! Every dialect converter can pivot through [`CanonicalMessage`]. Block order
//! is preserved in both directions, and `thinking` payloads stay raw JSON so a
//! nested object survives a round trip untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::anthropic_types::{
    self as claude, ImageSource, Message, MessageContent, ResponseContentBlock, ToolResultContent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        /// Base64 payload, never decoded
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        /// A plain string or arbitrary JSON
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl CanonicalMessage {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentBlock::Text { text: text.into() }])
    }

    pub fn from_claude(msg: &Message) -> Self {
        let role = match msg.role {
            claude::Role::User => Role::User,
            claude::Role::Assistant => Role::Assistant,
        };
        let content = match &msg.content {
            MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            MessageContent::Blocks(blocks) => blocks.iter().filter_map(ContentBlock::from_claude).collect(),
        };
        Self { role, content }
    }

    /// Claude only knows two roles: everything but `assistant` is sent as `user`.
    pub fn to_claude(&self) -> Message {
        let role = match self.role {
            Role::Assistant => claude::Role::Assistant,
            Role::User | Role::System | Role::Tool => claude::Role::User,
        };
        Message {
            role,
            content: MessageContent::Blocks(self.content.iter().map(ContentBlock::to_claude).collect()),
        }
    }

    /// Canonical view of a completed Claude response.
    pub fn from_claude_response(blocks: &[ResponseContentBlock]) -> Self {
        Self {
            role: Role::Assistant,
            content: blocks.iter().map(ContentBlock::from_response_block).collect(),
        }
    }

    /// Blocks a Claude response can carry; images and tool results are skipped.
    pub fn to_claude_response(&self) -> Vec<ResponseContentBlock> {
        self.content
            .iter()
            .filter_map(ContentBlock::to_response_block)
            .collect()
    }

    /// Concatenated text of all `Text` blocks.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ContentBlock {
    /// Image from a `data:<mime>;base64,<payload>` URI. Remote URLs have no
    /// canonical form.
    pub fn from_data_uri(uri: &str) -> Option<Self> {
        let (media_type, data) = uri.strip_prefix("data:")?.split_once(";base64,")?;
        Some(Self::Image {
            media_type: media_type.to_string(),
            data: data.to_string(),
        })
    }

    /// `None` for blocks with no canonical form: remote images and block
    /// types this proxy does not model.
    pub fn from_claude(block: &claude::ContentBlock) -> Option<Self> {
        let block = match block {
            claude::ContentBlock::Text { text } => Self::Text { text: text.clone() },
            claude::ContentBlock::Image { source } => {
                if source.remote_url().is_some() {
                    return None;
                }
                Self::Image {
                    media_type: source.media_type.clone(),
                    data: source.data.clone(),
                }
            }
            claude::ContentBlock::ToolUse { id, name, input } => Self::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            claude::ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Self::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: match content {
                    None => Value::Null,
                    Some(ToolResultContent::Text(text)) => Value::String(text.clone()),
                    Some(ToolResultContent::Blocks(blocks)) => {
                        let known: Vec<_> = blocks
                            .iter()
                            .filter(|b| !matches!(b, claude::ContentBlock::Unknown))
                            .collect();
                        serde_json::to_value(known).unwrap_or(Value::Null)
                    }
                },
                is_error: *is_error,
            },
            claude::ContentBlock::Thinking {
                thinking,
                signature,
            } => Self::Thinking {
                thinking: thinking.clone(),
                signature: signature.clone(),
            },
            claude::ContentBlock::Unknown => return None,
        };
        Some(block)
    }

    pub fn to_claude(&self) -> claude::ContentBlock {
        match self {
            Self::Text { text } => claude::ContentBlock::Text { text: text.clone() },
            Self::Image { media_type, data } => claude::ContentBlock::Image {
                source: ImageSource::base64(media_type.clone(), data.clone()),
            },
            Self::ToolUse { id, name, input } => claude::ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            Self::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => claude::ContentBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: tool_result_content(content),
                is_error: *is_error,
            },
            Self::Thinking {
                thinking,
                signature,
            } => claude::ContentBlock::Thinking {
                thinking: thinking.clone(),
                signature: signature.clone(),
            },
        }
    }

    pub fn from_response_block(block: &ResponseContentBlock) -> Self {
        match block {
            ResponseContentBlock::Text { text } => Self::Text { text: text.clone() },
            ResponseContentBlock::ToolUse { id, name, input } => Self::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            ResponseContentBlock::Thinking {
                thinking,
                signature,
            } => Self::Thinking {
                thinking: thinking.clone(),
                signature: signature.clone(),
            },
        }
    }

    pub fn to_response_block(&self) -> Option<ResponseContentBlock> {
        match self {
            Self::Text { text } => Some(ResponseContentBlock::Text { text: text.clone() }),
            Self::ToolUse { id, name, input } => Some(ResponseContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            Self::Thinking {
                thinking,
                signature,
            } => Some(ResponseContentBlock::Thinking {
                thinking: thinking.clone(),
                signature: signature.clone(),
            }),
            Self::Image { .. } | Self::ToolResult { .. } => None,
        }
    }
}

fn tool_result_content(content: &Value) -> Option<ToolResultContent> {
    match content {
        Value::Null => None,
        Value::String(text) => Some(ToolResultContent::Text(text.clone())),
        Value::Array(_) => match serde_json::from_value::<Vec<claude::ContentBlock>>(content.clone()) {
            Ok(blocks) => Some(ToolResultContent::Blocks(blocks)),
            Err(_) => Some(ToolResultContent::Text(content.to_string())),
        },
        other => Some(ToolResultContent::Text(other.to_string())),
    }
}
