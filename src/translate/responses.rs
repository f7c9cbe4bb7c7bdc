//! Flatten a Responses-style session into canonical messages, and lower it
//! into a Claude `MessagesRequest` so it can be replayed through any upstream.

use tracing::debug;

use super::anthropic_types::{MessagesRequest, SystemContent};
use super::canonical::{CanonicalMessage, ContentBlock, Role};
use super::responses_types::{
    ResponsesRequest, SessionContent, SessionInput, SessionItem, SessionPart,
};
use crate::error::Result;

const DEFAULT_MAX_TOKENS: u64 = 4096;

/// History first, then the new input, in order.
///
/// `tool_call` and `tool_result` items are accepted and produce nothing.
pub fn session_to_canonical(
    history: &[SessionItem],
    input: &SessionInput,
) -> Result<Vec<CanonicalMessage>> {
    let mut out: Vec<CanonicalMessage> = history.iter().filter_map(item_to_canonical).collect();

    match input {
        SessionInput::Text(text) => out.push(CanonicalMessage::text(Role::User, text.clone())),
        SessionInput::Raw(items) => {
            for raw in items {
                let item = SessionItem::from_value(raw)?;
                out.extend(item_to_canonical(&item));
            }
        }
        SessionInput::Typed(items) => out.extend(items.iter().filter_map(item_to_canonical)),
    }

    Ok(out)
}

fn item_to_canonical(item: &SessionItem) -> Option<CanonicalMessage> {
    match item {
        SessionItem::Message { role, content } => {
            let blocks = match content {
                SessionContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
                SessionContent::Parts(parts) => parts.iter().filter_map(part_to_block).collect(),
            };
            Some(CanonicalMessage::new(parse_role(role), blocks))
        }
        SessionItem::InputText { text } => Some(CanonicalMessage::text(Role::User, text.clone())),
        SessionItem::OutputText { text } => {
            Some(CanonicalMessage::text(Role::Assistant, text.clone()))
        }
        SessionItem::InputImage { image_url } => ContentBlock::from_data_uri(image_url)
            .map(|block| CanonicalMessage::new(Role::User, vec![block])),
        SessionItem::ToolCall { .. } | SessionItem::ToolResult { .. } => {
            debug!("Skipping tool item in session history");
            None
        }
    }
}

fn part_to_block(part: &SessionPart) -> Option<ContentBlock> {
    match part {
        SessionPart::InputText { text } | SessionPart::OutputText { text } => {
            Some(ContentBlock::Text { text: text.clone() })
        }
        SessionPart::InputImage { image_url } => ContentBlock::from_data_uri(image_url),
        SessionPart::Unknown => None,
    }
}

fn parse_role(role: &str) -> Role {
    match role {
        "assistant" => Role::Assistant,
        "system" | "developer" => Role::System,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

/// Lower a Responses request plus its session history into a Claude request.
///
/// `instructions` and system/developer messages become `system`; every other
/// message keeps its place in `messages`.
pub fn responses_to_messages_request(
    req: &ResponsesRequest,
    history: &[SessionItem],
) -> Result<MessagesRequest> {
    let input = SessionInput::from(req.input.clone());
    let canonical = session_to_canonical(history, &input)?;

    let mut system_parts: Vec<String> = req.instructions.iter().cloned().collect();
    let mut messages = Vec::with_capacity(canonical.len());

    for msg in &canonical {
        if msg.role == Role::System {
            system_parts.push(msg.joined_text());
        } else if !msg.content.is_empty() {
            messages.push(msg.to_claude());
        }
    }

    debug!(
        items = canonical.len(),
        messages = messages.len(),
        "Flattened session"
    );

    Ok(MessagesRequest {
        model: req.model.clone(),
        max_tokens: req.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: (!system_parts.is_empty()).then(|| SystemContent::Text(system_parts.join("\n"))),
        stream: req.stream,
        temperature: req.temperature,
        top_p: req.top_p,
        ..MessagesRequest::default()
    })
}
