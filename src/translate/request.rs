//! Translate Claude Messages API requests into `OpenAI` Chat Completions requests.
//!
//! A single Claude message can expand into several `OpenAI` messages: every
//! `tool_result` block becomes its own `tool`-role message (emitted first, in
//! block order), followed by at most one combined message carrying the
//! newline-joined text, any images, and the `tool_use` blocks as `tool_calls`.

use super::anthropic_types::{
    ContentBlock, Message, MessageContent, MessagesRequest, Role, ToolChoice, ToolChoiceAuto,
    ToolChoiceSpecific, ToolResultContent,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
    ContentPart, ImageUrlDetail, StreamOptions,
};
use crate::routing::RoutingConfig;

/// Translate a Claude Messages API request into an `OpenAI` Chat Completions request.
pub fn anthropic_to_openai(req: &MessagesRequest, routing: &RoutingConfig) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        messages.push(ChatMessage::text("system", system.as_text()));
    }

    for msg in &req.messages {
        messages.append(&mut claude_message_to_openai(msg));
    }

    // server tools have no function form
    let tools = req
        .tools
        .as_ref()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| {
                    let schema = t.client_schema()?;
                    Some(ChatTool {
                        tool_type: "function".to_string(),
                        function: ChatFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: schema.clone(),
                        },
                    })
                })
                .collect::<Vec<_>>()
        })
        .filter(|tools| !tools.is_empty());

    let tool_choice = req.tool_choice.as_ref().map(translate_tool_choice);

    let stream_options = req.stream.filter(|s| *s).map(|_| StreamOptions {
        include_usage: true,
    });

    let user = req.metadata.as_ref().and_then(|m| m.user_id.clone());

    ChatCompletionRequest {
        model: routing.redirect_model(&req.model),
        messages,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options,
        tools,
        tool_choice,
        stop: req.stop_sequences.clone(),
        user,
    }
}

pub fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Decompose one Claude message into its `OpenAI` equivalents.
pub fn claude_message_to_openai(msg: &Message) -> Vec<ChatMessage> {
    let role = role_name(msg.role);

    let blocks = match &msg.content {
        MessageContent::Text(text) => return vec![ChatMessage::text(role, text.clone())],
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut out = Vec::new();
    let mut texts: Vec<&str> = Vec::new();
    let mut images: Vec<ContentPart> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                out.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(ChatContent::Text(tool_result_to_string(
                        content.as_ref(),
                        *is_error,
                    ))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                    name: None,
                });
            }
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::Image { source } => images.push(ContentPart::ImageUrl {
                image_url: ImageUrlDetail {
                    url: source.to_url(),
                    detail: None,
                },
            }),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ChatToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            ContentBlock::Thinking { .. } | ContentBlock::Unknown => {}
        }
    }

    let has_tool_messages = !out.is_empty();

    if texts.is_empty() && images.is_empty() && tool_calls.is_empty() {
        // keep the turn even when it carried nothing translatable
        if !has_tool_messages {
            out.push(ChatMessage::text(role, String::new()));
        }
        return out;
    }

    let joined = texts.join("\n");
    let content = if images.is_empty() {
        (!joined.is_empty()).then(|| ChatContent::Text(joined))
    } else {
        let mut parts = Vec::with_capacity(images.len() + 1);
        if !joined.is_empty() {
            parts.push(ContentPart::Text { text: joined });
        }
        parts.append(&mut images);
        Some(ChatContent::Parts(parts))
    };

    out.push(ChatMessage {
        role: role.to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
        name: None,
    });

    out
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) { "ERROR: " } else { "" };

    match content {
        Some(content) => format!("{prefix}{}", content.as_text()),
        None => format!("{prefix}(no content)"),
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => match choice_type.as_str() {
            "any" => ChatToolChoice::String("required".to_string()),
            "none" => ChatToolChoice::String("none".to_string()),
            _ => ChatToolChoice::String("auto".to_string()),
        },
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => {
            ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name: name.clone() },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn user_blocks(blocks: Vec<ContentBlock>) -> Message {
        Message {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    #[test]
    fn test_simple_text_request() {
        let req = MessagesRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("Hello".to_string()),
            }],
            system: Some(SystemContent::Text("You are helpful".to_string())),
            ..MessagesRequest::default()
        };

        let routing = RoutingConfig::new(
            "https://api.example.com",
            HashMap::from([("claude-sonnet-4-20250514".to_string(), "gpt-4o".to_string())]),
        );

        let result = anthropic_to_openai(&req, &routing);

        assert_eq!(result.model, "gpt-4o");
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, "system");
        assert_eq!(result.messages[1].role, "user");
        assert!(result.stream_options.is_none());
    }

    #[test]
    fn test_tool_result_then_text_splits_in_order() {
        let msg = user_blocks(vec![
            ContentBlock::ToolResult {
                tool_use_id: "t1".to_string(),
                content: Some(ToolResultContent::Text("72F".to_string())),
                is_error: None,
            },
            ContentBlock::Text {
                text: "Now continue".to_string(),
            },
        ]);

        let result = claude_message_to_openai(&msg);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].role, "tool");
        assert_eq!(result[0].tool_call_id.as_deref(), Some("t1"));
        assert_eq!(result[1].role, "user");
        assert_eq!(
            result[1].content.as_ref().map(ChatContent::as_text).as_deref(),
            Some("Now continue")
        );
    }

    #[test]
    fn test_tool_results_emitted_before_text_regardless_of_position() {
        let msg = user_blocks(vec![
            ContentBlock::Text {
                text: "first".to_string(),
            },
            ContentBlock::ToolResult {
                tool_use_id: "a".to_string(),
                content: None,
                is_error: Some(true),
            },
            ContentBlock::Text {
                text: "second".to_string(),
            },
        ]);

        let result = claude_message_to_openai(&msg);
        assert_eq!(result.len(), 2);
        assert_eq!(
            result[0].content.as_ref().map(ChatContent::as_text).as_deref(),
            Some("ERROR: (no content)")
        );
        assert_eq!(
            result[1].content.as_ref().map(ChatContent::as_text).as_deref(),
            Some("first\nsecond")
        );
    }

    #[test]
    fn test_only_tool_results_are_not_rewrapped() {
        let msg = user_blocks(vec![ContentBlock::ToolResult {
            tool_use_id: "only".to_string(),
            content: Some(ToolResultContent::Text("ok".to_string())),
            is_error: None,
        }]);
        let result = claude_message_to_openai(&msg);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].role, "tool");
    }

    #[test]
    fn test_assistant_tool_use_becomes_tool_calls() {
        let msg = Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Thinking {
                    thinking: json!("hmm"),
                    signature: None,
                },
                ContentBlock::Text {
                    text: "Checking".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    input: json!({"city": "sf"}),
                },
            ]),
        };

        let result = claude_message_to_openai(&msg);
        assert_eq!(result.len(), 1);
        let calls = result[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"city":"sf"}"#);
        assert_eq!(result[0].role, "assistant");
    }

    #[test]
    fn test_image_block_becomes_data_uri_part() {
        let msg = user_blocks(vec![
            ContentBlock::Text {
                text: "what is this".to_string(),
            },
            ContentBlock::Image {
                source: ImageSource::base64("image/png", "AAAA"),
            },
        ]);
        let result = claude_message_to_openai(&msg);
        match result[0].content.as_ref().unwrap() {
            ChatContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(
                    &parts[1],
                    ContentPart::ImageUrl { image_url } if image_url.url == "data:image/png;base64,AAAA"
                ));
            }
            ChatContent::Text(_) => panic!("expected parts"),
        }
    }

    #[test]
    fn test_tool_choice_and_stream_options() {
        let req = MessagesRequest {
            model: "some-unknown-model".to_string(),
            max_tokens: 100,
            stream: Some(true),
            tool_choice: Some(ToolChoice::Auto(ToolChoiceAuto {
                choice_type: "any".to_string(),
            })),
            ..MessagesRequest::default()
        };

        let result = anthropic_to_openai(&req, &RoutingConfig::default());
        assert_eq!(result.model, "some-unknown-model");
        assert!(matches!(result.tool_choice, Some(ChatToolChoice::String(ref s)) if s == "required"));
        assert!(result.stream_options.unwrap().include_usage);
    }

    #[test]
    fn test_remote_image_and_unknown_blocks() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "role": "user",
            "content": [
                {"type": "document", "source": {"type": "base64", "media_type": "application/pdf", "data": "JVBER"}},
                {"type": "image", "source": {"type": "url", "url": "https://example.com/cat.png"}},
                {"type": "text", "text": "compare"}
            ]
        }))
        .unwrap();

        let result = claude_message_to_openai(&msg);
        assert_eq!(result.len(), 1);
        match result[0].content.as_ref().unwrap() {
            ChatContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(
                    &parts[1],
                    ContentPart::ImageUrl { image_url } if image_url.url == "https://example.com/cat.png"
                ));
            }
            ChatContent::Text(_) => panic!("expected parts"),
        }
    }

    #[test]
    fn test_server_tools_are_not_forwarded() {
        let req: MessagesRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "max_tokens": 8,
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "web_search_20250305", "name": "web_search"}]
        }))
        .unwrap();

        let result = anthropic_to_openai(&req, &RoutingConfig::default());
        assert!(result.tools.is_none());
    }
}
