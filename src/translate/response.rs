use super::anthropic_types::{ErrorResponse, MessagesResponse, ResponseContentBlock};
use super::openai_types::{ChatCompletionResponse, ChatErrorResponse};
use super::usage::normalize;

/// Translate an `OpenAI` Chat Completion response into a Claude Messages response.
///
/// Only the first choice is read; any others are discarded.
pub fn openai_to_anthropic(resp: &ChatCompletionResponse, original_model: &str) -> MessagesResponse {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();
    let mut has_tool_calls = false;

    if let Some(c) = choice {
        if let Some(reasoning) = c.message.reasoning_content.as_deref().filter(|r| !r.is_empty()) {
            content.push(ResponseContentBlock::Thinking {
                thinking: serde_json::Value::String(reasoning.to_string()),
                signature: None,
            });
        }

        if let Some(ref text) = c.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }

        if let Some(ref tool_calls) = c.message.tool_calls {
            has_tool_calls = !tool_calls.is_empty();
            for tc in tool_calls {
                let input: serde_json::Value = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));

                content.push(ResponseContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input,
                });
            }
        }
    }

    // Claude clients expect non-empty content
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = if has_tool_calls {
        "tool_use"
    } else {
        match choice.and_then(|c| c.finish_reason.as_deref()) {
            Some("length") => "max_tokens",
            _ => "end_turn",
        }
    };

    let usage = resp
        .usage
        .as_ref()
        .map(|u| normalize(u).to_claude())
        .unwrap_or_default();

    let id = format!("msg_{}", resp.id.trim_start_matches("chatcmpl-"));

    MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    }
}

/// Map an `OpenAI` `finish_reason` to a Claude `stop_reason`.
pub fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        // stop, content_filter, and anything unknown
        _ => "end_turn",
    }
}

/// Whether an `OpenAI` `finish_reason` means the model is waiting on tools.
pub fn is_tool_finish(reason: &str) -> bool {
    matches!(reason, "tool_calls" | "function_call")
}

/// Translate an `OpenAI` error into a Claude error response
pub fn openai_error_to_anthropic(err: &ChatErrorResponse) -> ErrorResponse {
    let error_type = match err.error.error_type.as_str() {
        "invalid_request_error" => "invalid_request_error",
        "rate_limit_error" | "rate_limit_exceeded" => "rate_limit_error",
        "authentication_error" => "authentication_error",
        _ => "api_error",
    };

    ErrorResponse::new(error_type, &err.error.message)
}
