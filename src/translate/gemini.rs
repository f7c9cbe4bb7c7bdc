//! Gemini `generateContent` conversions.
//!
//! Gemini has no tool-call ids on older models and names function responses
//! by function name, so the Claude/OpenAI id is carried in `id` when present
//! and the function name is resolved from the earlier call with the same id.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;

use super::anthropic_types::{
    ContentBlock, ErrorResponse, ImageSource, Message, MessageContent, MessagesRequest,
    MessagesResponse, ResponseContentBlock, Role, ToolChoice, ToolResultContent,
};
use super::gemini_types::{
    FunctionCall, FunctionCallingConfig, FunctionDeclaration, FunctionResponse, GeminiContent,
    GeminiErrorResponse, GeminiPart, GeminiTool, GenerateContentRequest, GenerateContentResponse,
    GenerationConfig, InlineData, ToolConfig,
};
use super::openai_types::{ChatContent, ChatMessage, ChatToolCall, ChatToolCallFunction};
use super::schema::clean_schema;
use super::usage::normalize;

/// Translate a Claude Messages request into a Gemini `generateContent` body.
/// The model travels in the URL, not the body.
pub fn claude_to_gemini(req: &MessagesRequest) -> GenerateContentRequest {
    let names = tool_names_by_id(&req.messages);

    let contents = req
        .messages
        .iter()
        .map(|msg| claude_message_to_gemini(msg, &names))
        .collect();

    let system_instruction = req.system.as_ref().map(|s| GeminiContent {
        role: None,
        parts: vec![GeminiPart::text(s.as_text())],
    });

    let generation_config = GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        max_output_tokens: Some(req.max_tokens),
        stop_sequences: req.stop_sequences.clone(),
    };

    let declarations: Vec<FunctionDeclaration> = req
        .tools
        .iter()
        .flatten()
        .filter_map(|t| {
            let schema = t.client_schema()?;
            Some(FunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: Some(clean_schema(schema)),
            })
        })
        .collect();
    let tools = (!declarations.is_empty()).then(|| {
        vec![GeminiTool {
            function_declarations: declarations,
        }]
    });

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(generation_config),
        tools,
        tool_config: req.tool_choice.as_ref().map(translate_tool_choice),
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ToolConfig {
    let (mode, allowed) = match tc {
        ToolChoice::Specific(specific) => ("ANY", Some(vec![specific.name.clone()])),
        ToolChoice::Auto(auto) => match auto.choice_type.as_str() {
            "any" => ("ANY", None),
            "none" => ("NONE", None),
            _ => ("AUTO", None),
        },
    };
    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: mode.to_string(),
            allowed_function_names: allowed,
        },
    }
}

/// Map every `tool_use` id in the conversation to its function name.
pub fn tool_names_by_id(messages: &[Message]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for msg in messages {
        if let MessageContent::Blocks(blocks) = &msg.content {
            for block in blocks {
                if let ContentBlock::ToolUse { id, name, .. } = block {
                    names.insert(id.clone(), name.clone());
                }
            }
        }
    }
    names
}

pub fn claude_message_to_gemini(msg: &Message, names: &HashMap<String, String>) -> GeminiContent {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "model",
    };

    let mut parts = Vec::new();
    match &msg.content {
        MessageContent::Text(text) => parts.push(GeminiPart::text(text.clone())),
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => parts.push(GeminiPart::text(text.clone())),
                    ContentBlock::Image { source } if source.remote_url().is_some() => {
                        debug!("Skipping remote image: inline data only");
                    }
                    ContentBlock::Image { source } => parts.push(GeminiPart {
                        inline_data: Some(InlineData {
                            mime_type: source.media_type.clone(),
                            data: source.data.clone(),
                        }),
                        ..GeminiPart::default()
                    }),
                    ContentBlock::ToolUse { id, name, input } => parts.push(GeminiPart {
                        function_call: Some(FunctionCall {
                            id: Some(id.clone()),
                            name: name.clone(),
                            args: input.clone(),
                        }),
                        ..GeminiPart::default()
                    }),
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => {
                        let text = content.as_ref().map(ToolResultContent::as_text).unwrap_or_default();
                        parts.push(GeminiPart {
                            function_response: Some(FunctionResponse {
                                id: Some(tool_use_id.clone()),
                                name: names.get(tool_use_id).cloned().unwrap_or_else(|| tool_use_id.clone()),
                                response: function_response_body(&text, *is_error == Some(true)),
                            }),
                            ..GeminiPart::default()
                        });
                    }
                    ContentBlock::Thinking { .. } | ContentBlock::Unknown => {}
                }
            }
        }
    }

    if parts.is_empty() {
        parts.push(GeminiPart::text(String::new()));
    }

    GeminiContent {
        role: Some(role.to_string()),
        parts,
    }
}

/// Gemini requires an object here: JSON objects pass through, anything else is wrapped.
fn function_response_body(text: &str, is_error: bool) -> Value {
    if is_error {
        return json!({ "error": text });
    }
    match serde_json::from_str::<Value>(text) {
        Ok(obj @ Value::Object(_)) => obj,
        _ => json!({ "content": text }),
    }
}

/// Gemini content back into a Claude message. Empty role reads as `user`.
pub fn gemini_content_to_claude(content: &GeminiContent) -> Message {
    let role = match content.role.as_deref() {
        Some("model") => Role::Assistant,
        _ => Role::User,
    };

    let blocks = content
        .parts
        .iter()
        .enumerate()
        .filter_map(|(i, part)| {
            if let Some(call) = &part.function_call {
                return Some(ContentBlock::ToolUse {
                    id: call.id.clone().unwrap_or_else(|| synth_tool_id(&call.name, i)),
                    name: call.name.clone(),
                    input: call.args.clone(),
                });
            }
            if let Some(resp) = &part.function_response {
                return Some(ContentBlock::ToolResult {
                    tool_use_id: resp.id.clone().unwrap_or_else(|| resp.name.clone()),
                    content: Some(ToolResultContent::Text(resp.response.to_string())),
                    is_error: None,
                });
            }
            if let Some(data) = &part.inline_data {
                return Some(ContentBlock::Image {
                    source: ImageSource::base64(data.mime_type.clone(), data.data.clone()),
                });
            }
            part.text.as_ref().map(|text| {
                if part.is_thought() {
                    ContentBlock::Thinking {
                        thinking: Value::String(text.clone()),
                        signature: part.thought_signature.clone(),
                    }
                } else {
                    ContentBlock::Text { text: text.clone() }
                }
            })
        })
        .collect();

    Message {
        role,
        content: MessageContent::Blocks(blocks),
    }
}

/// Gemini content into `OpenAI` messages: function responses become `tool`
/// messages first, then at most one message with text and `tool_calls`.
pub fn gemini_content_to_openai(content: &GeminiContent) -> Vec<ChatMessage> {
    let role = match content.role.as_deref() {
        Some("model") => "assistant",
        _ => "user",
    };

    let mut out = Vec::new();
    let mut texts: Vec<&str> = Vec::new();
    let mut tool_calls = Vec::new();

    for (i, part) in content.parts.iter().enumerate() {
        if let Some(call) = &part.function_call {
            tool_calls.push(ChatToolCall {
                id: call.id.clone().unwrap_or_else(|| synth_tool_id(&call.name, i)),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: call.name.clone(),
                    arguments: call.args.to_string(),
                },
            });
        } else if let Some(resp) = &part.function_response {
            out.push(ChatMessage {
                role: "tool".to_string(),
                content: Some(ChatContent::Text(resp.response.to_string())),
                tool_calls: None,
                tool_call_id: Some(resp.id.clone().unwrap_or_else(|| resp.name.clone())),
                name: Some(resp.name.clone()),
            });
        } else if let Some(text) = part.text.as_deref().filter(|_| !part.is_thought()) {
            texts.push(text);
        }
    }

    if !texts.is_empty() || !tool_calls.is_empty() {
        let joined = texts.join("\n");
        out.push(ChatMessage {
            role: role.to_string(),
            content: (!joined.is_empty()).then_some(ChatContent::Text(joined)),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
            name: None,
        });
    }

    out
}

/// `OpenAI` messages into Gemini `(systemInstruction, contents)`.
pub fn openai_messages_to_gemini(messages: &[ChatMessage]) -> (Option<GeminiContent>, Vec<GeminiContent>) {
    let names: HashMap<&str, &str> = messages
        .iter()
        .flat_map(|m| m.tool_calls.iter().flatten())
        .map(|tc| (tc.id.as_str(), tc.function.name.as_str()))
        .collect();

    let mut system = Vec::new();
    let mut contents = Vec::new();

    for msg in messages {
        let text = msg.content.as_ref().map(ChatContent::as_text).unwrap_or_default();
        match msg.role.as_str() {
            "system" | "developer" => system.push(GeminiPart::text(text)),
            "tool" => {
                let id = msg.tool_call_id.clone().unwrap_or_default();
                let name = names
                    .get(id.as_str())
                    .map(|n| (*n).to_string())
                    .or_else(|| msg.name.clone())
                    .unwrap_or_else(|| id.clone());
                contents.push(GeminiContent {
                    role: Some("user".to_string()),
                    parts: vec![GeminiPart {
                        function_response: Some(FunctionResponse {
                            id: Some(id),
                            name,
                            response: function_response_body(&text, false),
                        }),
                        ..GeminiPart::default()
                    }],
                });
            }
            role => {
                let mut parts = Vec::new();
                if !text.is_empty() {
                    parts.push(GeminiPart::text(text));
                }
                for tc in msg.tool_calls.iter().flatten() {
                    parts.push(GeminiPart {
                        function_call: Some(FunctionCall {
                            id: Some(tc.id.clone()),
                            name: tc.function.name.clone(),
                            args: serde_json::from_str(&tc.function.arguments).unwrap_or_else(|_| json!({})),
                        }),
                        ..GeminiPart::default()
                    });
                }
                contents.push(GeminiContent {
                    role: Some(if role == "assistant" { "model" } else { "user" }.to_string()),
                    parts,
                });
            }
        }
    }

    let system = (!system.is_empty()).then_some(GeminiContent {
        role: None,
        parts: system,
    });
    (system, contents)
}

/// Translate a Gemini response into a Claude Messages response.
/// Only the first candidate is read.
pub fn gemini_to_anthropic(resp: &GenerateContentResponse, original_model: &str) -> MessagesResponse {
    let candidate = resp.candidates.first();

    let message = candidate
        .and_then(|c| c.content.as_ref())
        .map(gemini_content_to_claude);

    let mut content: Vec<ResponseContentBlock> = Vec::new();
    if let Some(MessageContent::Blocks(blocks)) = message.map(|m| m.content) {
        for block in blocks {
            match block {
                ContentBlock::Text { text } => content.push(ResponseContentBlock::Text { text }),
                ContentBlock::ToolUse { id, name, input } => {
                    content.push(ResponseContentBlock::ToolUse { id, name, input });
                }
                ContentBlock::Thinking {
                    thinking,
                    signature,
                } => content.push(ResponseContentBlock::Thinking {
                    thinking,
                    signature,
                }),
                ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {
                    debug!("Dropping non-response part from Gemini candidate");
                }
            }
        }
    }

    let has_tool_use = content
        .iter()
        .any(|b| matches!(b, ResponseContentBlock::ToolUse { .. }));

    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = if has_tool_use {
        "tool_use"
    } else {
        candidate
            .and_then(|c| c.finish_reason.as_deref())
            .map_or("end_turn", map_finish_reason)
    };

    let usage = resp
        .usage_metadata
        .as_ref()
        .map(|u| normalize(u).to_claude())
        .unwrap_or_default();

    let id = match &resp.response_id {
        Some(id) => format!("msg_{id}"),
        None => format!("msg_{}", uuid::Uuid::new_v4().simple()),
    };

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

/// Map a Gemini `finishReason` to a Claude `stop_reason`.
///
/// `SAFETY` and `RECITATION` collapse into `end_turn`; the block reason is lost.
pub fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "MAX_TOKENS" => "max_tokens",
        _ => "end_turn",
    }
}

/// Map a Gemini `finishReason` to an `OpenAI` `finish_reason`.
pub fn finish_reason_to_openai(reason: &str) -> &'static str {
    match reason {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => "content_filter",
        _ => "stop",
    }
}

/// Map an `OpenAI` `finish_reason` to a Gemini `finishReason`. Tool calls finish with `STOP`.
pub fn finish_reason_from_openai(reason: &str) -> &'static str {
    match reason {
        "length" => "MAX_TOKENS",
        "content_filter" => "SAFETY",
        _ => "STOP",
    }
}

/// Map a Claude `stop_reason` to a Gemini `finishReason`.
pub fn finish_reason_from_claude(reason: &str) -> &'static str {
    match reason {
        "max_tokens" => "MAX_TOKENS",
        _ => "STOP",
    }
}

/// Translate a Gemini error envelope into a Claude error response.
pub fn gemini_error_to_anthropic(err: &GeminiErrorResponse) -> ErrorResponse {
    let error_type = match err.error.status.as_str() {
        "INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "OUT_OF_RANGE" => "invalid_request_error",
        "RESOURCE_EXHAUSTED" => "rate_limit_error",
        "UNAUTHENTICATED" => "authentication_error",
        "PERMISSION_DENIED" => "permission_error",
        "NOT_FOUND" => "not_found_error",
        "UNAVAILABLE" => "overloaded_error",
        _ => "api_error",
    };
    ErrorResponse::new(error_type, &err.error.message)
}

/// Stable id for a function call that arrived without one.
pub fn synth_tool_id(name: &str, position: usize) -> String {
    format!("toolu_{name}_{position}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::{SystemContent, Tool, ToolChoiceSpecific};

    fn blocks(role: Role, blocks: Vec<ContentBlock>) -> Message {
        Message {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    #[test]
    fn test_request_with_tools_and_tool_result() {
        let req = MessagesRequest {
            model: "claude".to_string(),
            max_tokens: 256,
            system: Some(SystemContent::Text("sys".to_string())),
            messages: vec![
                blocks(
                    Role::Assistant,
                    vec![ContentBlock::ToolUse {
                        id: "toolu_1".to_string(),
                        name: "get_weather".to_string(),
                        input: json!({"city": "sf"}),
                    }],
                ),
                blocks(
                    Role::User,
                    vec![ContentBlock::ToolResult {
                        tool_use_id: "toolu_1".to_string(),
                        content: Some(ToolResultContent::Text("sunny".to_string())),
                        is_error: None,
                    }],
                ),
            ],
            tools: Some(vec![Tool {
                name: "get_weather".to_string(),
                tool_type: None,
                description: None,
                input_schema: Some(json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"city": {"type": "string"}}
                })),
            }]),
            tool_choice: Some(ToolChoice::Specific(ToolChoiceSpecific {
                choice_type: "tool".to_string(),
                name: "get_weather".to_string(),
            })),
            ..MessagesRequest::default()
        };

        let body = serde_json::to_value(claude_to_gemini(&req)).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["contents"][0]["role"], "model");
        assert_eq!(body["contents"][0]["parts"][0]["functionCall"]["name"], "get_weather");
        assert_eq!(body["contents"][1]["parts"][0]["functionResponse"]["name"], "get_weather");
        assert_eq!(
            body["contents"][1]["parts"][0]["functionResponse"]["response"],
            json!({"content": "sunny"})
        );
        assert!(body["tools"][0]["functionDeclarations"][0]["parameters"]
            .get("additionalProperties")
            .is_none());
        assert_eq!(body["toolConfig"]["functionCallingConfig"]["mode"], "ANY");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn test_response_with_function_call_is_tool_use() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Checking."},
                    {"functionCall": {"name": "lookup", "args": {"q": "x"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "cachedContentTokenCount": 2, "candidatesTokenCount": 4},
            "responseId": "abc"
        }))
        .unwrap();

        let out = gemini_to_anthropic(&resp, "claude-x");
        assert_eq!(out.id, "msg_abc");
        assert_eq!(out.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(out.content.len(), 3);
        assert!(matches!(&out.content[0], ResponseContentBlock::Thinking { .. }));
        assert!(matches!(&out.content[2], ResponseContentBlock::ToolUse { id, .. } if id == "toolu_lookup_2"));
        assert_eq!(out.usage.input_tokens, 10);
        assert_eq!(out.usage.output_tokens, 4);
    }

    #[test]
    fn test_safety_finish_is_end_turn() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }))
        .unwrap();
        let out = gemini_to_anthropic(&resp, "m");
        assert_eq!(out.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(map_finish_reason("MAX_TOKENS"), "max_tokens");
        assert_eq!(map_finish_reason("RECITATION"), "end_turn");
    }

    #[test]
    fn test_finish_reason_tables() {
        assert_eq!(finish_reason_to_openai("SAFETY"), "content_filter");
        assert_eq!(finish_reason_to_openai("MAX_TOKENS"), "length");
        assert_eq!(finish_reason_from_openai("tool_calls"), "STOP");
        assert_eq!(finish_reason_from_openai("content_filter"), "SAFETY");
        assert_eq!(finish_reason_from_claude("tool_use"), "STOP");
        assert_eq!(finish_reason_from_claude("stop_sequence"), "STOP");
        assert_eq!(finish_reason_from_claude("max_tokens"), "MAX_TOKENS");
    }

    #[test]
    fn test_gemini_content_to_claude_roles_and_inline_data() {
        let content = GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                inline_data: Some(InlineData {
                    mime_type: "image/png".to_string(),
                    data: "AAAA".to_string(),
                }),
                ..GeminiPart::default()
            }],
        };
        let msg = gemini_content_to_claude(&content);
        assert_eq!(msg.role, Role::User);
        assert!(matches!(
            &msg.content,
            MessageContent::Blocks(b) if matches!(&b[0], ContentBlock::Image { source } if source.data == "AAAA")
        ));
    }

    #[test]
    fn test_openai_and_gemini_tool_round_trip() {
        let messages = vec![
            ChatMessage::text("system", "rules"),
            ChatMessage {
                role: "assistant".to_string(),
                content: None,
                tool_calls: Some(vec![ChatToolCall {
                    id: "call_9".to_string(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: "search".to_string(),
                        arguments: r#"{"q":"rust"}"#.to_string(),
                    },
                }]),
                tool_call_id: None,
                name: None,
            },
            ChatMessage {
                role: "tool".to_string(),
                content: Some(ChatContent::Text(r#"{"hits":3}"#.to_string())),
                tool_calls: None,
                tool_call_id: Some("call_9".to_string()),
                name: None,
            },
        ];

        let (system, contents) = openai_messages_to_gemini(&messages);
        assert_eq!(system.unwrap().parts[0].text.as_deref(), Some("rules"));
        assert_eq!(contents[0].role.as_deref(), Some("model"));
        let response = contents[1].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "search");
        assert_eq!(response.response, json!({"hits": 3}));

        let back = gemini_content_to_openai(&contents[0]);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].role, "assistant");
        let calls = back[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_9");
        assert_eq!(calls[0].function.arguments, r#"{"q":"rust"}"#);

        let tool_back = gemini_content_to_openai(&contents[1]);
        assert_eq!(tool_back[0].role, "tool");
        assert_eq!(tool_back[0].tool_call_id.as_deref(), Some("call_9"));
    }

    #[test]
    fn test_error_status_mapping() {
        let err: GeminiErrorResponse = serde_json::from_value(json!({
            "error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED"}
        }))
        .unwrap();
        let out = gemini_error_to_anthropic(&err);
        assert_eq!(out.error.error_type, "rate_limit_error");
        assert_eq!(out.error.message, "quota");
    }

    #[test]
    fn test_unmodelled_blocks_and_server_tools_are_skipped() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "gemini-x",
            "max_tokens": 8,
            "messages": [{"role": "user", "content": [
                {"type": "redacted_thinking", "data": "opaque"},
                {"type": "image", "source": {"type": "url", "url": "https://example.com/a.png"}},
                {"type": "text", "text": "hello"}
            ]}],
            "tools": [{"type": "web_search_20250305", "name": "web_search"}]
        }))
        .unwrap();

        let body = serde_json::to_value(claude_to_gemini(&req)).unwrap();
        assert_eq!(body["contents"][0]["parts"], json!([{"text": "hello"}]));
        assert!(body.get("tools").is_none());
    }
}
