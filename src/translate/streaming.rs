//! State machine for turning delta-style upstream chunks into Claude SSE events.
//!
//! The [`StreamTranslator`] is owned by the one task driving a stream. Text and
//! tool-use blocks are numbered by two independent counters; thinking blocks
//! share the text counter. Tool calls are
//! buffered per upstream index until their arguments parse as JSON, then
//! emitted as one complete `content_block_start` / `content_block_delta` /
//! `content_block_stop` triple.
//!
//! Usage:
//!   let mut translator = StreamTranslator::new("claude-sonnet-4-20250514");
//!   for chunk in openai_chunks {
//!       let events = translator.process_chunk(&chunk)?;
//!       // send each event as SSE
//!   }
//!   let final_events = translator.finish();

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent,
};
use super::openai_types::ChatCompletionChunk;
use super::response::map_finish_reason;
use super::usage::{normalize, CanonicalUsage};
use crate::error::{ProxyError, Result};

/// Kind of the non-tool block currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Thinking,
}

/// Partial tool call, keyed by the upstream's own call index.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn is_complete(&self) -> bool {
        !self.id.is_empty()
            && !self.name.is_empty()
            && !self.arguments.is_empty()
            && serde_json::from_str::<Value>(&self.arguments).is_ok()
    }
}

#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    open_block: Option<OpenBlock>,
    text_block_index: usize,
    tool_use_block_index: usize,
    accumulators: BTreeMap<u64, ToolCallAccumulator>,
    tool_stop_emitted: bool,
    pending_stop: Option<&'static str>,
    usage: CanonicalUsage,
    usage_reported: bool,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            started: false,
            finished: false,
            open_block: None,
            text_block_index: 0,
            tool_use_block_index: 0,
            accumulators: BTreeMap::new(),
            tool_stop_emitted: false,
            pending_stop: None,
            usage: CanonicalUsage::default(),
            usage_reported: false,
        }
    }

    /// `message_start` and `ping`, once.
    pub fn start(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.ensure_started(&mut events);
        events
    }

    pub fn tool_stop_emitted(&self) -> bool {
        self.tool_stop_emitted
    }

    pub fn usage(&self) -> &CanonicalUsage {
        &self.usage
    }

    /// Usage, if the upstream reported any.
    pub fn reported_usage(&self) -> Option<&CanonicalUsage> {
        self.usage_reported.then_some(&self.usage)
    }

    /// Process one `OpenAI` streaming chunk.
    ///
    /// An `error` object in the chunk is terminal.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Result<Vec<StreamEvent>> {
        if let Some(ref error) = chunk.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);
            return Err(ProxyError::upstream_protocol(message));
        }

        let mut events = Vec::new();
        if self.finished {
            return Ok(events);
        }
        self.ensure_started(&mut events);

        if let Some(ref usage) = chunk.usage {
            self.update_usage(usage);
        }

        let Some(choice) = chunk.choices.first() else {
            return Ok(events);
        };

        // reasoning models stream chain-of-thought in `reasoning_content`
        if let Some(reasoning) = choice.delta.reasoning_content.as_deref() {
            events.append(&mut self.push_thinking(reasoning, None));
        }
        if let Some(text) = choice.delta.content.as_deref() {
            events.append(&mut self.push_text(text));
        }

        if let Some(ref tool_calls) = choice.delta.tool_calls {
            self.close_text(&mut events);
            for tc in tool_calls {
                let acc = self.accumulators.entry(tc.index).or_default();
                if let Some(id) = tc.id.as_deref().filter(|s| !s.is_empty()) {
                    if acc.id.is_empty() {
                        acc.id = id.to_string();
                    }
                }
                if let Some(ref func) = tc.function {
                    if let Some(name) = func.name.as_deref().filter(|s| !s.is_empty()) {
                        if acc.name.is_empty() {
                            acc.name = name.to_string();
                        }
                    }
                    if let Some(ref args) = func.arguments {
                        acc.arguments.push_str(args);
                    }
                }

                if acc.is_complete() {
                    if let Some(acc) = self.accumulators.remove(&tc.index) {
                        self.emit_tool_block(acc.id, acc.name, acc.arguments, &mut events);
                    }
                }
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            events.append(&mut self.on_finish(map_finish_reason(reason)));
        }

        Ok(events)
    }

    /// Text delta, opening a text block first if none is open.
    pub fn push_text(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished || text.is_empty() {
            return events;
        }
        self.ensure_started(&mut events);
        self.open(OpenBlock::Text, &mut events);
        events.push(StreamEvent::ContentBlockDelta {
            index: self.text_block_index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        });
        events
    }

    /// Reasoning delta, opening a thinking block first if none is open.
    pub fn push_thinking(&mut self, thinking: &str, signature: Option<&str>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished || (thinking.is_empty() && signature.is_none()) {
            return events;
        }
        self.ensure_started(&mut events);
        self.open(OpenBlock::Thinking, &mut events);
        if !thinking.is_empty() {
            events.push(StreamEvent::ContentBlockDelta {
                index: self.text_block_index,
                delta: Delta::ThinkingDelta {
                    thinking: thinking.to_string(),
                },
            });
        }
        if let Some(signature) = signature {
            events.push(StreamEvent::ContentBlockDelta {
                index: self.text_block_index,
                delta: Delta::SignatureDelta {
                    signature: signature.to_string(),
                },
            });
        }
        events
    }

    /// A tool call whose arguments arrived whole.
    pub fn push_complete_tool_call(&mut self, id: String, name: String, arguments: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.ensure_started(&mut events);
        self.close_text(&mut events);
        self.emit_tool_block(id, name, arguments.to_string(), &mut events);
        events
    }

    /// Handle an upstream finish, already mapped to a Claude stop reason.
    ///
    /// Pending tool calls are flushed first. A tool stop is emitted at most
    /// once per stream; any other reason is held until [`Self::finish`].
    pub fn on_finish(&mut self, stop_reason: &'static str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.ensure_started(&mut events);
        self.close_text(&mut events);
        self.flush_pending_tools(&mut events);

        // tool calls force tool_use even when the upstream reports `stop`
        let is_tool = stop_reason == "tool_use" || self.tool_use_block_index > 0;
        if is_tool {
            if !self.tool_stop_emitted {
                events.push(self.message_delta("tool_use"));
                self.tool_stop_emitted = true;
            }
        } else {
            self.pending_stop = Some(stop_reason);
        }
        events
    }

    /// Refresh the running usage from a raw usage object of any dialect.
    pub fn update_usage(&mut self, raw: &Value) {
        self.usage = normalize(raw);
        self.usage_reported = true;
    }

    /// End of input: close any open text block, report the stop reason if
    /// no tool stop went out, then `message_stop`.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.ensure_started(&mut events);
        self.close_text(&mut events);
        self.flush_pending_tools(&mut events);

        if !self.tool_stop_emitted {
            let reason = if self.tool_use_block_index > 0 {
                self.tool_stop_emitted = true;
                "tool_use"
            } else {
                self.pending_stop.unwrap_or("end_turn")
            };
            events.push(self.message_delta(reason));
        }
        events.push(StreamEvent::MessageStop);
        self.finished = true;

        debug!(
            text_blocks = self.text_block_index,
            tool_blocks = self.tool_use_block_index,
            output_tokens = self.usage.output_tokens,
            "Stream translated"
        );
        events
    }

    fn ensure_started(&mut self, events: &mut Vec<StreamEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        events.push(StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: self.usage.to_claude(),
            },
        });
        events.push(StreamEvent::Ping);
    }

    /// Make `kind` the open block, closing one of the other kind first.
    fn open(&mut self, kind: OpenBlock, events: &mut Vec<StreamEvent>) {
        if self.open_block == Some(kind) {
            return;
        }
        self.close_text(events);
        let content_block = match kind {
            OpenBlock::Text => ResponseContentBlock::Text {
                text: String::new(),
            },
            OpenBlock::Thinking => ResponseContentBlock::Thinking {
                thinking: Value::String(String::new()),
                signature: None,
            },
        };
        events.push(StreamEvent::ContentBlockStart {
            index: self.text_block_index,
            content_block,
        });
        self.open_block = Some(kind);
    }

    fn close_text(&mut self, events: &mut Vec<StreamEvent>) {
        if self.open_block.take().is_some() {
            events.push(StreamEvent::ContentBlockStop {
                index: self.text_block_index,
            });
            self.text_block_index += 1;
        }
    }

    fn emit_tool_block(&mut self, id: String, name: String, arguments: String, events: &mut Vec<StreamEvent>) {
        let index = self.tool_use_block_index;
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::ToolUse {
                id,
                name,
                input: Value::Object(serde_json::Map::new()),
            },
        });
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::InputJsonDelta {
                partial_json: arguments,
            },
        });
        events.push(StreamEvent::ContentBlockStop { index });
        self.tool_use_block_index += 1;
    }

    /// Leftovers with an id and a name go out if their arguments are empty
    /// (sent as `{}`) or valid JSON. Anything else is dropped.
    fn flush_pending_tools(&mut self, events: &mut Vec<StreamEvent>) {
        for (_, acc) in std::mem::take(&mut self.accumulators) {
            if acc.id.is_empty() || acc.name.is_empty() {
                warn!(tool_id = %acc.id, "Dropping tool call without id or name");
                continue;
            }
            if acc.arguments.is_empty() {
                self.emit_tool_block(acc.id, acc.name, "{}".to_string(), events);
            } else if serde_json::from_str::<Value>(&acc.arguments).is_ok() {
                self.emit_tool_block(acc.id, acc.name, acc.arguments, events);
            } else {
                warn!(tool_id = %acc.id, "Dropping tool call with incomplete arguments");
            }
        }
    }

    fn message_delta(&self, stop_reason: &str) -> StreamEvent {
        StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.usage.output_tokens,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(value: Value) -> ChatCompletionChunk {
        serde_json::from_value(value).unwrap()
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::event_name).collect()
    }

    #[test]
    fn test_simple_text_stream() {
        let mut translator = StreamTranslator::new("test-model");

        let events = translator
            .process_chunk(&chunk(json!({"choices": [{"delta": {"content": "Hello"}}]})))
            .unwrap();
        assert_eq!(
            names(&events),
            vec!["message_start", "ping", "content_block_start", "content_block_delta"]
        );

        let events = translator
            .process_chunk(&chunk(json!({"choices": [{"delta": {"content": " world"}}]})))
            .unwrap();
        assert_eq!(names(&events), vec!["content_block_delta"]);

        let events = translator
            .process_chunk(&chunk(json!({"choices": [{"delta": {}, "finish_reason": "stop"}]})))
            .unwrap();
        assert_eq!(names(&events), vec!["content_block_stop"]);

        let events = translator.finish();
        assert_eq!(names(&events), vec!["message_delta", "message_stop"]);
        match &events[0] {
            StreamEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("end_turn"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tool_call_held_until_json_complete() {
        let mut translator = StreamTranslator::new("m");
        translator.start();

        let first = translator
            .process_chunk(&chunk(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "get_weather", "arguments": "{\"city\":"}}
            ]}}]})))
            .unwrap();
        assert!(first.is_empty());

        let second = translator
            .process_chunk(&chunk(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"sf\"}"}}
            ]}}]})))
            .unwrap();
        assert_eq!(
            names(&second),
            vec!["content_block_start", "content_block_delta", "content_block_stop"]
        );
        match &second[1] {
            StreamEvent::ContentBlockDelta {
                delta: Delta::InputJsonDelta { partial_json },
                index,
            } => {
                assert_eq!(partial_json, "{\"city\":\"sf\"}");
                assert_eq!(*index, 0);
            }
            other => panic!("unexpected {other:?}"),
        }

        let third = translator
            .process_chunk(&chunk(json!({"choices": [{"finish_reason": "tool_calls"}]})))
            .unwrap();
        assert_eq!(names(&third), vec!["message_delta"]);
        assert!(translator.tool_stop_emitted());
    }

    #[test]
    fn test_text_closed_before_tool_and_indices_are_independent() {
        let mut translator = StreamTranslator::new("m");
        translator
            .process_chunk(&chunk(json!({"choices": [{"delta": {"content": "Checking"}}]})))
            .unwrap();

        let events = translator
            .process_chunk(&chunk(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 3, "id": "call_a", "function": {"name": "f", "arguments": "{}"}}
            ]}}]})))
            .unwrap();

        assert!(matches!(events[0], StreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[1], StreamEvent::ContentBlockStart { index: 0, .. }));

        let events = translator.push_text("more");
        assert!(matches!(events[0], StreamEvent::ContentBlockStart { index: 1, .. }));
    }

    #[test]
    fn test_tool_stop_emitted_once() {
        let mut translator = StreamTranslator::new("m");
        let finish = json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "c", "function": {"name": "f", "arguments": "{}"}}
        ]}, "finish_reason": "tool_calls"}]});

        let mut all = Vec::new();
        all.extend(translator.process_chunk(&chunk(finish.clone())).unwrap());
        all.extend(translator.process_chunk(&chunk(finish)).unwrap());
        all.extend(translator.finish());

        let deltas = all
            .iter()
            .filter(|e| matches!(e, StreamEvent::MessageDelta { .. }))
            .count();
        assert_eq!(deltas, 1);
        assert_eq!(names(&all).last(), Some(&"message_stop"));
    }

    #[test]
    fn test_pending_accumulators_flushed_on_finish() {
        let mut translator = StreamTranslator::new("m");
        translator
            .process_chunk(&chunk(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "empty_args", "function": {"name": "ping"}},
                {"index": 1, "id": "broken", "function": {"name": "f", "arguments": "{\"a\":"}}
            ]}}]})))
            .unwrap();

        let events = translator
            .process_chunk(&chunk(json!({"choices": [{"finish_reason": "tool_calls"}]})))
            .unwrap();
        let starts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockStart {
                    content_block: ResponseContentBlock::ToolUse { id, .. },
                    ..
                } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec!["empty_args"]);
    }

    #[test]
    fn test_error_chunk_is_terminal() {
        let mut translator = StreamTranslator::new("m");
        let err = translator
            .process_chunk(&chunk(json!({"error": {"message": "overloaded"}})))
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamProtocol { ref message } if message == "overloaded"));
    }

    #[test]
    fn test_usage_chunk_feeds_final_delta() {
        let mut translator = StreamTranslator::new("m");
        translator.push_text("hi");
        translator
            .process_chunk(&chunk(json!({
                "choices": [],
                "usage": {"prompt_tokens": 9, "completion_tokens": 4}
            })))
            .unwrap();
        let events = translator.finish();
        match &events[1] {
            StreamEvent::MessageDelta { usage, .. } => assert_eq!(usage.output_tokens, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_finish_without_chunks() {
        let mut translator = StreamTranslator::new("test-model");
        let events = translator.finish();
        assert_eq!(
            names(&events),
            vec!["message_start", "ping", "message_delta", "message_stop"]
        );
        assert!(translator.finish().is_empty());
    }

    #[test]
    fn test_reasoning_streams_as_thinking_block_before_text() {
        let mut translator = StreamTranslator::new("test-model");
        translator.start();

        let events = translator
            .process_chunk(&chunk(json!({"choices": [{"delta": {"reasoning_content": "let me see"}}]})))
            .unwrap();
        assert_eq!(names(&events), vec!["content_block_start", "content_block_delta"]);
        assert!(matches!(
            &events[0],
            StreamEvent::ContentBlockStart { index: 0, content_block: ResponseContentBlock::Thinking { .. } }
        ));
        assert!(matches!(
            &events[1],
            StreamEvent::ContentBlockDelta { delta: Delta::ThinkingDelta { thinking }, .. } if thinking == "let me see"
        ));

        let events = translator
            .process_chunk(&chunk(json!({"choices": [{"delta": {"content": "42"}}]})))
            .unwrap();
        assert_eq!(
            names(&events),
            vec!["content_block_stop", "content_block_start", "content_block_delta"]
        );
        assert!(matches!(&events[0], StreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(
            &events[1],
            StreamEvent::ContentBlockStart { index: 1, content_block: ResponseContentBlock::Text { .. } }
        ));
    }

    #[test]
    fn test_thinking_signature_delta() {
        let mut translator = StreamTranslator::new("test-model");
        translator.start();
        let events = translator.push_thinking("hmm", Some("sig"));
        assert_eq!(
            names(&events),
            vec!["content_block_start", "content_block_delta", "content_block_delta"]
        );
        assert!(matches!(
            &events[2],
            StreamEvent::ContentBlockDelta { delta: Delta::SignatureDelta { signature }, .. } if signature == "sig"
        ));
        assert!(translator.push_thinking("", None).is_empty());
    }
}
