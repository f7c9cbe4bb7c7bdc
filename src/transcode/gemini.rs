//! Gemini `streamGenerateContent?alt=sse` chunks to Claude block events.
//!
//! Gemini sends whole parts rather than deltas, so every function call is
//! complete on arrival and text parts are appended as-is.

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{emit, line_text, sse_data, tolerate, Line, LineReader};
use crate::error::{ProxyError, Result};
use crate::translate::anthropic_types::StreamEvent;
use crate::translate::gemini::{map_finish_reason, synth_tool_id};
use crate::translate::gemini_types::GenerateContentResponse;
use crate::translate::streaming::StreamTranslator;
use crate::translate::usage::CanonicalUsage;

pub(crate) async fn run<R>(
    lines: LineReader<R>,
    tx: &mpsc::Sender<Bytes>,
    model: &str,
) -> (Result<()>, Option<CanonicalUsage>)
where
    R: AsyncRead + Unpin,
{
    let mut translator = StreamTranslator::new(model);
    let result = drive(&mut translator, lines, tx).await;
    (result, translator.reported_usage().cloned())
}

async fn drive<R>(translator: &mut StreamTranslator, mut lines: LineReader<R>, tx: &mpsc::Sender<Bytes>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut tool_calls = 0usize;

    emit(tx, translator.start()).await?;

    loop {
        let raw = match lines.next_line().await {
            Ok(Some(Line::Raw(raw))) => raw,
            Ok(Some(Line::Oversized(len))) => {
                warn!(len, "Skipping oversized chunk");
                continue;
            }
            Ok(None) => break,
            Err(e) => {
                tolerate(e, translator.tool_stop_emitted())?;
                break;
            }
        };

        let line = line_text(&raw);
        let Some(data) = sse_data(&line) else {
            continue;
        };
        if data.is_empty() {
            continue;
        }

        let chunk: GenerateContentResponse = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "Skipping unparsable chunk");
                continue;
            }
        };

        let events = translate_chunk(translator, &chunk, &mut tool_calls)?;
        if let Err(e) = emit(tx, events).await {
            tolerate(e, translator.tool_stop_emitted())?;
            return Ok(());
        }
    }

    if let Err(e) = emit(tx, translator.finish()).await {
        tolerate(e, translator.tool_stop_emitted())?;
    }

    debug!(tool_calls, "Gemini stream finished");
    Ok(())
}

fn translate_chunk(
    translator: &mut StreamTranslator,
    chunk: &GenerateContentResponse,
    tool_calls: &mut usize,
) -> Result<Vec<StreamEvent>> {
    if let Some(err) = &chunk.error {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("upstream stream error");
        return Err(ProxyError::upstream_protocol(message));
    }

    if let Some(usage) = &chunk.usage_metadata {
        translator.update_usage(usage);
    }

    let mut events = Vec::new();
    let Some(candidate) = chunk.candidates.first() else {
        return Ok(events);
    };

    let mut saw_call = false;
    if let Some(content) = &candidate.content {
        for part in &content.parts {
            if let Some(text) = part.text.as_deref() {
                if part.is_thought() {
                    events.extend(translator.push_thinking(text, part.thought_signature.as_deref()));
                } else {
                    events.extend(translator.push_text(text));
                }
            }
            if let Some(call) = &part.function_call {
                let id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| synth_tool_id(&call.name, *tool_calls));
                *tool_calls += 1;
                saw_call = true;
                events.extend(translator.push_complete_tool_call(id, call.name.clone(), &call.args));
            }
        }
    }

    if let Some(reason) = candidate.finish_reason.as_deref() {
        let stop = if saw_call { "tool_use" } else { map_finish_reason(reason) };
        events.extend(translator.on_finish(stop));
    }

    Ok(events)
}
