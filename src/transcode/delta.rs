//! `OpenAI` chat-completion chunks to Claude block events.

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{emit, line_text, sse_data, tolerate, Line, LineReader};
use crate::error::Result;
use crate::translate::openai_types::ChatCompletionChunk;
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
    let mut chunks = 0usize;

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
        if data == "[DONE]" {
            break;
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "Skipping unparsable chunk");
                continue;
            }
        };
        chunks += 1;

        let events = translator.process_chunk(&chunk)?;
        if let Err(e) = emit(tx, events).await {
            tolerate(e, translator.tool_stop_emitted())?;
            return Ok(());
        }
    }

    if let Err(e) = emit(tx, translator.finish()).await {
        tolerate(e, translator.tool_stop_emitted())?;
    }

    debug!(
        chunks,
        output_tokens = translator.usage().output_tokens,
        "Delta stream finished"
    );
    Ok(())
}
