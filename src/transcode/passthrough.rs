//! Claude upstream streams, relayed event by event.
//!
//! Lines are buffered until the blank line that ends an SSE event, then the
//! whole event goes out at once so a client never sees half an event. Bytes
//! are relayed as received, line endings included.

use bytes::Bytes;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::debug;

use super::{line_text, sse_data, send_record, tolerate, Line, LineReader, LINE_BUFFER_CAPACITY};
use crate::error::{ProxyError, Result};
use crate::translate::usage::{normalize, CanonicalUsage};

const TOOL_STOP_MARKER: &str = r#""stop_reason":"tool_use""#;

pub(crate) async fn run<R>(lines: LineReader<R>, tx: &mpsc::Sender<Bytes>) -> (Result<()>, Option<CanonicalUsage>)
where
    R: AsyncRead + Unpin,
{
    let mut usage = UsageTracker::default();
    let result = relay(lines, tx, &mut usage).await;
    (result, usage.finish())
}

async fn relay<R>(mut lines: LineReader<R>, tx: &mpsc::Sender<Bytes>, usage: &mut UsageTracker) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut event: Vec<u8> = Vec::new();
    let mut tool_stop_seen = false;
    let mut relayed = 0usize;

    loop {
        let raw = match lines.next_line().await {
            Ok(Some(Line::Raw(raw))) => raw,
            Ok(Some(Line::Oversized(len))) => {
                return Err(ProxyError::upstream_protocol(format!(
                    "event line of {len} bytes exceeds {LINE_BUFFER_CAPACITY}"
                )));
            }
            Ok(None) => break,
            Err(e) => {
                tolerate(e, tool_stop_seen)?;
                break;
            }
        };

        let line = line_text(&raw);
        if line.is_empty() {
            if event.is_empty() {
                continue;
            }
            event.extend_from_slice(&raw);
            if let Err(e) = send_record(tx, std::mem::take(&mut event)).await {
                return tolerate(e, tool_stop_seen);
            }
            relayed += 1;
            continue;
        }

        if let Some(data) = sse_data(&line) {
            if data.contains(TOOL_STOP_MARKER) {
                tool_stop_seen = true;
            }
            usage.observe(data);
        }
        event.extend_from_slice(&raw);
    }

    // trailing event without its blank line
    if !event.is_empty() {
        if !event.ends_with(b"\n") {
            event.push(b'\n');
        }
        event.push(b'\n');
        if let Err(e) = send_record(tx, event).await {
            return tolerate(e, tool_stop_seen);
        }
        relayed += 1;
    }

    debug!(relayed, tool_stop_seen, "Passthrough stream finished");
    Ok(())
}

/// Usage from `message_start`, with later `message_delta` counts laid over it.
#[derive(Debug, Default)]
struct UsageTracker {
    raw: Option<serde_json::Map<String, Value>>,
}

impl UsageTracker {
    fn observe(&mut self, data: &str) {
        if !data.contains("\"usage\"") {
            return;
        }
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            return;
        };
        let reported = match value.get("type").and_then(Value::as_str) {
            Some("message_start") => value.pointer("/message/usage"),
            Some("message_delta") => value.get("usage"),
            _ => None,
        };
        if let Some(Value::Object(fields)) = reported {
            let raw = self.raw.get_or_insert_with(serde_json::Map::new);
            for (key, count) in fields {
                if !count.is_null() {
                    raw.insert(key.clone(), count.clone());
                }
            }
        }
    }

    fn finish(self) -> Option<CanonicalUsage> {
        self.raw.map(|raw| normalize(&Value::Object(raw)))
    }
}
