//! Streaming transcoders.
//!
//! Each upstream stream is driven by one spawned task that owns all of its
//! state. The task reads the upstream body line by line and pushes wire-ready
//! SSE records into a bounded channel. A terminal error, if any, goes into a
//! one-shot channel *before* the event channel closes.

mod delta;
mod gemini;
mod passthrough;

use std::borrow::Cow;
use std::io;

use bytes::Bytes;
use futures::TryStreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};
use crate::translate::anthropic_types::StreamEvent;
use crate::translate::usage::CanonicalUsage;

/// Room for the producer to run ahead of a slow client.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Upstream chunks can be far larger than the usual 8 KiB line buffer. Also
/// the longest line kept; anything longer is discarded.
pub const LINE_BUFFER_CAPACITY: usize = 1 << 20;

/// Which grammar the upstream stream speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Already Claude events, forwarded verbatim
    Passthrough,
    /// `OpenAI` chat-completion chunks
    OpenAIDelta,
    /// Gemini `streamGenerateContent?alt=sse`
    Gemini,
}

/// Consumer side of one transcoded stream.
#[derive(Debug)]
pub struct TranscodeStream {
    pub events: mpsc::Receiver<Bytes>,
    pub errors: oneshot::Receiver<ProxyError>,
}

/// How a stream ended. Reported from the producer task, so a client that
/// hangs up early still gets its stream accounted for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub usage: Option<CanonicalUsage>,
    pub error: Option<String>,
}

/// Start transcoding `reader` on its own task.
pub fn spawn<R>(mode: StreamMode, reader: R, model: String) -> TranscodeStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    spawn_with(mode, reader, model, |_| {})
}

/// Like [`spawn`], calling `on_finish` once the producer is done.
pub fn spawn_with<R, F>(mode: StreamMode, reader: R, model: String, on_finish: F) -> TranscodeStream
where
    R: AsyncRead + Send + Unpin + 'static,
    F: FnOnce(StreamSummary) + Send + 'static,
{
    let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (error_tx, errors) = oneshot::channel();

    tokio::spawn(async move {
        let lines = LineReader::new(reader);
        let (result, usage) = match mode {
            StreamMode::Passthrough => passthrough::run(lines, &event_tx).await,
            StreamMode::OpenAIDelta => delta::run(lines, &event_tx, &model).await,
            StreamMode::Gemini => gemini::run(lines, &event_tx, &model).await,
        };

        let error = match result {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, ?mode, "Stream ended with error");
                let message = e.to_string();
                let _ = error_tx.send(e);
                Some(message)
            }
        };
        drop(event_tx);
        on_finish(StreamSummary { usage, error });
    });

    TranscodeStream { events, errors }
}

/// Adapt a reqwest body into an `AsyncRead`, keeping the full error chain in
/// the message so disconnects stay recognizable.
pub fn body_reader(response: reqwest::Response) -> impl AsyncRead + Send + Unpin {
    StreamReader::new(Box::pin(
        response
            .bytes_stream()
            .map_err(|e| io::Error::other(error_chain(&e))),
    ))
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

pub(crate) enum Line {
    /// Raw bytes, terminator included
    Raw(Vec<u8>),
    /// Longer than [`LINE_BUFFER_CAPACITY`]; its bytes were discarded
    Oversized(usize),
}

/// Byte-level SSE line reader. Bytes are never decoded here, so invalid
/// UTF-8 and `\r\n` endings reach the driver untouched.
pub(crate) struct LineReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            inner: BufReader::with_capacity(LINE_BUFFER_CAPACITY, reader),
        }
    }

    pub(crate) async fn next_line(&mut self) -> Result<Option<Line>> {
        let mut line = Vec::new();
        let mut len = 0usize;

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                break;
            }
            let (used, done) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            if len + used <= LINE_BUFFER_CAPACITY {
                line.extend_from_slice(&available[..used]);
            } else if !line.is_empty() {
                line = Vec::new();
            }
            len += used;
            self.inner.consume(used);
            if done {
                break;
            }
        }

        Ok(match len {
            0 => None,
            n if n > LINE_BUFFER_CAPACITY => Some(Line::Oversized(n)),
            _ => Some(Line::Raw(line)),
        })
    }
}

/// Line content without its terminator. Invalid UTF-8 becomes U+FFFD.
pub(crate) fn line_text(raw: &[u8]) -> Cow<'_, str> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw)
}

/// Payload of an SSE `data:` line.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

pub(crate) async fn send_record(tx: &mpsc::Sender<Bytes>, record: impl Into<Bytes>) -> Result<()> {
    tx.send(record.into())
        .await
        .map_err(|_| ProxyError::transport("event channel closed"))
}

pub(crate) async fn emit(tx: &mpsc::Sender<Bytes>, events: Vec<StreamEvent>) -> Result<()> {
    for event in events {
        send_record(tx, event.to_sse()).await?;
    }
    Ok(())
}

/// Once a tool-use stop is out, a disconnect is the client leaving after a
/// complete tool call, not a failure.
pub(crate) fn tolerate(err: ProxyError, tool_stop_emitted: bool) -> Result<()> {
    if tool_stop_emitted && err.is_client_disconnect() {
        debug!(error = %err, "Ignoring disconnect after tool-use stop");
        Ok(())
    } else {
        Err(err)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_data_prefix_variants() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data("event: ping"), None);
    }

    #[test]
    fn test_tolerate_only_after_tool_stop() {
        let reset = || ProxyError::transport("connection reset by peer");
        assert!(tolerate(reset(), true).is_ok());
        assert!(tolerate(reset(), false).is_err());
        assert!(tolerate(ProxyError::decode("x"), true).is_err());
    }

    async fn read_all<R: AsyncRead + Unpin>(mut lines: LineReader<R>) -> Vec<Line> {
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_lines_keep_raw_bytes_and_terminators() {
        let reader = tokio_test::io::Builder::new()
            .read(b"data: a\r\n\r\ndata: \xff")
            .read(b"b\nlast")
            .build();

        let lines = read_all(LineReader::new(reader)).await;
        let raw: Vec<&[u8]> = lines
            .iter()
            .map(|l| match l {
                Line::Raw(bytes) => bytes.as_slice(),
                Line::Oversized(_) => panic!("unexpected oversized line"),
            })
            .collect();
        assert_eq!(
            raw,
            vec![&b"data: a\r\n"[..], &b"\r\n"[..], &b"data: \xffb\n"[..], &b"last"[..]]
        );
        assert_eq!(line_text(raw[0]), "data: a");
        assert_eq!(line_text(raw[1]), "");
        assert_eq!(line_text(raw[2]), "data: \u{fffd}b");
    }

    #[tokio::test]
    async fn test_line_over_capacity_is_discarded() {
        let long = vec![b'x'; LINE_BUFFER_CAPACITY + 10];
        let reader = tokio_test::io::Builder::new()
            .read(&long[..LINE_BUFFER_CAPACITY / 2])
            .read(&long[LINE_BUFFER_CAPACITY / 2..])
            .read(b"\ndata: ok\n")
            .build();

        let lines = read_all(LineReader::new(reader)).await;
        assert_eq!(lines.len(), 2);
        assert!(matches!(lines[0], Line::Oversized(n) if n == LINE_BUFFER_CAPACITY + 11));
        assert!(matches!(&lines[1], Line::Raw(bytes) if bytes.as_slice() == b"data: ok\n"));
    }

    #[tokio::test]
    async fn test_summary_reported_without_a_reader() {
        let reader = tokio_test::io::Builder::new()
            .read(b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2}}\n\n")
            .build();
        let (tx, rx) = oneshot::channel();
        // events are never read
        let _stream = spawn_with(StreamMode::OpenAIDelta, reader, "m".to_string(), move |summary| {
            let _ = tx.send(summary);
        });

        let summary = rx.await.unwrap();
        assert_eq!(summary.error, None);
        assert_eq!(summary.usage.map(|u| u.output_tokens), Some(2));
    }

    #[tokio::test]
    async fn test_summary_records_client_hangup() {
        let reader = tokio_test::io::Builder::new()
            .read(b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n")
            .build();
        let (tx, rx) = oneshot::channel();
        let stream = spawn_with(StreamMode::OpenAIDelta, reader, "m".to_string(), move |summary| {
            let _ = tx.send(summary);
        });
        drop(stream);

        let summary = rx.await.unwrap();
        assert!(summary.error.unwrap().contains("event channel closed"));
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let inner = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer");
        let outer = io::Error::other(inner);
        assert!(error_chain(&outer).contains("connection reset"));
    }
}
