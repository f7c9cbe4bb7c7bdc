use crate::error::Result;
use crate::server::AppState;
use crate::transcode::{self, StreamSummary, TranscodeStream};
use crate::translate::usage::CanonicalUsage;
use crate::upstream::{ClientRequest, UpstreamRequest};

use bytes::Bytes;
use tracing::{debug, info, warn};

/// What came back from the upstream, already in the Claude dialect.
#[derive(Debug)]
pub enum ProxyOutcome {
    /// A full JSON body: either the converted response or a converted error.
    Complete {
        status: u16,
        body: Bytes,
        usage: Option<CanonicalUsage>,
    },
    /// A live stream of SSE records.
    Stream(TranscodeStream),
}

/// Send the upstream request built for `req` and bring the answer back into
/// the Claude dialect. `on_stream_finish` runs on the transcoder task once a
/// live stream ends; it is dropped unused for complete bodies.
pub async fn forward<F>(
    state: &AppState,
    req: &ClientRequest,
    upstream: UpstreamRequest,
    on_stream_finish: F,
) -> Result<ProxyOutcome>
where
    F: FnOnce(StreamSummary) + Send + 'static,
{
    let dialect = state.dialect.as_ref();
    let streaming = req.is_streaming();

    info!(
        model = %req.model(),
        upstream_model = %upstream.model,
        upstream = ?dialect.format(),
        streaming,
        body_bytes = req.body.len(),
        "Forwarding request"
    );

    let response = state
        .client
        .request(upstream.method, &upstream.url)
        .headers(upstream.headers)
        .body(upstream.body)
        .send()
        .await?;

    let status = response.status().as_u16();

    if status >= 400 {
        let body = response.bytes().await?;
        warn!(status, upstream = ?dialect.format(), body_len = body.len(), "Upstream returned error");
        let err = dialect.convert_error(status, &body);
        return Ok(ProxyOutcome::Complete {
            status,
            body: Bytes::from(serde_json::to_vec(&err)?),
            usage: None,
        });
    }

    if streaming {
        let mode = dialect.stream_mode();
        debug!(?mode, "Starting stream transcoder");
        let stream = transcode::spawn_with(
            mode,
            transcode::body_reader(response),
            req.model().to_string(),
            on_stream_finish,
        );
        return Ok(ProxyOutcome::Stream(stream));
    }

    let body = response.bytes().await?;
    let converted = dialect.convert_response(&body, req.model())?;

    if let Some(usage) = &converted.usage {
        info!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Completed"
        );
    }

    Ok(ProxyOutcome::Complete {
        status,
        body: converted.body,
        usage: converted.usage,
    })
}
