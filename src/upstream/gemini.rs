use bytes::Bytes;
use reqwest::Method;

use super::{
    build_target_url, generic_error, upstream_headers, ClientRequest, ConvertedResponse,
    UpstreamDialect, UpstreamRequest,
};
use crate::error::{ProxyError, Result};
use crate::providers::UpstreamFormat;
use crate::routing::RoutingConfig;
use crate::transcode::StreamMode;
use crate::translate::anthropic_types::ErrorResponse;
use crate::translate::gemini::{claude_to_gemini, gemini_error_to_anthropic, gemini_to_anthropic};
use crate::translate::gemini_types::{GeminiErrorResponse, GenerateContentResponse};
use crate::translate::usage::normalize;

/// Gemini `generateContent` upstream. The model lives in the path and
/// streaming uses `streamGenerateContent?alt=sse`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiUpstream;

impl UpstreamDialect for GeminiUpstream {
    fn format(&self) -> UpstreamFormat {
        UpstreamFormat::Gemini
    }

    fn build(&self, req: &ClientRequest, routing: &RoutingConfig, api_key: &str) -> Result<UpstreamRequest> {
        let model = routing.redirect_model(req.model());

        let (endpoint, query) = if req.is_streaming() {
            let query = match req.query.as_deref().filter(|q| !q.is_empty()) {
                Some(q) => format!("{q}&alt=sse"),
                None => "alt=sse".to_string(),
            };
            (format!("/models/{model}:streamGenerateContent"), Some(query))
        } else {
            (format!("/models/{model}:generateContent"), req.query.clone())
        };

        let url = build_target_url(routing.effective_base_url(), &endpoint, query.as_deref());
        let headers = upstream_headers(req, &url, api_key, self.format())?;
        let body = claude_to_gemini(&req.messages_request()?);

        Ok(UpstreamRequest {
            method: Method::POST,
            url,
            headers,
            body: Bytes::from(serde_json::to_vec(&body)?),
            model,
        })
    }

    fn convert_response(&self, body: &[u8], original_model: &str) -> Result<ConvertedResponse> {
        let resp: GenerateContentResponse = serde_json::from_slice(body)
            .map_err(|e| ProxyError::decode(format!("invalid generateContent response: {e}")))?;
        let usage = resp.usage_metadata.as_ref().map(normalize);
        let converted = gemini_to_anthropic(&resp, original_model);
        Ok(ConvertedResponse {
            body: Bytes::from(serde_json::to_vec(&converted)?),
            usage,
        })
    }

    fn convert_error(&self, status: u16, body: &[u8]) -> ErrorResponse {
        match serde_json::from_slice::<GeminiErrorResponse>(body) {
            Ok(err) => gemini_error_to_anthropic(&err),
            Err(_) => generic_error(status, body),
        }
    }

    fn stream_mode(&self) -> StreamMode {
        StreamMode::Gemini
    }
}
