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
use crate::translate::openai_types::{ChatCompletionResponse, ChatErrorResponse};
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::{openai_error_to_anthropic, openai_to_anthropic};
use crate::translate::usage::normalize;

/// `OpenAI` Chat Completions upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAIUpstream;

impl UpstreamDialect for OpenAIUpstream {
    fn format(&self) -> UpstreamFormat {
        UpstreamFormat::OpenAI
    }

    fn build(&self, req: &ClientRequest, routing: &RoutingConfig, api_key: &str) -> Result<UpstreamRequest> {
        let url = build_target_url(
            routing.effective_base_url(),
            "/chat/completions",
            req.query.as_deref(),
        );
        let headers = upstream_headers(req, &url, api_key, self.format())?;
        let chat = anthropic_to_openai(&req.messages_request()?, routing);

        Ok(UpstreamRequest {
            method: Method::POST,
            url,
            headers,
            body: Bytes::from(serde_json::to_vec(&chat)?),
            model: chat.model,
        })
    }

    fn convert_response(&self, body: &[u8], original_model: &str) -> Result<ConvertedResponse> {
        let resp: ChatCompletionResponse = serde_json::from_slice(body)
            .map_err(|e| ProxyError::decode(format!("invalid chat completion: {e}")))?;
        let usage = resp.usage.as_ref().map(normalize);
        let converted = openai_to_anthropic(&resp, original_model);
        Ok(ConvertedResponse {
            body: Bytes::from(serde_json::to_vec(&converted)?),
            usage,
        })
    }

    fn convert_error(&self, status: u16, body: &[u8]) -> ErrorResponse {
        match serde_json::from_slice::<ChatErrorResponse>(body) {
            Ok(err) => openai_error_to_anthropic(&err),
            Err(_) => generic_error(status, body),
        }
    }

    fn stream_mode(&self) -> StreamMode {
        StreamMode::OpenAIDelta
    }
}
