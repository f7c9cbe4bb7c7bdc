//! Provider request builders and response converters, one per upstream dialect.
//!
//! Every dialect takes the same inbound Claude request and produces a fully
//! formed outbound request. Completed responses come back through
//! [`UpstreamDialect::convert_response`]; live streams are handed to the
//! transcoder selected by [`UpstreamDialect::stream_mode`].

mod claude;
mod gemini;
mod openai;

pub use claude::ClaudeUpstream;
pub use gemini::GeminiUpstream;
pub use openai::OpenAIUpstream;

use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use serde::Deserialize;
use reqwest::header::HeaderMap;
use reqwest::Method;

use crate::error::{ProxyError, Result};
use crate::headers::{
    ensure_compatible_user_agent, prepare_upstream_headers, set_authentication_header, AuthScheme,
};
use crate::providers::UpstreamFormat;
use crate::routing::RoutingConfig;
use crate::transcode::StreamMode;
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};
use crate::translate::usage::CanonicalUsage;

/// Ends with `/v` + digits + optional lowercase letters: `/v1`, `/v2beta`.
static VERSION_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/v\d+[a-z]*$").unwrap_or_else(|e| panic!("invalid version regex: {e}"))
});

/// The only fields every dialect needs. Passthrough decodes nothing else, so
/// block types and tools this crate does not model reach Claude untouched.
#[derive(Debug, Default, Deserialize)]
struct RequestHead {
    #[serde(default)]
    model: String,
    #[serde(default)]
    stream: Option<bool>,
}

/// One inbound Claude Messages request: raw bytes plus the routing fields.
/// Translating dialects decode the full body with [`Self::messages_request`].
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub headers: HeaderMap,
    pub query: Option<String>,
    pub body: Bytes,
    model: String,
    stream: bool,
}

impl ClientRequest {
    pub fn new(headers: HeaderMap, query: Option<String>, body: Bytes) -> Result<Self> {
        let head: RequestHead = serde_json::from_slice(&body)
            .map_err(|e| ProxyError::decode(format!("invalid request body: {e}")))?;
        Ok(Self {
            headers,
            query,
            body,
            model: head.model,
            stream: head.stream.unwrap_or(false),
        })
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages_request(&self) -> Result<MessagesRequest> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ProxyError::decode(format!("invalid request body: {e}")))
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Model name as sent upstream, after redirection
    pub model: String,
}

/// A completed upstream response rewritten into the Claude dialect.
#[derive(Debug, Clone)]
pub struct ConvertedResponse {
    pub body: Bytes,
    pub usage: Option<CanonicalUsage>,
}

pub trait UpstreamDialect: Send + Sync {
    fn format(&self) -> UpstreamFormat;

    /// Build the outbound request for `req`.
    fn build(&self, req: &ClientRequest, routing: &RoutingConfig, api_key: &str) -> Result<UpstreamRequest>;

    /// Convert a successful, non-streaming upstream body.
    fn convert_response(&self, body: &[u8], original_model: &str) -> Result<ConvertedResponse>;

    /// Convert an upstream error body into a Claude error envelope.
    fn convert_error(&self, status: u16, body: &[u8]) -> ErrorResponse;

    fn stream_mode(&self) -> StreamMode;
}

/// The dialect implementation for a configured upstream format.
pub fn for_format(format: UpstreamFormat, drop_params: Vec<String>) -> Box<dyn UpstreamDialect> {
    match format {
        UpstreamFormat::Anthropic => Box::new(ClaudeUpstream::new(drop_params)),
        UpstreamFormat::OpenAI => Box::new(OpenAIUpstream),
        UpstreamFormat::Gemini => Box::new(GeminiUpstream),
    }
}

/// Join a configured base URL, a provider endpoint and the inbound query.
///
/// One trailing `/` is trimmed. A trailing `#` is stripped and suppresses
/// versioning; otherwise `/v1` is inserted unless the base already ends in a
/// version segment.
pub fn build_target_url(base_url: &str, endpoint: &str, query: Option<&str>) -> String {
    let base = base_url.strip_suffix('/').unwrap_or(base_url);

    let mut url = match base.strip_suffix('#') {
        Some(unversioned) => unversioned.strip_suffix('/').unwrap_or(unversioned).to_string(),
        None if VERSION_SUFFIX.is_match(base) => base.to_string(),
        None => format!("{base}/v1"),
    };

    url.push_str(endpoint);
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(q);
    }
    url
}

/// `host[:port]` of an absolute URL.
pub fn target_host(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| ProxyError::config(format!("invalid upstream URL {url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ProxyError::config(format!("upstream URL has no host: {url}")))?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Shared header pipeline: prepare, authenticate, fix the user agent.
pub(crate) fn upstream_headers(
    req: &ClientRequest,
    url: &str,
    api_key: &str,
    format: UpstreamFormat,
) -> Result<HeaderMap> {
    let mut headers = prepare_upstream_headers(&req.headers, &target_host(url)?);
    set_authentication_header(&mut headers, api_key, AuthScheme::for_format(format))?;
    ensure_compatible_user_agent(&mut headers, format);
    Ok(headers)
}

/// Error envelope for a body that matched no known error shape.
pub(crate) fn generic_error(status: u16, body: &[u8]) -> ErrorResponse {
    let text = String::from_utf8_lossy(body);
    let snippet: String = text.chars().take(500).collect();
    ErrorResponse::api_error(format!("Provider returned status {status}: {snippet}"))
}
