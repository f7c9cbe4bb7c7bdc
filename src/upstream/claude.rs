use bytes::Bytes;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::{
    build_target_url, generic_error, upstream_headers, ClientRequest, ConvertedResponse,
    UpstreamDialect, UpstreamRequest,
};
use crate::error::{ProxyError, Result};
use crate::providers::UpstreamFormat;
use crate::routing::RoutingConfig;
use crate::transcode::StreamMode;
use crate::translate::anthropic_types::ErrorResponse;
use crate::translate::usage::normalize;

/// Claude-speaking upstream. Bodies pass through untouched unless the model
/// needs redirecting or configured keys must be dropped.
#[derive(Debug, Clone, Default)]
pub struct ClaudeUpstream {
    drop_params: Vec<String>,
}

impl ClaudeUpstream {
    pub fn new(drop_params: Vec<String>) -> Self {
        Self { drop_params }
    }

    fn rewrite_body(&self, req: &ClientRequest, routing: &RoutingConfig) -> Result<(Bytes, String)> {
        let upstream_model = routing.redirect_model(req.model());
        if !routing.has_redirects() && self.drop_params.is_empty() {
            return Ok((req.body.clone(), upstream_model));
        }

        let mut body: Value = serde_json::from_slice(&req.body)
            .map_err(|e| ProxyError::decode(format!("invalid request body: {e}")))?;
        let obj = body
            .as_object_mut()
            .ok_or_else(|| ProxyError::decode("request body is not a JSON object"))?;

        obj.insert("model".to_string(), Value::String(upstream_model.clone()));
        for key in &self.drop_params {
            if obj.remove(key).is_some() {
                debug!(param = %key, "Dropped request parameter");
            }
        }

        Ok((Bytes::from(serde_json::to_vec(&body)?), upstream_model))
    }
}

impl UpstreamDialect for ClaudeUpstream {
    fn format(&self) -> UpstreamFormat {
        UpstreamFormat::Anthropic
    }

    fn build(&self, req: &ClientRequest, routing: &RoutingConfig, api_key: &str) -> Result<UpstreamRequest> {
        let url = build_target_url(
            routing.effective_base_url(),
            "/messages",
            req.query.as_deref(),
        );
        let headers = upstream_headers(req, &url, api_key, self.format())?;
        let (body, model) = self.rewrite_body(req, routing)?;

        Ok(UpstreamRequest {
            method: Method::POST,
            url,
            headers,
            body,
            model,
        })
    }

    fn convert_response(&self, body: &[u8], _original_model: &str) -> Result<ConvertedResponse> {
        // relayed verbatim; usage is only read for the journal
        let usage = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get("usage").map(normalize));
        Ok(ConvertedResponse {
            body: Bytes::copy_from_slice(body),
            usage,
        })
    }

    fn convert_error(&self, status: u16, body: &[u8]) -> ErrorResponse {
        serde_json::from_slice(body).unwrap_or_else(|_| generic_error(status, body))
    }

    fn stream_mode(&self) -> StreamMode {
        StreamMode::Passthrough
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use serde_json::json;
    use std::collections::HashMap;

    const BODY: &str = r#"{"model":"claude-x","max_tokens":10,"temperature":0.1000000000000000055511151231257827,"betas":["a"],"messages":[{"role":"user","content":"hi"}]}"#;

    fn client_request() -> ClientRequest {
        ClientRequest::new(HeaderMap::new(), Some("beta=true".to_string()), Bytes::from_static(BODY.as_bytes()))
            .unwrap()
    }

    #[test]
    fn test_passthrough_without_redirects_keeps_bytes() {
        let routing = RoutingConfig::new("https://api.anthropic.com", HashMap::new());
        let out = ClaudeUpstream::default().build(&client_request(), &routing, "sk").unwrap();

        assert_eq!(out.url, "https://api.anthropic.com/v1/messages?beta=true");
        assert_eq!(out.body.as_ref(), BODY.as_bytes());
        assert_eq!(out.headers.get("x-api-key").unwrap(), "sk");
        assert_eq!(out.headers.get("host").unwrap(), "api.anthropic.com");
    }

    #[test]
    fn test_redirect_rewrites_model_and_drops_params() {
        let routing = RoutingConfig::new(
            "https://gateway.local/api#",
            HashMap::from([("claude-x".to_string(), "claude-y".to_string())]),
        );
        let out = ClaudeUpstream::new(vec!["betas".to_string()])
            .build(&client_request(), &routing, "sk")
            .unwrap();

        assert_eq!(out.url, "https://gateway.local/api/messages?beta=true");
        assert_eq!(out.model, "claude-y");
        let body: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(body["model"], "claude-y");
        assert!(body.get("betas").is_none());
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_unmodelled_blocks_pass_through_byte_for_byte() {
        let body = concat!(
            r#"{"model":"claude-x","max_tokens":10,"messages":[{"role":"user","content":["#,
            r#"{"type":"redacted_thinking","data":"EmwKAhgB"},"#,
            r#"{"type":"image","source":{"type":"url","url":"https://example.com/a.png"}}]}],"#,
            r#""tools":[{"type":"web_search_20250305","name":"web_search"}]}"#
        );
        let req = ClientRequest::new(HeaderMap::new(), None, Bytes::from_static(body.as_bytes())).unwrap();
        let routing = RoutingConfig::new("https://api.anthropic.com", HashMap::new());
        let out = ClaudeUpstream::default().build(&req, &routing, "sk").unwrap();
        assert_eq!(out.body.as_ref(), body.as_bytes());
    }

    #[test]
    fn test_errors_relayed_verbatim() {
        let upstream = ClaudeUpstream::default();
        let body = json!({"type": "error", "error": {"type": "overloaded_error", "message": "busy"}});
        let err = upstream.convert_error(529, body.to_string().as_bytes());
        assert_eq!(err.error.error_type, "overloaded_error");

        let err = upstream.convert_error(502, b"<html>bad gateway</html>");
        assert_eq!(err.error.error_type, "api_error");
        assert!(err.error.message.contains("502"));
    }
}
