//! Outbound header preparation.
//!
//! Inbound headers are copied minus the hop-by-hop set and any client
//! credentials, then authentication and a user agent are overlaid for the
//! target dialect.

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::error::{ProxyError, Result};
use crate::providers::UpstreamFormat;

const PROXY_USER_AGENT: &str = concat!("dialect-proxy/", env!("CARGO_PKG_VERSION"));
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Never copied from the inbound request.
const DENY_LIST: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
    "accept-encoding",
    "origin",
    "cookie",
    "authorization",
    "x-api-key",
    "x-goog-api-key",
];

/// How the API key is presented upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `x-api-key: <key>`
    XApiKey,
    /// `x-goog-api-key: <key>`
    GoogApiKey,
}

impl AuthScheme {
    pub fn for_format(format: UpstreamFormat) -> Self {
        match format {
            UpstreamFormat::Anthropic => Self::XApiKey,
            UpstreamFormat::OpenAI => Self::Bearer,
            UpstreamFormat::Gemini => Self::GoogApiKey,
        }
    }
}

pub fn is_header_denied(name: &HeaderName) -> bool {
    DENY_LIST.contains(&name.as_str())
}

/// Copy forwardable inbound headers and point `Host` at the upstream.
pub fn prepare_upstream_headers(inbound: &HeaderMap, target_host: &str) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len() + 2);
    for (name, value) in inbound {
        if !is_header_denied(name) {
            out.append(name.clone(), value.clone());
        }
    }

    if let Ok(host) = HeaderValue::from_str(target_host) {
        out.insert(header::HOST, host);
    }
    out.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    out
}

pub fn set_authentication_header(headers: &mut HeaderMap, api_key: &str, scheme: AuthScheme) -> Result<()> {
    let (name, raw) = match scheme {
        AuthScheme::Bearer => (header::AUTHORIZATION, format!("Bearer {api_key}")),
        AuthScheme::XApiKey => (HeaderName::from_static("x-api-key"), api_key.to_string()),
        AuthScheme::GoogApiKey => (HeaderName::from_static("x-goog-api-key"), api_key.to_string()),
    };

    let mut value = HeaderValue::from_str(&raw)
        .map_err(|_| ProxyError::config("API key contains characters not allowed in a header"))?;
    value.set_sensitive(true);
    headers.insert(name, value);
    Ok(())
}

/// Make the header set acceptable to the upstream dialect.
///
/// Claude upstreams keep the client's user agent and get a default
/// `anthropic-version`. Other upstreams see the proxy's own user agent and
/// no `anthropic-*` headers.
pub fn ensure_compatible_user_agent(headers: &mut HeaderMap, format: UpstreamFormat) {
    match format {
        UpstreamFormat::Anthropic => {
            if !headers.contains_key(header::USER_AGENT) {
                headers.insert(header::USER_AGENT, HeaderValue::from_static(PROXY_USER_AGENT));
            }
            let version = HeaderName::from_static("anthropic-version");
            if !headers.contains_key(&version) {
                headers.insert(version, HeaderValue::from_static(DEFAULT_ANTHROPIC_VERSION));
            }
        }
        UpstreamFormat::OpenAI | UpstreamFormat::Gemini => {
            let anthropic: Vec<HeaderName> = headers
                .keys()
                .filter(|name| name.as_str().starts_with("anthropic-"))
                .cloned()
                .collect();
            for name in anthropic {
                headers.remove(name);
            }
            headers.insert(header::USER_AGENT, HeaderValue::from_static(PROXY_USER_AGENT));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound() -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::HOST, HeaderValue::from_static("localhost:4222"));
        h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        h.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        h.insert("x-api-key", HeaderValue::from_static("client-secret"));
        h.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        h.insert("anthropic-beta", HeaderValue::from_static("tools-2024"));
        h.insert(header::USER_AGENT, HeaderValue::from_static("claude-cli/2.0"));
        h.insert("x-request-id", HeaderValue::from_static("abc"));
        h
    }

    #[test]
    fn test_prepare_strips_hop_by_hop_and_credentials() {
        let out = prepare_upstream_headers(&inbound(), "api.example.com");
        assert_eq!(out.get(header::HOST).unwrap(), "api.example.com");
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert!(out.get("x-api-key").is_none());
        assert_eq!(out.get("x-request-id").unwrap(), "abc");
        assert_eq!(out.get(header::CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_auth_schemes() {
        let mut h = HeaderMap::new();
        set_authentication_header(&mut h, "k1", AuthScheme::for_format(UpstreamFormat::OpenAI)).unwrap();
        assert_eq!(h.get(header::AUTHORIZATION).unwrap(), "Bearer k1");
        assert!(h.get(header::AUTHORIZATION).unwrap().is_sensitive());

        set_authentication_header(&mut h, "k2", AuthScheme::for_format(UpstreamFormat::Gemini)).unwrap();
        assert_eq!(h.get("x-goog-api-key").unwrap(), "k2");

        assert!(set_authentication_header(&mut h, "bad\nkey", AuthScheme::XApiKey).is_err());
    }

    #[test]
    fn test_user_agent_per_dialect() {
        let mut claude = prepare_upstream_headers(&inbound(), "api.anthropic.com");
        ensure_compatible_user_agent(&mut claude, UpstreamFormat::Anthropic);
        assert_eq!(claude.get(header::USER_AGENT).unwrap(), "claude-cli/2.0");
        assert_eq!(claude.get("anthropic-beta").unwrap(), "tools-2024");

        let mut openai = prepare_upstream_headers(&inbound(), "api.openai.com");
        ensure_compatible_user_agent(&mut openai, UpstreamFormat::OpenAI);
        assert_eq!(openai.get(header::USER_AGENT).unwrap(), PROXY_USER_AGENT);
        assert!(openai.get("anthropic-version").is_none());
        assert!(openai.get("anthropic-beta").is_none());

        let mut bare = HeaderMap::new();
        ensure_compatible_user_agent(&mut bare, UpstreamFormat::Anthropic);
        assert_eq!(bare.get("anthropic-version").unwrap(), DEFAULT_ANTHROPIC_VERSION);
    }
}
