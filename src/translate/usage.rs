//! Token usage normalization across the three accounting dialects.
//!
//! Upstreams send plain JSON with no format tag, so [`UsageDialect::detect`]
//! sniffs by field presence. The per-dialect parsers never look at each
//! other's fields; swapping the sniffing for an explicit tag only touches
//! [`normalize`].
//!
//! `input_tokens` on [`CanonicalUsage`] is always the billable (non-cached)
//! portion. Cache counts are reported alongside, never folded back in.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::anthropic_types::Usage;

/// Claude cache-creation duration bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheTtl {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "mixed")]
    Mixed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_5m_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_1h_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<CacheTtl>,
    /// OpenAI-style `cached_tokens` detail, mirrored for cross-format consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDialect {
    Claude,
    Gemini,
    /// Chat Completions and Responses share this shape.
    OpenAI,
}

impl UsageDialect {
    /// Field-presence sniffing in fixed priority order.
    ///
    /// An OpenAI-compatible upstream that emits `cache_read_input_tokens` is
    /// read as Claude. There is no tag to tell them apart.
    pub fn detect(raw: &Value) -> Self {
        if raw.get("cache_creation_input_tokens").is_some()
            || raw.get("cache_read_input_tokens").is_some()
        {
            Self::Claude
        } else if raw.get("promptTokenCount").is_some() {
            Self::Gemini
        } else {
            Self::OpenAI
        }
    }
}

/// Normalize a raw usage object of any supported dialect.
pub fn normalize(raw: &Value) -> CanonicalUsage {
    normalize_as(UsageDialect::detect(raw), raw)
}

pub fn normalize_as(dialect: UsageDialect, raw: &Value) -> CanonicalUsage {
    match dialect {
        UsageDialect::Claude => from_claude(raw),
        UsageDialect::Gemini => from_gemini(raw),
        UsageDialect::OpenAI => from_openai(raw),
    }
}

fn from_claude(raw: &Value) -> CanonicalUsage {
    let input = count(raw, "input_tokens").unwrap_or(0);
    let output = count(raw, "output_tokens").unwrap_or(0);
    let cache_read = count(raw, "cache_read_input_tokens");

    let five_min = count(raw, "cache_creation_5m_input_tokens")
        .or_else(|| nested_count(raw, "/cache_creation/ephemeral_5m_input_tokens"));
    let one_hour = count(raw, "cache_creation_1h_input_tokens")
        .or_else(|| nested_count(raw, "/cache_creation/ephemeral_1h_input_tokens"));

    let cache_ttl = match (five_min.unwrap_or(0) > 0, one_hour.unwrap_or(0) > 0) {
        (true, true) => Some(CacheTtl::Mixed),
        (true, false) => Some(CacheTtl::FiveMinutes),
        (false, true) => Some(CacheTtl::OneHour),
        (false, false) => None,
    };

    CanonicalUsage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: count(raw, "total_tokens").unwrap_or(input + output),
        cache_read_tokens: cache_read,
        cache_creation_tokens: count(raw, "cache_creation_input_tokens"),
        cache_creation_5m_tokens: five_min,
        cache_creation_1h_tokens: one_hour,
        cache_ttl,
        cached_tokens: cache_read,
        reasoning_tokens: None,
    }
}

fn from_openai(raw: &Value) -> CanonicalUsage {
    let prompt = count(raw, "input_tokens")
        .or_else(|| count(raw, "prompt_tokens"))
        .unwrap_or(0);
    let output = count(raw, "output_tokens")
        .or_else(|| count(raw, "completion_tokens"))
        .unwrap_or(0);
    let cached = nested_count(raw, "/input_tokens_details/cached_tokens")
        .or_else(|| nested_count(raw, "/prompt_tokens_details/cached_tokens"));
    let reasoning = nested_count(raw, "/output_tokens_details/reasoning_tokens")
        .or_else(|| nested_count(raw, "/completion_tokens_details/reasoning_tokens"));

    let input = prompt.saturating_sub(cached.unwrap_or(0));

    CanonicalUsage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: count(raw, "total_tokens").unwrap_or(input + output),
        cache_read_tokens: cached,
        cached_tokens: cached,
        reasoning_tokens: reasoning,
        ..CanonicalUsage::default()
    }
}

fn from_gemini(raw: &Value) -> CanonicalUsage {
    // promptTokenCount already includes the cached content
    let prompt = count(raw, "promptTokenCount").unwrap_or(0);
    let cached = count(raw, "cachedContentTokenCount");
    let output = count(raw, "candidatesTokenCount").unwrap_or(0);
    let input = prompt.saturating_sub(cached.unwrap_or(0));

    CanonicalUsage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: count(raw, "totalTokenCount").unwrap_or(input + output),
        cache_read_tokens: cached,
        cached_tokens: cached,
        reasoning_tokens: count(raw, "thoughtsTokenCount"),
        ..CanonicalUsage::default()
    }
}

fn count(raw: &Value, key: &str) -> Option<u64> {
    raw.get(key).and_then(Value::as_u64)
}

fn nested_count(raw: &Value, pointer: &str) -> Option<u64> {
    raw.pointer(pointer).and_then(Value::as_u64)
}

impl CanonicalUsage {
    /// Claude-shaped usage for responses and stream events.
    pub fn to_claude(&self) -> Usage {
        Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_creation_input_tokens: self.cache_creation_tokens,
            cache_read_input_tokens: self.cache_read_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_priority() {
        assert_eq!(
            UsageDialect::detect(&json!({"input_tokens": 1, "cache_read_input_tokens": 0})),
            UsageDialect::Claude
        );
        assert_eq!(
            UsageDialect::detect(&json!({"promptTokenCount": 3})),
            UsageDialect::Gemini
        );
        assert_eq!(
            UsageDialect::detect(&json!({"prompt_tokens": 3})),
            UsageDialect::OpenAI
        );
    }

    #[test]
    fn test_claude_mixed_ttl() {
        let usage = normalize(&json!({
            "input_tokens": 10,
            "output_tokens": 5,
            "cache_creation_input_tokens": 30,
            "cache_creation_5m_input_tokens": 10,
            "cache_creation_1h_input_tokens": 20,
            "cache_read_input_tokens": 7
        }));
        assert_eq!(usage.cache_ttl, Some(CacheTtl::Mixed));
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.total_tokens, 15);
        assert_eq!(usage.cache_read_tokens, Some(7));
        assert_eq!(usage.cached_tokens, Some(7));
        assert_eq!(usage.cache_creation_tokens, Some(30));
    }

    #[test]
    fn test_claude_single_ttl_and_none() {
        let one_hour = normalize(&json!({
            "input_tokens": 1,
            "cache_creation_input_tokens": 4,
            "cache_creation_5m_input_tokens": 0,
            "cache_creation_1h_input_tokens": 4
        }));
        assert_eq!(one_hour.cache_ttl, Some(CacheTtl::OneHour));

        let nested = normalize(&json!({
            "input_tokens": 1,
            "cache_creation_input_tokens": 4,
            "cache_creation": {"ephemeral_5m_input_tokens": 4}
        }));
        assert_eq!(nested.cache_ttl, Some(CacheTtl::FiveMinutes));

        let untagged = normalize(&json!({"input_tokens": 1, "cache_creation_input_tokens": 4}));
        assert_eq!(untagged.cache_ttl, None);
    }

    #[test]
    fn test_openai_cached_tokens_subtracted() {
        let usage = normalize(&json!({
            "prompt_tokens": 100,
            "completion_tokens": 20,
            "prompt_tokens_details": {"cached_tokens": 60}
        }));
        assert_eq!(usage.input_tokens, 40);
        assert_eq!(usage.total_tokens, 60);
        assert_eq!(usage.cached_tokens, Some(60));
    }

    #[test]
    fn test_openai_explicit_total_kept_and_clamped() {
        let usage = normalize(&json!({
            "input_tokens": 5,
            "output_tokens": 2,
            "total_tokens": 99,
            "input_tokens_details": {"cached_tokens": 8},
            "output_tokens_details": {"reasoning_tokens": 1}
        }));
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.total_tokens, 99);
        assert_eq!(usage.reasoning_tokens, Some(1));
    }

    #[test]
    fn test_gemini_cached_content_subtracted() {
        let usage = normalize(&json!({
            "promptTokenCount": 50,
            "cachedContentTokenCount": 20,
            "candidatesTokenCount": 9,
            "thoughtsTokenCount": 3
        }));
        assert_eq!(usage.input_tokens, 30);
        assert_eq!(usage.output_tokens, 9);
        assert_eq!(usage.total_tokens, 39);
        assert_eq!(usage.reasoning_tokens, Some(3));

        let clamped = normalize(&json!({"promptTokenCount": 5, "cachedContentTokenCount": 9}));
        assert_eq!(clamped.input_tokens, 0);
    }

    #[test]
    fn test_to_claude_keeps_cache_fields_separate() {
        let usage = normalize(&json!({
            "input_tokens": 3,
            "output_tokens": 4,
            "cache_read_input_tokens": 100
        }));
        let claude = usage.to_claude();
        assert_eq!(claude.input_tokens, 3);
        assert_eq!(claude.cache_read_input_tokens, Some(100));
        assert_eq!(claude.cache_creation_input_tokens, None);
    }
}
