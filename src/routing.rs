//! Per-request routing inputs: where to send, and what model to ask for.

use std::collections::HashMap;

/// Resolved routing for one upstream. Built once from config and only read.
#[derive(Debug, Clone, Default)]
pub struct RoutingConfig {
    base_url: String,
    models: HashMap<String, String>,
}

impl RoutingConfig {
    pub fn new(base_url: impl Into<String>, models: HashMap<String, String>) -> Self {
        Self {
            base_url: base_url.into(),
            models,
        }
    }

    #[must_use]
    pub fn effective_base_url(&self) -> &str {
        &self.base_url
    }

    /// Map a client-facing model name to the upstream one. Unmapped names pass through.
    #[must_use]
    pub fn redirect_model(&self, name: &str) -> String {
        self.models
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    #[must_use]
    pub fn has_redirects(&self) -> bool {
        !self.models.is_empty()
    }

    #[must_use]
    pub fn models(&self) -> &HashMap<String, String> {
        &self.models
    }
}
