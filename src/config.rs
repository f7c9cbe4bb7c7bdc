use crate::error::{ProxyError, Result};
use crate::providers::{ProviderPreset, UpstreamFormat};
use crate::routing::RoutingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "dialect-proxy";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub provider: ProviderConfig,
    /// Model redirect table: client model name -> upstream model name.
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub params: ParamsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<UpstreamFormat>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamsConfig {
    /// Top-level request keys removed before a passthrough forward.
    #[serde(default)]
    pub drop: Vec<String>,
}

fn default_port() -> u16 {
    4222
}

fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

impl ProxyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(ProxyError::config(format!(
            "No config file found. Searched: {}. Create one from config.example.toml",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Resolve the effective base URL (config override or provider preset default)
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.provider.base_url {
            return Ok(url.clone());
        }

        let preset = ProviderPreset::from_name(&self.provider.name).ok_or_else(|| {
            ProxyError::config(format!(
                "Unknown provider '{}' and no base_url configured. Known providers: {}",
                self.provider.name,
                ProviderPreset::all()
                    .iter()
                    .map(|p| p.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.provider.api_key_env).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{}' not set. Set it with your provider API key.",
                self.provider.api_key_env
            ))
        })
    }

    /// The upstream dialect: explicit `format`, else the preset's, else `OpenAI`.
    #[must_use]
    pub fn upstream_format(&self) -> UpstreamFormat {
        if let Some(format) = self.provider.format {
            return format;
        }

        ProviderPreset::from_name(&self.provider.name)
            .map_or(UpstreamFormat::OpenAI, |p| p.format)
    }

    pub fn routing(&self) -> Result<RoutingConfig> {
        Ok(RoutingConfig::new(
            self.effective_base_url()?,
            self.models.clone(),
        ))
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from(format!("{APP_DIR}.toml")));

    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join(APP_DIR)
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join(APP_DIR).join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join(APP_DIR).join("config.toml"));
        }
    }

    if let Some(home) = dirs_path() {
        paths.push(home.join(format!(".{APP_DIR}.toml")));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
