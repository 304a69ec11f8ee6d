use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::record::AssetKind;
use crate::error::ConfigError;

/// Default address of the design-tool bridge (generation service).
pub const DEFAULT_MCP_BASE_URL: &str = "http://127.0.0.1:9876";

/// Capacity of the status event broadcast buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Top-level configuration for the asset engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub mcp: McpConfig,
    pub generation: GenerationConfig,
    pub textures: TextureConfig,
    pub export: ExportConfig,
    pub loader: LoaderConfig,
    pub reconnect: ReconnectConfig,
    pub lod: LodConfig,
    /// Per-entity asset source selection, keyed by entity name.
    pub entities: BTreeMap<String, EntityAssetSource>,
    /// Root directory for local asset paths.
    pub asset_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub enabled: bool,
    pub connect_on_start: bool,
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Disabled,
    Remote,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub mode: GenerationMode,
    /// Falls back to `mcp.base_url` when unset.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionProfile {
    None,
    Etc1s,
    Uastc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    pub default_resolution: String,
    pub default_format: String,
    pub compression_profile: CompressionProfile,
    /// 1..=255
    pub compression_quality: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Geometry ratio per LOD level, highest detail first.
    pub lod_ratios: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub max_concurrency: usize,
    pub poll_interval_ms: u64,
    pub generation_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub event_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Viewer distances at which detail drops one level, increasing.
    pub distances: Vec<f32>,
}

fn default_kind() -> AssetKind {
    AssetKind::Model
}

/// How one game entity obtains its asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum EntityAssetSource {
    Local {
        path: String,
        #[serde(default = "default_kind")]
        kind: AssetKind,
        #[serde(default)]
        priority: i32,
    },
    Generated {
        prompt: String,
        #[serde(default = "default_kind")]
        kind: AssetKind,
        #[serde(default)]
        priority: i32,
    },
    /// Built-in primitive; nothing to load.
    Procedural,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            connect_on_start: false,
            base_url: DEFAULT_MCP_BASE_URL.to_string(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            mode: GenerationMode::Remote,
            base_url: None,
            api_key: None,
        }
    }
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            default_resolution: "1k".to_string(),
            default_format: "jpg".to_string(),
            compression_profile: CompressionProfile::Etc1s,
            compression_quality: 128,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            lod_ratios: vec![1.0, 0.5, 0.25],
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            poll_interval_ms: 1000,
            generation_timeout_ms: 120_000,
            request_timeout_ms: 30_000,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_attempts: 8,
        }
    }
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            distances: vec![30.0, 80.0],
        }
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            mcp: McpConfig::default(),
            generation: GenerationConfig::default(),
            textures: TextureConfig::default(),
            export: ExportConfig::default(),
            loader: LoaderConfig::default(),
            reconnect: ReconnectConfig::default(),
            lod: LodConfig::default(),
            entities: BTreeMap::new(),
            asset_root: None,
        }
    }
}

impl LoaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (0-based): doubling, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl AssetConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Deep-merge a runtime override object and re-validate.
    pub fn with_overrides(&self, overrides: serde_json::Value) -> Result<Self, ConfigError> {
        let mut base = serde_json::to_value(self)?;
        merge_json(&mut base, overrides);
        let config: Self = serde_json::from_value(base)?;
        config.validate()?;
        Ok(config)
    }

    /// Base URL of the generation service.
    pub fn generation_base_url(&self) -> &str {
        self.generation
            .base_url
            .as_deref()
            .unwrap_or(&self.mcp.base_url)
    }

    /// Whether generation jobs may be submitted at all.
    pub fn generation_enabled(&self) -> bool {
        self.mcp.enabled && self.generation.mode != GenerationMode::Disabled
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mcp.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("mcp.base_url", "must not be empty"));
        }
        if !is_http_url(self.generation_base_url()) {
            return Err(ConfigError::invalid(
                "generation.base_url",
                format!("not an http(s) url: {}", self.generation_base_url()),
            ));
        }
        if self.textures.compression_quality == 0 {
            return Err(ConfigError::invalid(
                "textures.compression_quality",
                "must be in 1..=255",
            ));
        }

        let ratios = &self.export.lod_ratios;
        if ratios.is_empty() {
            return Err(ConfigError::invalid("export.lod_ratios", "must not be empty"));
        }
        if ratios.iter().any(|r| !(*r > 0.0 && *r <= 1.0)) {
            return Err(ConfigError::invalid("export.lod_ratios", "each ratio must be in (0, 1]"));
        }
        if ratios.windows(2).any(|w| w[1] > w[0]) {
            return Err(ConfigError::invalid("export.lod_ratios", "must be non-increasing"));
        }

        if self.lod.distances.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ConfigError::invalid("lod.distances", "must be strictly increasing"));
        }
        if self.lod.distances.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(ConfigError::invalid("lod.distances", "must be finite and non-negative"));
        }

        let loader = &self.loader;
        if loader.max_concurrency == 0 {
            return Err(ConfigError::invalid("loader.max_concurrency", "must be at least 1"));
        }
        if loader.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("loader.poll_interval_ms", "must be > 0"));
        }
        if loader.generation_timeout_ms < loader.poll_interval_ms {
            return Err(ConfigError::invalid(
                "loader.generation_timeout_ms",
                "must be at least the poll interval",
            ));
        }
        if loader.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("loader.request_timeout_ms", "must be > 0"));
        }

        if self.reconnect.initial_backoff_ms == 0
            || self.reconnect.max_backoff_ms < self.reconnect.initial_backoff_ms
        {
            return Err(ConfigError::invalid(
                "reconnect",
                "need 0 < initial_backoff_ms <= max_backoff_ms",
            ));
        }

        for (name, source) in &self.entities {
            match source {
                EntityAssetSource::Local { path, .. } if path.trim().is_empty() => {
                    return Err(ConfigError::invalid(
                        "entities",
                        format!("entity {} has an empty path", name),
                    ));
                }
                EntityAssetSource::Generated { prompt, .. } if prompt.trim().is_empty() => {
                    return Err(ConfigError::invalid(
                        "entities",
                        format!("entity {} has an empty prompt", name),
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn merge_json(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
