// Asset data model: records, requests and the opaque host handle.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Model,
    Texture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Pending,
    Loading,
    Generating,
    Ready,
    Failed,
}

impl AssetStatus {
    /// Whether a record may move from `self` to `next`.
    ///
    /// Forward-only, except `Failed -> Pending` (retry) and
    /// `Ready -> Pending` (invalidation). A generation result is imported
    /// through the loader, hence `Generating -> Loading`.
    pub fn can_transition_to(self, next: AssetStatus) -> bool {
        use AssetStatus::*;
        matches!(
            (self, next),
            (Pending, Loading)
                | (Pending, Generating)
                | (Pending, Failed)
                | (Generating, Loading)
                | (Generating, Ready)
                | (Generating, Failed)
                | (Loading, Ready)
                | (Loading, Failed)
                | (Failed, Pending)
                | (Ready, Pending)
        )
    }

    /// A load or generation is outstanding for this record.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            AssetStatus::Loading | AssetStatus::Generating
        )
    }
}

/// Parameters for an external generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSpec {
    /// Command name sent to the service, e.g. `generate_model`.
    pub command: String,
    /// Command payload, passed through untouched.
    pub payload: serde_json::Value,
}

impl GenerationSpec {
    pub const MODEL_COMMAND: &'static str = "generate_model";
    pub const TEXTURE_SEARCH_COMMAND: &'static str = "search_textures";
    pub const TEXTURE_DOWNLOAD_COMMAND: &'static str = "download_texture";

    /// Text-to-model generation job.
    pub fn model(prompt: impl Into<String>) -> Self {
        Self {
            command: Self::MODEL_COMMAND.to_string(),
            payload: serde_json::json!({ "prompt": prompt.into() }),
        }
    }

    /// Texture download job with asset-type specific parameters.
    pub fn texture(category: &str, resolution: &str, format: &str) -> Self {
        Self {
            command: Self::TEXTURE_DOWNLOAD_COMMAND.to_string(),
            payload: serde_json::json!({
                "category": category,
                "resolution": resolution,
                "format": format,
            }),
        }
    }
}

/// Where an asset comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetSource {
    /// Direct load from a URL or local path.
    Url(String),
    /// Synthesised by the generation service, then imported.
    Generation(GenerationSpec),
}

impl AssetSource {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn is_generation(&self) -> bool {
        matches!(self, AssetSource::Generation(_))
    }
}

/// Opaque reference to a resource owned by the rendering host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetHandle {
    raw: u64,
    source: String,
}

impl AssetHandle {
    pub fn new(raw: u64, source: impl Into<String>) -> Self {
        Self {
            raw,
            source: source.into(),
        }
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// The URL or path this handle was loaded from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetRecord {
    pub id: String,
    pub kind: AssetKind,
    pub status: AssetStatus,
    pub source: AssetSource,
    /// Set once a generation job has been accepted by the service.
    pub job_id: Option<String>,
    /// Present iff `status == Ready`.
    pub handle: Option<AssetHandle>,
    pub ref_count: u32,
    /// Reason of the last failure, cleared on retry.
    pub error: Option<String>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl AssetRecord {
    pub fn new(id: impl Into<String>, kind: AssetKind, source: AssetSource) -> Self {
        let now = SystemTime::now();
        Self {
            id: id.into(),
            kind,
            status: AssetStatus::Pending,
            source,
            job_id: None,
            handle: None,
            ref_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == AssetStatus::Ready
    }
}

/// A request to make an asset ready. Consumed by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub id: String,
    /// Higher is served sooner.
    pub priority: i32,
    pub kind: AssetKind,
    pub source: AssetSource,
}

impl LoadRequest {
    pub fn url(id: impl Into<String>, kind: AssetKind, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            kind,
            source: AssetSource::Url(url.into()),
        }
    }

    pub fn generation(id: impl Into<String>, kind: AssetKind, spec: GenerationSpec) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            kind,
            source: AssetSource::Generation(spec),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Job status as reported by the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    InProgress,
    Done,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobAsset {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub assets: Vec<JobAsset>,
}

impl JobResult {
    /// Downloadable file for a finished job: `url`, else the first asset.
    pub fn primary_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or_else(|| self.assets.first().map(|a| a.url.as_str()))
    }
}

/// Snapshot of an external generation job.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationJob {
    pub job_id: String,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}
