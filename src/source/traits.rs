use anyhow::Result;
use async_trait::async_trait;

use crate::engine::record::{AssetHandle, AssetKind, GenerationJob, GenerationSpec};
use crate::error::ServiceError;

/// Host engine loader: turns a URL or path into a handle usable by the renderer.
#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn load(&self, kind: AssetKind, url: &str) -> Result<AssetHandle>;
}

/// Releases a host resource once its last holder lets go.
pub trait HandleDisposer: Send + Sync {
    fn dispose(&self, id: &str, handle: AssetHandle);
}

/// Asynchronous asset generation service (submit -> poll -> fetch).
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Submit a job; returns the service-assigned job id.
    async fn submit(&self, spec: &GenerationSpec) -> Result<String, ServiceError>;

    async fn poll(&self, job_id: &str) -> Result<GenerationJob, ServiceError>;

    /// Reachability check.
    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Supplies a stand-in handle when an asset cannot be produced.
pub trait PlaceholderProvider: Send + Sync {
    fn placeholder(&self, id: &str, kind: AssetKind) -> AssetHandle;
}
