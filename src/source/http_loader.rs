use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder};
use tracing::{debug, info, warn};

use super::traits::{AssetLoader, HandleDisposer};
use crate::detect::format::{validate_asset, AssetFormat};
use crate::engine::record::{AssetHandle, AssetKind};

/// Bytes of one loaded asset, held until its handle is disposed.
#[derive(Debug, Clone)]
pub struct LoadedResource {
    pub url: String,
    pub kind: AssetKind,
    pub format: AssetFormat,
    pub bytes: Bytes,
}

/// Default engine loader: fetches over HTTP or from disk, validates the
/// container header, and keeps the bytes in a resource table keyed by the
/// handle's raw value. The rendering host reads resources by handle.
pub struct HttpAssetLoader {
    client: Client,
    headers: RwLock<HashMap<String, String>>,
    asset_root: Option<PathBuf>,
    resources: RwLock<HashMap<u64, LoadedResource>>,
    next_raw: AtomicU64,
}

impl HttpAssetLoader {
    pub fn new(asset_root: Option<PathBuf>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            headers: RwLock::new(HashMap::new()),
            asset_root,
            resources: RwLock::new(HashMap::new()),
            next_raw: AtomicU64::new(1),
        })
    }

    /// Replace the headers sent with every HTTP request.
    pub fn update_headers(&self, headers: HashMap<String, String>) {
        *self.headers.write() = headers;
    }

    pub fn resource(&self, handle: &AssetHandle) -> Option<LoadedResource> {
        self.resources.read().get(&handle.raw()).cloned()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.read().len()
    }

    fn build_request(&self, url: &str) -> RequestBuilder {
        let headers = self.headers.read().clone();
        let mut req = self.client.get(url);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    /// Map a `file://` URL or plain path onto the filesystem.
    fn resolve_local(&self, url: &str) -> PathBuf {
        let path = url.strip_prefix("file://").unwrap_or(url);
        match &self.asset_root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => Path::new(path).to_path_buf(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let resp = self.build_request(url).send().await?;
            let status = resp.status();
            if !status.is_success() {
                warn!("asset fetch failed status={} url={}", status.as_u16(), url);
                return Err(anyhow!("fetch failed: HTTP {}", status.as_u16()));
            }
            let bytes = resp.bytes().await?;
            debug!("fetched {} bytes from {}", bytes.len(), url);
            Ok(bytes)
        } else {
            let path = self.resolve_local(url);
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            debug!("read {} bytes from {}", data.len(), path.display());
            Ok(Bytes::from(data))
        }
    }
}

#[async_trait]
impl AssetLoader for HttpAssetLoader {
    async fn load(&self, kind: AssetKind, url: &str) -> Result<AssetHandle> {
        let bytes = self.fetch(url).await?;
        let format = validate_asset(&bytes, kind).with_context(|| format!("validating {}", url))?;

        let raw = self.next_raw.fetch_add(1, Ordering::Relaxed);
        info!(
            "loaded {:?} asset url={} format={:?} bytes={} handle={}",
            kind,
            url,
            format,
            bytes.len(),
            raw
        );
        self.resources.write().insert(
            raw,
            LoadedResource {
                url: url.to_string(),
                kind,
                format,
                bytes,
            },
        );
        Ok(AssetHandle::new(raw, url))
    }
}

impl HandleDisposer for HttpAssetLoader {
    fn dispose(&self, id: &str, handle: AssetHandle) {
        if self.resources.write().remove(&handle.raw()).is_none() {
            warn!("dispose of {}: handle {} not in resource table", id, handle.raw());
        }
    }
}
