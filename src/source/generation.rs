// HTTP/JSON client for the external asset generation service.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::GenerationService;
use crate::config::{AssetConfig, ReconnectConfig};
use crate::engine::record::{GenerationJob, GenerationSpec, JobAsset, JobResult, JobStatus};
use crate::error::{AssetError, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No request has succeeded or failed yet.
    Unknown,
    Connected,
    Reconnecting,
    /// The last request failed and no reconnect is running.
    Disconnected,
}

#[derive(Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
    payload: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct CommandResponse {
    #[serde(rename = "jobId", alias = "job_id")]
    job_id: String,
}

#[derive(Deserialize)]
struct JobResponse {
    status: String,
    #[serde(default)]
    result: Option<JobResult>,
    #[serde(default)]
    error: Option<String>,
}

/// Texture search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureQuery {
    pub category: String,
    pub resolution: String,
    pub format: String,
}

impl TextureQuery {
    /// Query in `category` using the configured default resolution and format.
    pub fn with_defaults(category: impl Into<String>, config: &AssetConfig) -> Self {
        Self {
            category: category.into(),
            resolution: config.textures.default_resolution.clone(),
            format: config.textures.default_format.clone(),
        }
    }

    pub fn search_spec(&self) -> GenerationSpec {
        GenerationSpec {
            command: GenerationSpec::TEXTURE_SEARCH_COMMAND.to_string(),
            ..GenerationSpec::texture(&self.category, &self.resolution, &self.format)
        }
    }

    pub fn download_spec(&self) -> GenerationSpec {
        GenerationSpec::texture(&self.category, &self.resolution, &self.format)
    }
}

/// Parse the service's human-readable status string.
pub fn parse_job_status(raw: &str) -> Option<JobStatus> {
    let normalized: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match normalized.as_str() {
        "submitted" | "queued" | "pending" => Some(JobStatus::Submitted),
        "inprogress" | "running" | "processing" => Some(JobStatus::InProgress),
        "done" | "completed" | "succeeded" => Some(JobStatus::Done),
        "failed" | "error" => Some(JobStatus::Failed),
        _ => None,
    }
}

/// Shared between the client and its background reconnect task.
struct Connection {
    connected: AtomicBool,
    reconnecting: AtomicBool,
    seen: AtomicBool,
    attempts: AtomicU32,
}

pub struct GenerationClient {
    client: Client,
    base_url: String,
    api_key: RwLock<Option<String>>,
    reconnect: ReconnectConfig,
    connection: Arc<Connection>,
    shutdown: CancellationToken,
}

impl GenerationClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        reconnect: ReconnectConfig,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: RwLock::new(api_key),
            reconnect,
            connection: Arc::new(Connection {
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                seen: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
            }),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn from_config(config: &AssetConfig) -> Result<Self> {
        Self::new(
            config.generation_base_url(),
            config.generation.api_key.clone(),
            config.reconnect.clone(),
            config.loader.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the credentials sent with every request.
    pub fn update_api_key(&self, api_key: Option<String>) {
        *self.api_key.write() = api_key;
    }

    pub fn connection_state(&self) -> ConnectionState {
        let c = &self.connection;
        if c.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else if c.reconnecting.load(Ordering::Acquire) {
            ConnectionState::Reconnecting
        } else if c.seen.load(Ordering::Acquire) {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Unknown
        }
    }

    /// Background reconnect attempts made since the last success.
    pub fn reconnect_attempts(&self) -> u32 {
        self.connection.attempts.load(Ordering::Acquire)
    }

    /// Check the service, retrying with exponential backoff. Returns the last
    /// error as soon as the final attempt fails.
    pub async fn connect(&self) -> Result<(), ServiceError> {
        let mut last = ServiceError::Connection("no attempt made".to_string());
        let attempts = self.reconnect.max_attempts.max(1);
        for attempt in 0..attempts {
            match self.health_check().await {
                Ok(()) => {
                    info!("generation service connected base_url={}", self.base_url);
                    return Ok(());
                }
                Err(e) if attempt + 1 == attempts => {
                    warn!(
                        "generation service connect failed (attempt {}): {}, giving up",
                        attempt, e
                    );
                    last = e;
                }
                Err(e) => {
                    let delay = self.reconnect.backoff(attempt);
                    warn!(
                        "generation service connect failed (attempt {}): {}, retrying in {:?}",
                        attempt, e, delay
                    );
                    last = e;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
            }
        }
        Err(last)
    }

    /// Stop any background reconnect loop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run a texture search job to completion and return the matches.
    pub async fn search_textures(
        &self,
        query: &TextureQuery,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Vec<JobAsset>, AssetError> {
        let label = format!("texture-search:{}", query.category);
        let job_id = self
            .submit(&query.search_spec())
            .await
            .map_err(|e| AssetError::from_service(&label, e))?;
        let polled = tokio::time::timeout(
            timeout,
            poll_until_finished(self, &label, &job_id, poll_interval),
        )
        .await
        .map_err(|_| AssetError::generation(&label, format!("job {} timed out", job_id)))?;
        Ok(polled?.assets)
    }

    fn build_request(&self, req: RequestBuilder) -> RequestBuilder {
        match self.api_key.read().as_deref() {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn mark_connected(&self) {
        let c = &self.connection;
        c.seen.store(true, Ordering::Release);
        c.attempts.store(0, Ordering::Release);
        if !c.connected.swap(true, Ordering::AcqRel) {
            debug!("generation service reachable");
        }
    }

    /// Record a transport failure and start a background reconnect loop.
    fn on_transport_error(&self, err: &reqwest::Error) -> ServiceError {
        let c = &self.connection;
        c.seen.store(true, Ordering::Release);
        c.connected.store(false, Ordering::Release);
        warn!("generation service transport error: {}", err);

        if !self.shutdown.is_cancelled() && !c.reconnecting.swap(true, Ordering::AcqRel) {
            let connection = Arc::clone(&self.connection);
            let health = self.build_request(self.client.get(format!("{}/health", self.base_url)));
            let reconnect = self.reconnect.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(reconnect_loop(connection, health, reconnect, shutdown));
        }
        ServiceError::Connection(err.to_string())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("generation service status={} body={}", status.as_u16(), body);
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))
    }
}

async fn reconnect_loop(
    connection: Arc<Connection>,
    health: RequestBuilder,
    reconnect: ReconnectConfig,
    shutdown: CancellationToken,
) {
    for attempt in 0..reconnect.max_attempts {
        connection.attempts.store(attempt + 1, Ordering::Release);
        let delay = reconnect.backoff(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }
        if connection.connected.load(Ordering::Acquire) {
            break;
        }
        let Some(req) = health.try_clone() else {
            break;
        };
        match req.send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("generation service reconnected after {} attempts", attempt + 1);
                connection.connected.store(true, Ordering::Release);
                break;
            }
            Ok(resp) => debug!("reconnect attempt {} status={}", attempt + 1, resp.status()),
            Err(e) => debug!("reconnect attempt {} failed: {}", attempt + 1, e),
        }
    }
    if !connection.connected.load(Ordering::Acquire) {
        warn!("generation service still unreachable, giving up reconnect");
    }
    connection.reconnecting.store(false, Ordering::Release);
}

#[async_trait]
impl GenerationService for GenerationClient {
    async fn submit(&self, spec: &GenerationSpec) -> Result<String, ServiceError> {
        let url = format!("{}/command", self.base_url);
        let body = CommandRequest {
            command: &spec.command,
            payload: &spec.payload,
        };
        let resp = self
            .build_request(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.on_transport_error(&e))?;
        self.mark_connected();

        let parsed: CommandResponse = self.read_json(resp).await?;
        if parsed.job_id.trim().is_empty() {
            return Err(ServiceError::Malformed("empty jobId".to_string()));
        }
        debug!("submitted command={} job={}", spec.command, parsed.job_id);
        Ok(parsed.job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<GenerationJob, ServiceError> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        let resp = self
            .build_request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| self.on_transport_error(&e))?;
        self.mark_connected();

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ServiceError::Rejected {
                status: 404,
                body: format!("unknown job {}", job_id),
            });
        }
        let parsed: JobResponse = self.read_json(resp).await?;
        let status = parse_job_status(&parsed.status).unwrap_or_else(|| {
            warn!("job {} has unrecognized status {:?}", job_id, parsed.status);
            JobStatus::InProgress
        });
        Ok(GenerationJob {
            job_id: job_id.to_string(),
            status,
            result: parsed.result,
            error: parsed.error,
        })
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .build_request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| {
                self.connection.seen.store(true, Ordering::Release);
                self.connection.connected.store(false, Ordering::Release);
                ServiceError::Connection(e.to_string())
            })?;
        if !resp.status().is_success() {
            self.connection.connected.store(false, Ordering::Release);
            return Err(ServiceError::Connection(format!(
                "health check returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        self.mark_connected();
        Ok(())
    }
}

/// Poll `job_id` every `interval` until it is done or failed.
///
/// Transient poll errors are logged and polling continues; callers bound
/// the wait with a timeout.
pub async fn poll_until_finished(
    service: &dyn GenerationService,
    asset_id: &str,
    job_id: &str,
    interval: Duration,
) -> Result<JobResult, AssetError> {
    loop {
        match service.poll(job_id).await {
            Ok(job) => match job.status {
                JobStatus::Done => return Ok(job.result.unwrap_or_default()),
                JobStatus::Failed => {
                    let reason = job
                        .error
                        .unwrap_or_else(|| format!("job {} reported failure", job_id));
                    return Err(AssetError::generation(asset_id, reason));
                }
                JobStatus::Submitted | JobStatus::InProgress => {
                    debug!("job {} for {}: {:?}", job_id, asset_id, job.status);
                }
            },
            Err(e) => warn!("poll of job {} for {} failed: {}", job_id, asset_id, e),
        }
        tokio::time::sleep(interval).await;
    }
}
