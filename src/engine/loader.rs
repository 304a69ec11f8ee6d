// Progressive loader: priority-ordered queue drained with bounded concurrency.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{AssetCache, ReleaseOutcome};
use super::events::{StatusEvent, StatusEventKind, StatusEvents};
use super::record::{
    AssetHandle, AssetKind, AssetRecord, AssetSource, AssetStatus, GenerationSpec, LoadRequest,
};
use super::registry::StatusExtra;
use super::stats::{LoaderStats, LoaderStatsSnapshot};
use crate::config::LoaderConfig;
use crate::error::AssetError;
use crate::source::generation::poll_until_finished;
use crate::source::placeholder::ProceduralPlaceholders;
use crate::source::traits::{AssetLoader, GenerationService, HandleDisposer, PlaceholderProvider};

type Waiter = oneshot::Sender<Result<AssetRecord, AssetError>>;

/// A request waiting for a worker slot.
struct QueuedRequest {
    priority: i32,
    seq: u64,
    id: String,
    kind: AssetKind,
    source: AssetSource,
}

// Max-heap: higher priority first, then lower sequence number (FIFO).
impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

struct LoaderState {
    cache: AssetCache,
    queue: BinaryHeap<QueuedRequest>,
    /// One entry per queued or running id. Present iff work is outstanding.
    waiters: HashMap<String, Vec<Waiter>>,
    active: usize,
    next_seq: u64,
    events: StatusEvents,
}

struct Inner {
    config: LoaderConfig,
    state: Mutex<LoaderState>,
    loader: Arc<dyn AssetLoader>,
    disposer: Arc<dyn HandleDisposer>,
    generation: Option<Arc<dyn GenerationService>>,
    placeholders: Arc<dyn PlaceholderProvider>,
    stats: LoaderStats,
    shutdown: CancellationToken,
}

type Delivery = oneshot::Receiver<Result<AssetRecord, AssetError>>;

enum Admission {
    /// Ready at admission; the reference is taken on first poll.
    Ready(LoadRequest),
    Waiting(Delivery),
}

enum Claim {
    Held(AssetRecord),
    Waiting(Delivery),
}

/// Outcome of [`ProgressiveLoader::enqueue_or_placeholder`].
#[derive(Debug, Clone)]
pub enum Resolution {
    Loaded(AssetRecord),
    /// The asset failed; `handle` is a stand-in owned by the placeholder provider.
    Placeholder {
        id: String,
        handle: AssetHandle,
        error: AssetError,
    },
}

impl Resolution {
    pub fn handle(&self) -> Option<&AssetHandle> {
        match self {
            Resolution::Loaded(record) => record.handle.as_ref(),
            Resolution::Placeholder { handle, .. } => Some(handle),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Resolution::Placeholder { .. })
    }
}

pub struct LoaderBuilder {
    config: LoaderConfig,
    loader: Arc<dyn AssetLoader>,
    disposer: Arc<dyn HandleDisposer>,
    generation: Option<Arc<dyn GenerationService>>,
    placeholders: Arc<dyn PlaceholderProvider>,
}

impl LoaderBuilder {
    pub fn generation(mut self, service: Arc<dyn GenerationService>) -> Self {
        self.generation = Some(service);
        self
    }

    pub fn placeholders(mut self, provider: Arc<dyn PlaceholderProvider>) -> Self {
        self.placeholders = provider;
        self
    }

    pub fn build(self) -> ProgressiveLoader {
        let capacity = self.config.event_capacity;
        ProgressiveLoader {
            inner: Arc::new(Inner {
                state: Mutex::new(LoaderState {
                    cache: AssetCache::new(self.disposer.clone()),
                    queue: BinaryHeap::new(),
                    waiters: HashMap::new(),
                    active: 0,
                    next_seq: 0,
                    events: StatusEvents::new(capacity),
                }),
                config: self.config,
                loader: self.loader,
                disposer: self.disposer,
                generation: self.generation,
                placeholders: self.placeholders,
                stats: LoaderStats::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

/// Turns [`LoadRequest`]s into ready [`AssetRecord`]s.
///
/// All registry, cache and queue mutation happens under one mutex that is
/// never held across an await, so state transitions are atomic with respect
/// to each other. Work is spawned on the ambient tokio runtime; `enqueue`
/// must be called from within one.
#[derive(Clone)]
pub struct ProgressiveLoader {
    inner: Arc<Inner>,
}

impl ProgressiveLoader {
    pub fn builder(
        config: LoaderConfig,
        loader: Arc<dyn AssetLoader>,
        disposer: Arc<dyn HandleDisposer>,
    ) -> LoaderBuilder {
        LoaderBuilder {
            config,
            loader,
            disposer,
            generation: None,
            placeholders: Arc::new(ProceduralPlaceholders),
        }
    }

    /// Request an asset. Admission happens immediately; the returned future
    /// resolves once the asset is ready or has failed.
    ///
    /// A ready asset resolves at once. An id already queued or running
    /// attaches to that work. A failed id is reset to pending and retried
    /// with the new source. Every successful resolution holds one reference
    /// for its caller; dropping the future before it resolves gives up the
    /// claim without taking a reference.
    pub fn enqueue(
        &self,
        request: LoadRequest,
    ) -> impl Future<Output = Result<AssetRecord, AssetError>> + Send + 'static {
        let id = request.id.clone();
        let inner = Arc::clone(&self.inner);
        let admission = inner.admit(request);
        async move {
            let rx = match admission? {
                Admission::Ready(request) => match inner.claim(request)? {
                    Claim::Held(record) => return Ok(record),
                    Claim::Waiting(rx) => rx,
                },
                Admission::Waiting(rx) => rx,
            };
            rx.await.unwrap_or(Err(AssetError::Cancelled { id }))
        }
    }

    /// Like [`enqueue`](Self::enqueue), but a failure degrades to a
    /// placeholder and publishes a `FellBack` event instead of erroring.
    pub fn enqueue_or_placeholder(
        &self,
        request: LoadRequest,
    ) -> impl Future<Output = Resolution> + Send + 'static {
        let id = request.id.clone();
        let kind = request.kind;
        let pending = self.enqueue(request);
        let inner = Arc::clone(&self.inner);
        async move {
            match pending.await {
                Ok(record) => Resolution::Loaded(record),
                Err(error) => inner.fall_back(id, kind, error),
            }
        }
    }

    /// Hand out a placeholder for `id` in place of a failed or skipped
    /// asset, publishing `FellBack`.
    pub fn fall_back(
        &self,
        id: impl Into<String>,
        kind: AssetKind,
        error: AssetError,
    ) -> Resolution {
        self.inner.fall_back(id.into(), kind, error)
    }

    /// Add a holder to a ready asset.
    pub fn retain(&self, id: &str) -> Result<u32, AssetError> {
        self.inner.state.lock().cache.retain(id)
    }

    /// Drop a holder. When the count reaches zero the handle is disposed and,
    /// with `evict`, the record is removed from the registry.
    pub fn release(&self, id: &str, evict: bool) -> Result<ReleaseOutcome, AssetError> {
        let mut state = self.inner.state.lock();
        let outcome = state.cache.release(id)?;
        if outcome == ReleaseOutcome::Disposed {
            state.events.publish(id, StatusEventKind::Disposed, None);
            if evict && state.cache.evict(id) {
                state.events.publish(id, StatusEventKind::Removed, None);
            }
        }
        Ok(outcome)
    }

    /// Remove an unreferenced, idle record.
    pub fn evict(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        if state.waiters.contains_key(id) {
            return false;
        }
        let removed = state.cache.evict(id);
        if removed {
            state.events.publish(id, StatusEventKind::Removed, None);
        }
        removed
    }

    /// Withdraw a request that has not started yet. Its callers receive
    /// `Cancelled`. Returns false if the id is unknown or already running.
    pub fn withdraw(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let queued = state
            .cache
            .registry()
            .get(id)
            .is_some_and(|r| r.status == AssetStatus::Pending)
            && state.waiters.contains_key(id);
        if !queued {
            return false;
        }

        state.queue.retain(|q| q.id != id);
        let waiters = state.waiters.remove(id).unwrap_or_default();
        state.cache.registry_mut().remove(id);
        state.events.publish(id, StatusEventKind::Removed, None);
        drop(state);

        debug!("withdrew queued request {}", id);
        for waiter in waiters {
            let _ = waiter.send(Err(AssetError::Cancelled { id: id.to_string() }));
        }
        true
    }

    /// Stop polling, cancel queued work and refuse new requests.
    ///
    /// Running loads observe the cancellation at their next suspension point.
    /// Remote generation jobs are not aborted on the service side.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut state = self.inner.state.lock();
        let queued: Vec<QueuedRequest> = state.queue.drain().collect();
        let mut cancelled = Vec::new();
        for request in queued {
            let _ = state.cache.registry_mut().set_status(
                &request.id,
                AssetStatus::Failed,
                StatusExtra::error("loader shut down"),
            );
            if let Some(waiters) = state.waiters.remove(&request.id) {
                cancelled.push((request.id, waiters));
            }
        }
        drop(state);

        info!("loader shutdown: cancelled {} queued requests", cancelled.len());
        for (id, waiters) in cancelled {
            for waiter in waiters {
                let _ = waiter.send(Err(AssetError::Cancelled { id: id.clone() }));
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.state.lock().events.subscribe()
    }

    pub fn record(&self, id: &str) -> Option<AssetRecord> {
        self.inner.state.lock().cache.registry().get(id).cloned()
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.inner.state.lock().cache.is_loaded(id)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn active_len(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn stats(&self) -> LoaderStatsSnapshot {
        let pending = self.pending_len();
        self.inner.stats.snapshot(pending)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }
}

impl Inner {
    fn admit(self: &Arc<Self>, request: LoadRequest) -> Result<Admission, AssetError> {
        if self.shutdown.is_cancelled() {
            return Err(AssetError::Cancelled { id: request.id });
        }

        let mut state = self.state.lock();
        if state.cache.is_loaded(&request.id) {
            self.stats.record_dedup_hit();
            debug!("enqueue {}: already ready", request.id);
            return Ok(Admission::Ready(request));
        }
        self.queue_or_attach(&mut state, request).map(Admission::Waiting)
    }

    /// Take the caller's reference on an asset that was ready at admission.
    fn claim(self: &Arc<Self>, request: LoadRequest) -> Result<Claim, AssetError> {
        if self.shutdown.is_cancelled() {
            return Err(AssetError::Cancelled { id: request.id });
        }

        let mut state = self.state.lock();
        if state.cache.is_loaded(&request.id) {
            state.cache.retain(&request.id)?;
            let record = state
                .cache
                .registry()
                .get(&request.id)
                .cloned()
                .ok_or_else(|| AssetError::unknown(&request.id))?;
            return Ok(Claim::Held(record));
        }
        // Disposed between admission and the first poll.
        debug!("enqueue {}: no longer ready, reloading", request.id);
        self.queue_or_attach(&mut state, request).map(Claim::Waiting)
    }

    /// Attach to outstanding work for the id, or queue a new attempt.
    fn queue_or_attach(
        self: &Arc<Self>,
        state: &mut LoaderState,
        request: LoadRequest,
    ) -> Result<Delivery, AssetError> {
        let id = request.id.clone();
        let existing = state.cache.registry().get(&id).map(|r| r.status);
        match existing {
            Some(status) if state.waiters.contains_key(&id) => {
                self.stats.record_dedup_hit();
                debug!("enqueue {}: attaching to in-flight request ({:?})", id, status);
                let (tx, rx) = oneshot::channel();
                if let Some(waiters) = state.waiters.get_mut(&id) {
                    waiters.push(tx);
                }
                return Ok(rx);
            }
            Some(_) => {
                // Failed, or pending after invalidation with nothing queued.
                state.cache.registry_mut().retry(&id, request.source.clone())?;
                info!("enqueue {}: retrying", id);
            }
            None => {
                state
                    .cache
                    .registry_mut()
                    .register(&id, request.kind, request.source.clone());
            }
        }
        state
            .events
            .publish(&id, StatusEventKind::Status(AssetStatus::Pending), None);

        let kind = state
            .cache
            .registry()
            .get(&id)
            .map(|r| r.kind)
            .unwrap_or(request.kind);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(QueuedRequest {
            priority: request.priority,
            seq,
            id: id.clone(),
            kind,
            source: request.source,
        });
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id, vec![tx]);

        self.drain(state);
        Ok(rx)
    }

    fn fall_back(&self, id: String, kind: AssetKind, error: AssetError) -> Resolution {
        let handle = self.placeholders.placeholder(&id, kind);
        self.stats.record_fallback();
        warn!("asset {} fell back to placeholder: {}", id, error);
        self.state
            .lock()
            .events
            .publish(&id, StatusEventKind::FellBack, Some(error.reason()));
        Resolution::Placeholder { id, handle, error }
    }

    /// Start queued requests until the concurrency limit is reached.
    fn drain(self: &Arc<Self>, state: &mut LoaderState) {
        while state.active < self.config.max_concurrency && !self.shutdown.is_cancelled() {
            let Some(request) = state.queue.pop() else {
                break;
            };
            if !state.waiters.contains_key(&request.id) {
                continue;
            }

            let status = if request.source.is_generation() {
                AssetStatus::Generating
            } else {
                AssetStatus::Loading
            };
            if let Err(e) =
                state
                    .cache
                    .registry_mut()
                    .set_status(&request.id, status, StatusExtra::default())
            {
                warn!("dropping queued request {}: {}", request.id, e);
                state.waiters.remove(&request.id);
                continue;
            }
            state
                .events
                .publish(&request.id, StatusEventKind::Status(status), None);

            state.active += 1;
            self.stats.record_started();
            debug!(
                "starting {} priority={} active={}/{}",
                request.id, request.priority, state.active, self.config.max_concurrency
            );

            let guard = WorkerGuard {
                inner: Arc::clone(self),
                id: Some(request.id.clone()),
            };
            tokio::spawn(async move {
                let result = guard.inner.run(request).await;
                guard.finish(result);
            });
        }
    }

    async fn run(&self, request: QueuedRequest) -> Result<AssetHandle, AssetError> {
        match &request.source {
            AssetSource::Url(url) => self.load_url(&request.id, request.kind, url).await,
            AssetSource::Generation(spec) => {
                self.generate(&request.id, request.kind, spec).await
            }
        }
    }

    async fn load_url(&self, id: &str, kind: AssetKind, url: &str) -> Result<AssetHandle, AssetError> {
        let timeout = self.config.request_timeout();
        debug!("loading {} from {}", id, url);
        tokio::select! {
            result = tokio::time::timeout(timeout, self.loader.load(kind, url)) => match result {
                Ok(Ok(handle)) => Ok(handle),
                Ok(Err(e)) => Err(AssetError::load(id, &e)),
                Err(_) => Err(AssetError::LoadFailure {
                    id: id.to_string(),
                    reason: format!("load of {} timed out after {:?}", url, timeout),
                }),
            },
            _ = self.shutdown.cancelled() => Err(AssetError::Cancelled { id: id.to_string() }),
        }
    }

    async fn generate(
        &self,
        id: &str,
        kind: AssetKind,
        spec: &GenerationSpec,
    ) -> Result<AssetHandle, AssetError> {
        let service = self
            .generation
            .clone()
            .ok_or_else(|| AssetError::generation(id, "no generation service configured"))?;

        let job_id = service
            .submit(spec)
            .await
            .map_err(|e| AssetError::from_service(id, e))?;
        self.stats.record_job_submitted();
        self.record_job(id, &job_id);

        let timeout = self.config.generation_timeout();
        let interval = self.config.poll_interval();
        let result = tokio::select! {
            polled = tokio::time::timeout(timeout, poll_until_finished(service.as_ref(), id, &job_id, interval)) => match polled {
                Ok(result) => result?,
                Err(_) => {
                    warn!("generation job {} for {} timed out after {:?}", job_id, id, timeout);
                    return Err(AssetError::generation(
                        id,
                        format!("job {} timed out after {:?}", job_id, timeout),
                    ));
                }
            },
            _ = self.shutdown.cancelled() => return Err(AssetError::Cancelled { id: id.to_string() }),
        };

        let url = result
            .primary_url()
            .ok_or_else(|| {
                AssetError::generation(id, format!("job {} finished without a result url", job_id))
            })?
            .to_string();

        self.mark_importing(id)?;
        self.load_url(id, kind, &url).await
    }

    fn record_job(&self, id: &str, job_id: &str) {
        let mut state = self.state.lock();
        if let Some(record) = state.cache.registry_mut().get_mut(id) {
            record.job_id = Some(job_id.to_string());
        }
        state.events.publish(
            id,
            StatusEventKind::JobSubmitted {
                job_id: job_id.to_string(),
            },
            None,
        );
        info!("generation job {} submitted for {}", job_id, id);
    }

    fn mark_importing(&self, id: &str) -> Result<(), AssetError> {
        let mut state = self.state.lock();
        state
            .cache
            .registry_mut()
            .set_status(id, AssetStatus::Loading, StatusExtra::default())?;
        state
            .events
            .publish(id, StatusEventKind::Status(AssetStatus::Loading), None);
        Ok(())
    }

    /// Record the outcome, resolve every attached caller, then refill slots.
    fn complete(self: &Arc<Self>, id: &str, result: Result<AssetHandle, AssetError>) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        let waiters = state.waiters.remove(id).unwrap_or_default();

        let mut deliveries: Vec<(Waiter, Result<AssetRecord, AssetError>)> = Vec::new();
        match result {
            Ok(handle) => {
                let set = state.cache.registry_mut().set_status(
                    id,
                    AssetStatus::Ready,
                    StatusExtra::handle(handle.clone()),
                );
                match set {
                    Ok(_) => {
                        self.stats.record_finished(true);
                        state
                            .events
                            .publish(id, StatusEventKind::Status(AssetStatus::Ready), None);
                        info!("asset {} ready (handle {})", id, handle.raw());

                        let live: Vec<Waiter> =
                            waiters.into_iter().filter(|w| !w.is_closed()).collect();
                        for _ in &live {
                            let _ = state.cache.retain(id);
                        }
                        if let Some(record) = state.cache.registry().get(id).cloned() {
                            deliveries.extend(live.into_iter().map(|w| (w, Ok(record.clone()))));
                        }
                    }
                    Err(e) => {
                        self.stats.record_finished(false);
                        warn!("discarding loaded handle for {}: {}", id, e);
                        self.disposer.dispose(id, handle);
                        deliveries.extend(waiters.into_iter().map(|w| (w, Err(e.clone()))));
                    }
                }
            }
            Err(error) => {
                self.stats.record_finished(false);
                let reason = error.reason();
                warn!("asset {} failed: {}", id, reason);
                let _ = state.cache.registry_mut().set_status(
                    id,
                    AssetStatus::Failed,
                    StatusExtra::error(reason.clone()),
                );
                state.events.publish(
                    id,
                    StatusEventKind::Status(AssetStatus::Failed),
                    Some(reason),
                );
                deliveries.extend(waiters.into_iter().map(|w| (w, Err(error.clone()))));
            }
        }

        self.drain(&mut state);
        drop(state);

        // A caller may drop its future after the retain above.
        let unclaimed = deliveries
            .into_iter()
            .map(|(waiter, result)| waiter.send(result))
            .filter(|sent| matches!(sent, Err(Ok(_))))
            .count();
        if unclaimed > 0 {
            self.release_unclaimed(id, unclaimed);
        }
    }

    fn release_unclaimed(&self, id: &str, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            match state.cache.release(id) {
                Ok(ReleaseOutcome::Disposed) => {
                    state.events.publish(id, StatusEventKind::Disposed, None);
                }
                Ok(ReleaseOutcome::Retained { .. }) => {}
                Err(e) => {
                    warn!("releasing unclaimed reference on {}: {}", id, e);
                    break;
                }
            }
        }
        debug!("released {} unclaimed references on {}", count, id);
    }
}

/// Completes the worker's id even if the load future panics or is dropped,
/// so the slot is freed and the waiters are answered.
struct WorkerGuard {
    inner: Arc<Inner>,
    id: Option<String>,
}

impl WorkerGuard {
    fn finish(mut self, result: Result<AssetHandle, AssetError>) {
        if let Some(id) = self.id.take() {
            self.inner.complete(&id, result);
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let error = if std::thread::panicking() {
            warn!("worker for {} panicked", id);
            AssetError::LoadFailure {
                id: id.clone(),
                reason: "worker panicked".to_string(),
            }
        } else {
            AssetError::Cancelled { id: id.clone() }
        };
        self.inner.complete(&id, Err(error));
    }
}
