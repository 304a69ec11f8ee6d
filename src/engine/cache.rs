// Reference-counted ownership of ready asset handles.

use std::sync::Arc;

use tracing::{debug, info};

use super::record::AssetStatus;
use super::registry::Registry;
use crate::error::AssetError;
use crate::source::traits::HandleDisposer;

/// Result of a [`AssetCache::release`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other holders remain.
    Retained { ref_count: u32 },
    /// The count reached zero and the handle was disposed.
    Disposed,
}

/// Owns the [`Registry`] and the handles of its ready records.
///
/// At most one live handle exists per id. When the reference count crosses
/// zero the handle is taken out of the record and handed to the disposer,
/// so a handle can never be disposed twice. The record is then invalidated
/// (`Ready -> Pending`) and becomes eligible for eviction.
pub struct AssetCache {
    registry: Registry,
    disposer: Arc<dyn HandleDisposer>,
}

impl AssetCache {
    pub fn new(disposer: Arc<dyn HandleDisposer>) -> Self {
        Self {
            registry: Registry::new(),
            disposer,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Add a holder. Only ready records can be retained.
    pub fn retain(&mut self, id: &str) -> Result<u32, AssetError> {
        let record = self
            .registry
            .get_mut(id)
            .filter(|r| r.status == AssetStatus::Ready)
            .ok_or_else(|| AssetError::unknown(id))?;
        record.ref_count += 1;
        debug!("cache: retain id={} ref_count={}", id, record.ref_count);
        Ok(record.ref_count)
    }

    /// Drop a holder, disposing the handle on the zero crossing.
    pub fn release(&mut self, id: &str) -> Result<ReleaseOutcome, AssetError> {
        let record = self
            .registry
            .get_mut(id)
            .ok_or_else(|| AssetError::unknown(id))?;
        if record.ref_count == 0 {
            return Err(AssetError::RefCountUnderflow { id: id.to_string() });
        }
        record.ref_count -= 1;
        if record.ref_count > 0 {
            debug!("cache: release id={} ref_count={}", id, record.ref_count);
            return Ok(ReleaseOutcome::Retained {
                ref_count: record.ref_count,
            });
        }

        // Holders only exist on ready records, so the handle is present here.
        if let Some(handle) = self.registry.invalidate(id)? {
            info!("cache: disposing id={} handle={}", id, handle.raw());
            self.disposer.dispose(id, handle);
        }
        Ok(ReleaseOutcome::Disposed)
    }

    /// Remove a record nobody holds. Returns whether it was removed.
    pub fn evict(&mut self, id: &str) -> bool {
        match self.registry.get(id) {
            Some(record) if record.ref_count == 0 && !record.status.is_in_flight() => {}
            _ => return false,
        }
        if let Ok(Some(handle)) = self.registry.invalidate(id) {
            self.disposer.dispose(id, handle);
        }
        self.registry.remove(id).is_some()
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.registry.get(id).is_some_and(|r| r.is_ready())
    }

    pub fn ref_count(&self, id: &str) -> Option<u32> {
        self.registry.get(id).map(|r| r.ref_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::{AssetHandle, AssetKind, AssetSource};
    use crate::engine::registry::StatusExtra;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingDisposer {
        disposed: Mutex<Vec<(String, u64)>>,
    }

    impl HandleDisposer for RecordingDisposer {
        fn dispose(&self, id: &str, handle: AssetHandle) {
            self.disposed.lock().push((id.to_string(), handle.raw()));
        }
    }

    fn ready_cache() -> (AssetCache, Arc<RecordingDisposer>) {
        let disposer = Arc::new(RecordingDisposer::default());
        let mut cache = AssetCache::new(disposer.clone());
        let registry = cache.registry_mut();
        registry.register("rock1", AssetKind::Model, AssetSource::url("/models/rock.glb"));
        registry
            .set_status("rock1", AssetStatus::Loading, StatusExtra::default())
            .unwrap();
        registry
            .set_status(
                "rock1",
                AssetStatus::Ready,
                StatusExtra::handle(AssetHandle::new(42, "/models/rock.glb")),
            )
            .unwrap();
        (cache, disposer)
    }

    #[test]
    fn test_release_without_retain_underflows() {
        let (mut cache, disposer) = ready_cache();
        let err = cache.release("rock1").unwrap_err();
        assert_eq!(
            err,
            AssetError::RefCountUnderflow {
                id: "rock1".to_string()
            }
        );
        assert!(disposer.disposed.lock().is_empty());
        assert!(cache.is_loaded("rock1"));
    }

    #[test]
    fn test_retain_requires_ready() {
        let disposer = Arc::new(RecordingDisposer::default());
        let mut cache = AssetCache::new(disposer);
        cache
            .registry_mut()
            .register("hero", AssetKind::Model, AssetSource::url("/hero.glb"));
        assert_eq!(cache.retain("hero").unwrap_err(), AssetError::unknown("hero"));
        assert_eq!(cache.retain("nope").unwrap_err(), AssetError::unknown("nope"));
    }

    #[test]
    fn test_dispose_once_per_zero_crossing() {
        let (mut cache, disposer) = ready_cache();
        cache.retain("rock1").unwrap();
        cache.retain("rock1").unwrap();

        assert_eq!(
            cache.release("rock1").unwrap(),
            ReleaseOutcome::Retained { ref_count: 1 }
        );
        assert!(disposer.disposed.lock().is_empty());

        assert_eq!(cache.release("rock1").unwrap(), ReleaseOutcome::Disposed);
        assert_eq!(
            disposer.disposed.lock().as_slice(),
            &[("rock1".to_string(), 42)]
        );
        assert!(!cache.is_loaded("rock1"));

        // No holders left; a further release is an underflow, not a second dispose.
        assert!(matches!(
            cache.release("rock1"),
            Err(AssetError::RefCountUnderflow { .. })
        ));
        assert_eq!(disposer.disposed.lock().len(), 1);
    }

    #[test]
    fn test_evict_only_unreferenced() {
        let (mut cache, disposer) = ready_cache();
        cache.retain("rock1").unwrap();
        assert!(!cache.evict("rock1"));

        cache.release("rock1").unwrap();
        assert!(cache.evict("rock1"));
        assert!(cache.registry().get("rock1").is_none());
        assert_eq!(disposer.disposed.lock().len(), 1);
    }

    #[test]
    fn test_evict_ready_unheld_disposes() {
        let (mut cache, disposer) = ready_cache();
        assert!(cache.evict("rock1"));
        assert_eq!(disposer.disposed.lock().len(), 1);
    }
}
