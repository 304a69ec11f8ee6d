// Asset registry: the single source of truth for asset identity and status.

use std::collections::HashMap;
use std::time::SystemTime;

use tracing::debug;

use super::record::{AssetHandle, AssetKind, AssetRecord, AssetSource, AssetStatus};
use crate::error::AssetError;

/// Fields that accompany a status change.
#[derive(Debug, Default)]
pub struct StatusExtra {
    pub handle: Option<AssetHandle>,
    pub error: Option<String>,
    pub job_id: Option<String>,
}

impl StatusExtra {
    pub fn handle(handle: AssetHandle) -> Self {
        Self {
            handle: Some(handle),
            ..Default::default()
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn job(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    records: HashMap<String, AssetRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset. Idempotent: an existing id is returned unchanged.
    pub fn register(&mut self, id: &str, kind: AssetKind, source: AssetSource) -> &AssetRecord {
        self.records.entry(id.to_string()).or_insert_with(|| {
            debug!("registry: register id={} kind={:?}", id, kind);
            AssetRecord::new(id, kind, source)
        })
    }

    pub fn get(&self, id: &str) -> Option<&AssetRecord> {
        self.records.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut AssetRecord> {
        self.records.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Move a record to `status`, applying the associated fields.
    ///
    /// `Ready` requires a handle in `extra`; every other status clears the
    /// handle. Leaving `Ready` this way drops the handle without disposing
    /// it, so callers holding one must use [`Registry::invalidate`].
    pub fn set_status(
        &mut self,
        id: &str,
        status: AssetStatus,
        extra: StatusExtra,
    ) -> Result<&AssetRecord, AssetError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| AssetError::unknown(id))?;

        if record.status != status && !record.status.can_transition_to(status) {
            return Err(AssetError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to: status,
            });
        }

        if status == AssetStatus::Ready {
            let handle = extra.handle.ok_or_else(|| AssetError::LoadFailure {
                id: id.to_string(),
                reason: "ready status without a handle".to_string(),
            })?;
            record.handle = Some(handle);
            record.error = None;
        } else {
            record.handle = None;
        }

        if status == AssetStatus::Failed {
            record.error = Some(extra.error.unwrap_or_else(|| "unknown error".to_string()));
        }
        if let Some(job_id) = extra.job_id {
            record.job_id = Some(job_id);
        }

        debug!(
            "registry: id={} status {:?} -> {:?}",
            id, record.status, status
        );
        record.status = status;
        record.updated_at = SystemTime::now();
        Ok(record)
    }

    /// Reset a failed (or idle pending) record for another attempt with `source`.
    pub fn retry(&mut self, id: &str, source: AssetSource) -> Result<&AssetRecord, AssetError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| AssetError::unknown(id))?;
        match record.status {
            AssetStatus::Failed | AssetStatus::Pending => {
                record.status = AssetStatus::Pending;
                record.source = source;
                record.error = None;
                record.job_id = None;
                record.handle = None;
                record.updated_at = SystemTime::now();
                Ok(record)
            }
            from => Err(AssetError::InvalidTransition {
                id: id.to_string(),
                from,
                to: AssetStatus::Pending,
            }),
        }
    }

    /// Ready -> Pending. Returns the handle that is no longer referenced.
    pub fn invalidate(&mut self, id: &str) -> Result<Option<AssetHandle>, AssetError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| AssetError::unknown(id))?;
        if record.status != AssetStatus::Ready {
            return Err(AssetError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to: AssetStatus::Pending,
            });
        }
        record.status = AssetStatus::Pending;
        record.updated_at = SystemTime::now();
        Ok(record.handle.take())
    }

    pub fn remove(&mut self, id: &str) -> Option<AssetRecord> {
        let removed = self.records.remove(id);
        if removed.is_some() {
            debug!("registry: removed id={}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rock() -> AssetSource {
        AssetSource::url("/models/rock.glb")
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = Registry::new();
        let created_at = registry.register("rock1", AssetKind::Model, rock()).created_at;

        let again = registry.register(
            "rock1",
            AssetKind::Texture,
            AssetSource::url("/other.png"),
        );
        assert_eq!(again.kind, AssetKind::Model);
        assert_eq!(again.source, rock());
        assert_eq!(again.created_at, created_at);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_status_unknown_id() {
        let mut registry = Registry::new();
        let err = registry
            .set_status("ghost", AssetStatus::Loading, StatusExtra::default())
            .unwrap_err();
        assert_eq!(err, AssetError::unknown("ghost"));
    }

    #[test]
    fn test_handle_present_iff_ready() {
        let mut registry = Registry::new();
        registry.register("rock1", AssetKind::Model, rock());
        registry
            .set_status("rock1", AssetStatus::Loading, StatusExtra::default())
            .unwrap();
        assert!(registry.get("rock1").unwrap().handle.is_none());

        let err = registry
            .set_status("rock1", AssetStatus::Ready, StatusExtra::default())
            .unwrap_err();
        assert!(matches!(err, AssetError::LoadFailure { .. }));

        let record = registry
            .set_status(
                "rock1",
                AssetStatus::Ready,
                StatusExtra::handle(AssetHandle::new(7, "/models/rock.glb")),
            )
            .unwrap();
        assert_eq!(record.handle.as_ref().map(|h| h.raw()), Some(7));

        let dropped = registry.invalidate("rock1").unwrap();
        assert_eq!(dropped.map(|h| h.raw()), Some(7));
        let record = registry.get("rock1").unwrap();
        assert_eq!(record.status, AssetStatus::Pending);
        assert!(record.handle.is_none());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut registry = Registry::new();
        registry.register("rock1", AssetKind::Model, rock());
        let err = registry
            .set_status(
                "rock1",
                AssetStatus::Ready,
                StatusExtra::handle(AssetHandle::new(1, "x")),
            )
            .unwrap_err();
        assert!(matches!(err, AssetError::InvalidTransition { .. }));
    }

    #[test]
    fn test_retry_after_failure_replaces_source() {
        let mut registry = Registry::new();
        registry.register("rock1", AssetKind::Model, AssetSource::url("http://bad"));
        registry
            .set_status("rock1", AssetStatus::Loading, StatusExtra::default())
            .unwrap();
        registry
            .set_status("rock1", AssetStatus::Failed, StatusExtra::error("refused"))
            .unwrap();
        assert_eq!(
            registry.get("rock1").unwrap().error.as_deref(),
            Some("refused")
        );

        let record = registry.retry("rock1", rock()).unwrap();
        assert_eq!(record.status, AssetStatus::Pending);
        assert_eq!(record.source, rock());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_retry_rejected_while_loading() {
        let mut registry = Registry::new();
        registry.register("rock1", AssetKind::Model, rock());
        registry
            .set_status("rock1", AssetStatus::Loading, StatusExtra::default())
            .unwrap();
        assert!(registry.retry("rock1", rock()).is_err());
    }
}
