// Status-change notifications, published in mutation order.

use tokio::sync::broadcast;
use tracing::trace;

use super::record::AssetStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEventKind {
    /// The record moved to a new status.
    Status(AssetStatus),
    /// A generation job was accepted by the service.
    JobSubmitted { job_id: String },
    /// The asset failed and the caller was handed a placeholder.
    FellBack,
    /// The handle was disposed after the last release.
    Disposed,
    /// The record was removed from the registry.
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    /// Monotonic across all assets of one loader.
    pub seq: u64,
    pub id: String,
    pub kind: StatusEventKind,
    pub reason: Option<String>,
}

/// Broadcast channel of [`StatusEvent`]s.
///
/// Events published before a subscriber joined are not replayed. A slow
/// subscriber that falls more than `capacity` events behind observes
/// `RecvError::Lagged`.
pub struct StatusEvents {
    sender: broadcast::Sender<StatusEvent>,
    next_seq: u64,
}

impl StatusEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_seq: 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&mut self, id: &str, kind: StatusEventKind, reason: Option<String>) {
        let event = StatusEvent {
            seq: self.next_seq,
            id: id.to_string(),
            kind,
            reason,
        };
        self.next_seq += 1;
        // No receivers is not an error.
        if self.sender.send(event).is_err() {
            trace!("status event for {} dropped: no subscribers", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_in_order_and_not_replayed() {
        let mut events = StatusEvents::new(16);
        events.publish("early", StatusEventKind::Status(AssetStatus::Pending), None);

        let mut rx = events.subscribe();
        events.publish("rock1", StatusEventKind::Status(AssetStatus::Loading), None);
        events.publish("rock1", StatusEventKind::Status(AssetStatus::Ready), None);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.id, "rock1");
        assert_eq!(first.seq, 1);
        assert_eq!(second.kind, StatusEventKind::Status(AssetStatus::Ready));
        assert!(rx.try_recv().is_err());
    }
}
