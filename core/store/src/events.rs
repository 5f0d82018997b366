//! Store events and their observers.
//!
//! Events are delivered synchronously on the thread that caused them,
//! after the change they describe has been persisted.

use std::sync::{Mutex, PoisonError};

use labjournal_common::RecordId;
use labjournal_document::SensorTrialStats;

/// Something observers may need to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A former cover image was replaced and no note references it.
    /// Caches keyed by the path should drop it.
    CoverAssetEvicted { record_id: RecordId, path: String },
    /// A record moved into quarantine.
    RecordDeleted { record_id: RecordId },
    /// A record came back from quarantine.
    RecordRestored { record_id: RecordId },
}

/// Receives store events.
pub trait StoreObserver: Send + Sync {
    fn on_event(&self, event: &StoreEvent);
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StoreObserver for NoopObserver {
    fn on_event(&self, _event: &StoreEvent) {}
}

/// Observer that keeps every event it sees.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<StoreEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far, oldest first.
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return every event seen so far.
    pub fn take(&self) -> Vec<StoreEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl StoreObserver for CollectingObserver {
    fn on_event(&self, event: &StoreEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Fresh statistics for one trial, computed from its recording by a
/// background worker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialStatsUpdated {
    pub record_id: RecordId,
    pub trial_id: String,
    pub stats: Vec<SensorTrialStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_observer_take_drains() {
        let observer = CollectingObserver::new();
        let record_id = RecordId::new("r1").unwrap();
        observer.on_event(&StoreEvent::RecordDeleted {
            record_id: record_id.clone(),
        });
        observer.on_event(&StoreEvent::RecordRestored { record_id });

        assert_eq!(observer.events().len(), 2);
        assert_eq!(observer.take().len(), 2);
        assert!(observer.events().is_empty());
    }
}
