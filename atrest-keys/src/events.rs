//! Bounded in-process ring of key lifecycle events.

use crate::types::{KeyLifecycleEvent, LifecycleEventType};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// Most recent events retained in memory.
pub const MAX_LIFECYCLE_EVENTS: usize = 1000;

/// Append-only lifecycle event log, trimmed to the most recent
/// [`MAX_LIFECYCLE_EVENTS`].
pub struct LifecycleLog {
    events: Mutex<VecDeque<KeyLifecycleEvent>>,
    capacity: usize,
}

impl LifecycleLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_LIFECYCLE_EVENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(MAX_LIFECYCLE_EVENTS))),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<KeyLifecycleEvent>> {
        // A panic mid-push cannot leave the deque inconsistent.
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, event: KeyLifecycleEvent) {
        info!(
            event_type = ?event.event_type,
            key_version = event.key_version,
            "key lifecycle event"
        );
        let mut events = self.lock();
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<KeyLifecycleEvent> {
        let events = self.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn for_version(&self, version: u32) -> Vec<KeyLifecycleEvent> {
        self.lock()
            .iter()
            .filter(|e| e.key_version == version)
            .cloned()
            .collect()
    }

    pub fn of_type(&self, event_type: LifecycleEventType) -> Vec<KeyLifecycleEvent> {
        self.lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every retained event. Test harness reset hook.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for LifecycleLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_to_capacity_keeping_newest() {
        let log = LifecycleLog::new();
        for v in 1..=1005u32 {
            log.record(KeyLifecycleEvent::new(LifecycleEventType::KeyCreated, v));
        }
        assert_eq!(log.len(), MAX_LIFECYCLE_EVENTS);
        let recent = log.recent(2);
        assert_eq!(recent[0].key_version, 1004);
        assert_eq!(recent[1].key_version, 1005);
        assert!(log.for_version(5).is_empty());
        assert_eq!(log.for_version(6).len(), 1);
    }

    #[test]
    fn filters_by_type() {
        let log = LifecycleLog::with_capacity(10);
        log.record(KeyLifecycleEvent::new(LifecycleEventType::KeyCreated, 2));
        log.record(KeyLifecycleEvent::new(LifecycleEventType::KeyRotated, 2));
        log.record(KeyLifecycleEvent::new(LifecycleEventType::KeyDeprecated, 1));
        assert_eq!(log.of_type(LifecycleEventType::KeyRotated).len(), 1);
        assert_eq!(log.recent(100).len(), 3);
    }

    #[test]
    fn clear_empties_ring() {
        let log = LifecycleLog::with_capacity(3);
        log.record(KeyLifecycleEvent::new(LifecycleEventType::KeyCreated, 1));
        log.clear();
        assert!(log.is_empty());
    }
}
