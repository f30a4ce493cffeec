//! Cross-component signals: back-pressure flag and task heartbeats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Lock-free coordination bits shared through the context.
#[derive(Debug, Default)]
pub struct SyncFlags {
    /// Set while the indexer is more than the configured lag threshold
    /// behind head; other tasks shed RPC load until it clears.
    indexer_lagging: AtomicBool,
    /// Pinged when an `OutcomeSubmitted` window commits, so settlement
    /// reacts ahead of its periodic sweep.
    settlement_nudge: tokio::sync::Notify,
}

impl SyncFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indexer_lagging(&self) -> bool {
        self.indexer_lagging.load(Ordering::Relaxed)
    }

    pub fn set_indexer_lagging(&self, lagging: bool) {
        self.indexer_lagging.store(lagging, Ordering::Relaxed);
    }

    pub fn nudge_settlement(&self) {
        self.settlement_nudge.notify_one();
    }

    pub async fn settlement_nudged(&self) {
        self.settlement_nudge.notified().await;
    }
}

/// Last-seen instants per component, read by the health probe. Each beat
/// carries how long the component may stay silent before it counts as stale,
/// because a daily task going quiet for an hour is normal while an indexer
/// stream doing the same is an incident.
#[derive(Debug, Default)]
pub struct Heartbeats {
    beats: Mutex<HashMap<&'static str, (Instant, Duration)>>,
}

impl Heartbeats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a beat with the default five-minute staleness allowance.
    pub fn beat(&self, component: &'static str) {
        self.beat_within(component, Duration::from_secs(300));
    }

    /// Record a beat for a component expected back within `stale_after`.
    pub fn beat_within(&self, component: &'static str, stale_after: Duration) {
        if let Ok(mut map) = self.beats.lock() {
            map.insert(component, (Instant::now(), stale_after));
        }
    }

    /// (component, seconds since last beat) for every component past its
    /// allowance, most overdue first.
    pub fn overdue(&self) -> Vec<(&'static str, u64)> {
        let mut out: Vec<(&'static str, u64)> = self
            .beats
            .lock()
            .map(|map| {
                map.iter()
                    .filter(|(_, (last, allowance))| last.elapsed() > *allowance)
                    .map(|(k, (last, _))| (*k, last.elapsed().as_secs()))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| b.1.cmp(&a.1));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lag_flag_toggles() {
        let flags = SyncFlags::new();
        assert!(!flags.indexer_lagging());
        flags.set_indexer_lagging(true);
        assert!(flags.indexer_lagging());
        flags.set_indexer_lagging(false);
        assert!(!flags.indexer_lagging());
    }

    #[test]
    fn test_fresh_beats_are_not_overdue() {
        let hb = Heartbeats::new();
        hb.beat("indexer");
        hb.beat("results");
        assert!(hb.overdue().is_empty());
    }

    #[test]
    fn test_overdue_respects_per_component_allowance() {
        let hb = Heartbeats::new();
        hb.beat("indexer");
        hb.beat_within("daily-task", Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));
        let overdue = hb.overdue();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].0, "daily-task");
    }
}
