//! Timestamp matching of photo discoveries against stored dive logs.
//!
//! A discovery is annotated with the depth and temperature of the **first**
//! log entry within the tolerance window, scanning logs oldest first and
//! entries in stored order. This is not necessarily the nearest entry: ties
//! and near-ties resolve in favor of older logs and earlier samples.

use tracing::{debug, info};

use crate::config::DEFAULT_MATCH_TOLERANCE_SECS;
use crate::error::StorageError;
use crate::models::{Discovery, DiveLog, LogEntry};
use crate::storage::{KeyValueStore, LogStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchingEngine {
    tolerance_secs: u64,
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_TOLERANCE_SECS)
    }
}

impl MatchingEngine {
    pub fn new(tolerance_secs: u64) -> Self {
        Self { tolerance_secs }
    }

    pub fn tolerance_secs(&self) -> u64 {
        self.tolerance_secs
    }

    /// First entry with `|entry.timestamp - timestamp| <= tolerance`.
    pub fn find_match<'a>(&self, timestamp: i64, logs: &'a [DiveLog]) -> Option<&'a LogEntry> {
        logs.iter()
            .flat_map(|log| log.entries.iter())
            .find(|entry| entry.timestamp.abs_diff(timestamp) <= self.tolerance_secs)
    }

    /// Annotate every unlogged discovery that has a match.
    ///
    /// Logged discoveries pass through untouched, so applying this twice
    /// with the same logs is a no-op the second time.
    pub fn match_all(&self, discoveries: Vec<Discovery>, logs: &[DiveLog]) -> Vec<Discovery> {
        discoveries
            .into_iter()
            .map(|discovery| {
                if discovery.is_logged {
                    return discovery;
                }
                match self.find_match(discovery.timestamp, logs) {
                    Some(entry) => {
                        debug!(
                            timestamp = discovery.timestamp,
                            entry_index = entry.index,
                            entry_timestamp = entry.timestamp,
                            "Matched discovery to log entry"
                        );
                        discovery.logged_with(entry)
                    }
                    None => discovery,
                }
            })
            .collect()
    }

    /// Match stored discoveries against stored logs and persist the result
    /// as one overwrite of the discovery list.
    pub fn run<S: KeyValueStore>(&self, store: &LogStore<S>) -> Result<(), StorageError> {
        let logs = store.get_logs();
        store.modify_discoveries(|discoveries| {
            let before = discoveries.iter().filter(|d| d.is_logged).count();
            let updated = self.match_all(discoveries, &logs);
            let after = updated.iter().filter(|d| d.is_logged).count();
            info!(
                logs = logs.len(),
                discoveries = updated.len(),
                newly_matched = after - before,
                "Matching finished"
            );
            updated
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn entry(index: u32, timestamp: i64, depth: f64) -> LogEntry {
        LogEntry {
            index,
            pressure: 1.0,
            temperature: 20.0 + depth / 10.0,
            depth,
            timestamp,
        }
    }

    fn store_with(logs: Vec<DiveLog>, discoveries: Vec<Discovery>) -> LogStore<MemoryStore> {
        let store = LogStore::new(MemoryStore::new());
        for log in logs {
            store.save_log(log).unwrap();
        }
        store.update_discoveries(&discoveries).unwrap();
        store
    }

    #[test]
    fn test_tolerance_boundary() {
        let engine = MatchingEngine::default();
        let inside = [DiveLog::new(vec![entry(0, 1002, 5.0)])];
        let outside = [DiveLog::new(vec![entry(0, 1003, 5.0)])];

        assert!(engine.find_match(1000, &inside).is_some());
        assert!(engine.find_match(1000, &outside).is_none());

        let before = [DiveLog::new(vec![entry(0, 998, 5.0)])];
        assert!(engine.find_match(1000, &before).is_some());
    }

    #[test]
    fn test_first_match_wins_over_nearest() {
        let engine = MatchingEngine::default();
        let logs = [
            DiveLog::new(vec![entry(0, 990, 1.0), entry(1, 1002, 8.0)]),
            DiveLog::new(vec![entry(0, 1000, 20.0)]),
        ];

        let found = engine.find_match(1000, &logs).unwrap();
        assert_eq!(found.depth, 8.0);

        let within_log = [DiveLog::new(vec![
            entry(0, 998, 3.0),
            entry(1, 1000, 4.0),
        ])];
        assert_eq!(engine.find_match(1000, &within_log).unwrap().depth, 3.0);
    }

    #[test]
    fn test_logged_discovery_never_overwritten() {
        let engine = MatchingEngine::default();
        let mut logged = Discovery::new("a.jpg", "Moon_Wrasse", 1000);
        logged = logged.logged_with(&entry(0, 1000, 7.0));

        let logs = [DiveLog::new(vec![entry(0, 1000, 30.0)])];
        let result = engine.match_all(vec![logged.clone()], &logs);
        assert_eq!(result, vec![logged]);
    }

    #[test]
    fn test_unmatched_discovery_unchanged() {
        let engine = MatchingEngine::default();
        let discovery = Discovery::new("a.jpg", "Clownfish", 5000);
        let logs = [DiveLog::new(vec![entry(0, 1000, 30.0)])];
        assert_eq!(engine.match_all(vec![discovery.clone()], &logs), vec![discovery]);
        assert_eq!(
            engine.match_all(vec![Discovery::new("b.jpg", "Clownfish", 1)], &[]),
            vec![Discovery::new("b.jpg", "Clownfish", 1)]
        );
    }

    #[test]
    fn test_wider_tolerance() {
        let engine = MatchingEngine::new(10);
        let logs = [DiveLog::new(vec![entry(0, 1010, 5.0)])];
        assert!(engine.find_match(1000, &logs).is_some());
        assert!(engine.find_match(989, &logs).is_none());
    }

    #[test]
    fn test_run_moon_wrasse_scenario() {
        let store = store_with(
            vec![DiveLog::new(vec![LogEntry {
                index: 166,
                pressure: 2.2,
                temperature: 27.1,
                depth: 12.3,
                timestamp: 1_717_218_050,
            }])],
            vec![Discovery::new("file:///moon.jpg", "Moon_Wrasse", 1_717_218_050)],
        );

        MatchingEngine::default().run(&store).unwrap();

        let discoveries = store.get_discoveries();
        assert_eq!(discoveries.len(), 1);
        assert!(discoveries[0].is_logged);
        assert_eq!(discoveries[0].depth, Some(12.3));
        assert_eq!(discoveries[0].temperature, Some(27.1));
        assert_eq!(discoveries[0].scientific_name, "Moon_Wrasse");
    }

    #[test]
    fn test_run_is_idempotent() {
        let store = store_with(
            vec![DiveLog::new(vec![entry(0, 1000, 5.0), entry(1, 1001, 6.0)])],
            vec![
                Discovery::new("a.jpg", "Moon_Wrasse", 1001),
                Discovery::new("b.jpg", "Clownfish", 9000),
            ],
        );
        let engine = MatchingEngine::default();

        engine.run(&store).unwrap();
        let first = store.backend().read(crate::storage::DISCOVERY_KEY).unwrap();
        engine.run(&store).unwrap();
        let second = store.backend().read(crate::storage::DISCOVERY_KEY).unwrap();

        assert_eq!(first, second);
        assert!(store.get_discoveries()[0].is_logged);
        assert!(!store.get_discoveries()[1].is_logged);
    }

    #[test]
    fn test_run_preserves_discovery_order() {
        let store = store_with(
            vec![DiveLog::new(vec![entry(0, 2000, 5.0)])],
            vec![
                Discovery::new("c.jpg", "Lionfish", 50),
                Discovery::new("a.jpg", "Moon_Wrasse", 2001),
                Discovery::new("b.jpg", "Clownfish", 10),
            ],
        );
        MatchingEngine::default().run(&store).unwrap();

        let names: Vec<_> = store
            .get_discoveries()
            .into_iter()
            .map(|d| d.scientific_name)
            .collect();
        assert_eq!(names, vec!["Lionfish", "Moon_Wrasse", "Clownfish"]);
    }

    #[test]
    fn test_concurrent_run_and_save_keep_every_discovery() {
        let store = store_with(vec![DiveLog::new(vec![entry(0, 1_000, 5.0)])], vec![]);
        let engine = MatchingEngine::default();

        std::thread::scope(|scope| {
            for worker in 0..8_i64 {
                let store = &store;
                let engine = &engine;
                scope.spawn(move || {
                    for n in 0..50 {
                        let ts = 999 + worker * 50 + n;
                        store
                            .save_discovery(Discovery::new("x.jpg", "Moon_Wrasse", ts))
                            .unwrap();
                        engine.run(store).unwrap();
                    }
                });
            }
        });

        let discoveries = store.get_discoveries();
        assert_eq!(discoveries.len(), 400);
        // Only timestamps 999..=1002 fall within tolerance of the single entry.
        assert_eq!(discoveries.iter().filter(|d| d.is_logged).count(), 4);
    }
}
