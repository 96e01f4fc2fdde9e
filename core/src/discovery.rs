//! Turning classifier output into stored discoveries.

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{PredictionError, StorageError};
use crate::matching::MatchingEngine;
use crate::models::{Discovery, Prediction};
use crate::storage::{KeyValueStore, LogStore};

/// Predictions at or above this confidence are accepted outright.
pub const ACCEPT_CONFIDENCE: f32 = 0.9;
/// Predictions below this confidence are rejected.
pub const MIN_CONFIDENCE: f32 = 0.6;

/// Timestamps used by the demo build in place of photo EXIF time.
pub const DEMO_TIMESTAMPS: [i64; 5] = [
    1_717_218_001,
    1_717_218_012,
    1_717_218_025,
    1_717_218_040,
    1_717_218_050,
];

/// Source of the time assigned to a new discovery.
pub trait TimestampSource: Send + Sync {
    fn next_timestamp(&self) -> Option<i64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimestampSource for SystemClock {
    fn next_timestamp(&self) -> Option<i64> {
        Some(chrono::Utc::now().timestamp())
    }
}

/// Hands out a fixed list of timestamps in order, wrapping around.
#[derive(Debug)]
pub struct MockTimestamps {
    timestamps: Vec<i64>,
    used: Mutex<Vec<i64>>,
}

impl MockTimestamps {
    pub fn new(timestamps: Vec<i64>) -> Self {
        Self {
            timestamps,
            used: Mutex::new(Vec::new()),
        }
    }

    pub fn demo() -> Self {
        Self::new(DEMO_TIMESTAMPS.to_vec())
    }

    pub fn used(&self) -> Vec<i64> {
        self.used.lock().clone()
    }

    pub fn reset(&self) {
        self.used.lock().clear();
    }
}

impl TimestampSource for MockTimestamps {
    fn next_timestamp(&self) -> Option<i64> {
        if self.timestamps.is_empty() {
            return None;
        }
        let mut used = self.used.lock();
        let next = self.timestamps[used.len() % self.timestamps.len()];
        used.push(next);
        Some(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    NeedsConfirmation,
}

/// Classify a prediction by confidence.
pub fn triage(prediction: &Prediction) -> Result<Verdict, PredictionError> {
    if prediction.confidence >= ACCEPT_CONFIDENCE {
        Ok(Verdict::Accepted)
    } else if prediction.confidence >= MIN_CONFIDENCE {
        Ok(Verdict::NeedsConfirmation)
    } else {
        Err(PredictionError::ConfidenceTooLow {
            confidence: prediction.confidence,
        })
    }
}

/// File name for a saved photo: whitespace runs become `_`.
pub fn image_file_name(scientific_name: &str, unix_millis: i64) -> String {
    let mut safe = String::with_capacity(scientific_name.len());
    let mut in_space = false;
    for ch in scientific_name.chars() {
        if ch.is_whitespace() {
            if !in_space {
                safe.push('_');
            }
            in_space = true;
        } else {
            safe.push(ch);
            in_space = false;
        }
    }
    format!("{safe}_{unix_millis}.jpg")
}

/// A stamped discovery waiting to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDiscovery {
    pub discovery: Discovery,
    pub verdict: Verdict,
}

impl PendingDiscovery {
    pub fn needs_confirmation(&self) -> bool {
        self.verdict == Verdict::NeedsConfirmation
    }
}

/// Creates discoveries and matches them against whatever logs are stored.
pub struct DiscoveryRecorder<'a, S, T> {
    store: &'a LogStore<S>,
    clock: T,
    matcher: MatchingEngine,
}

impl<'a, S, T> DiscoveryRecorder<'a, S, T>
where
    S: KeyValueStore,
    T: TimestampSource,
{
    pub fn new(store: &'a LogStore<S>, clock: T, matcher: MatchingEngine) -> Self {
        Self {
            store,
            clock,
            matcher,
        }
    }

    /// Stamp and triage a prediction. Nothing is persisted yet.
    pub fn prepare(
        &self,
        image_path: &str,
        prediction: &Prediction,
    ) -> Result<PendingDiscovery, PredictionError> {
        let timestamp = self
            .clock
            .next_timestamp()
            .ok_or(PredictionError::NoTimestamp)?;
        let verdict = triage(prediction)?;
        if verdict == Verdict::NeedsConfirmation {
            warn!(
                species = %prediction.scientific_name,
                confidence = prediction.confidence,
                "Prediction needs confirmation"
            );
        }
        Ok(PendingDiscovery {
            discovery: Discovery::new(image_path, prediction.scientific_name.clone(), timestamp),
            verdict,
        })
    }

    /// Persist a discovery, then run matching if any log is stored.
    ///
    /// Returns the discovery as stored after matching.
    pub fn commit(&self, pending: PendingDiscovery) -> Result<Discovery, StorageError> {
        let discovery = pending.discovery;
        self.store.save_discovery(discovery.clone())?;
        info!(species = %discovery.scientific_name, timestamp = discovery.timestamp, "Saved discovery");

        if self.store.get_logs().is_empty() {
            return Ok(discovery);
        }
        self.matcher.run(self.store)?;

        let stored = self
            .store
            .get_discoveries()
            .into_iter()
            .rev()
            .find(|d| d.image_path == discovery.image_path && d.timestamp == discovery.timestamp)
            .unwrap_or(discovery);
        Ok(stored)
    }
}
