pub mod ble;
pub mod ble_mock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod ffi;
pub mod frame;
pub mod matching;
pub mod models;
pub mod session;
pub mod storage;

uniffi::include_scaffolding!("divesync");

pub use ble::{BleAdapter, BleDeviceInfo, BleError, GattService, NotificationStream};
pub use config::SyncConfig;
pub use discovery::{DiscoveryRecorder, MockTimestamps, SystemClock, TimestampSource};
pub use error::{ConfigError, DecodeError, PredictionError, StorageError, SyncError};
pub use ffi::{
    decode_notification, decode_record_line, match_discoveries, retain_logs, FeedResult,
    LogAssembler,
};
pub use frame::{FrameEvent, FrameReassembler};
pub use matching::MatchingEngine;
pub use models::{Discovery, DiveLog, LogEntry, Prediction};
pub use session::{DiveLogSession, SessionState, SyncReport};
pub use storage::{FileStore, KeyValueStore, LogStore, MemoryStore};
