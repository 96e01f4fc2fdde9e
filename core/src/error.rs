use std::time::Duration;

use thiserror::Error;

use crate::ble::BleError;

/// Failure to turn one line (or one notification payload) into a record.
///
/// Line-level variants never abort a stream: the reassembler reports them and
/// moves on to the next line. Payload-level variants (`InvalidBase64`,
/// `InvalidUtf8`) come from the transport decoder and fail the session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("invalid record {line:?}: {message}")]
    InvalidJson { line: String, message: String },

    #[error("record {index} is missing field `{field}`")]
    MissingField { index: u32, field: String },

    #[error("notification payload is not valid base64")]
    InvalidBase64,

    #[error("notification payload is not valid utf-8")]
    InvalidUtf8,

    #[error("unterminated line of {len} bytes exceeds buffer limit of {max}")]
    BufferOverflow { len: usize, max: usize },
}

/// Failure reading or writing a persisted record.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// The single terminal failure of a dive log sync session.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("no device named {0:?} found before scan timeout")]
    ScanTimeout(String),

    #[error("connection attempt timed out")]
    ConnectTimeout,

    #[error("terminal record not received within {0:?}")]
    SessionTimeout(Duration),

    #[error("notification stream ended before terminal record")]
    StreamEnded,

    #[error("transport error: {0}")]
    Transport(#[from] BleError),

    #[error("payload decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Rejection of a classifier result before it becomes a discovery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionError {
    #[error("confidence too low: {confidence:.2}")]
    ConfidenceTooLow { confidence: f32 },

    #[error("no timestamp available for discovery")]
    NoTimestamp,
}
