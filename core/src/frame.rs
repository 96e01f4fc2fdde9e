//! Reassembly of newline-delimited JSON records from notification fragments.
//!
//! The logger streams one JSON object per line, e.g.
//! `{"i":0,"p":1.01,"t":27.4,"d":0.2,"ts":1717217885}\n`, but each BLE
//! notification carries at most a few dozen bytes. A record may therefore be
//! split across fragments, and a fragment may carry several records.
//!
//! [`FrameReassembler`] keeps the unterminated tail between calls and turns
//! each complete line into a [`FrameEvent`], in arrival order.

use serde::Deserialize;

use crate::config::DEFAULT_MAX_BUFFER_BYTES;
use crate::error::DecodeError;
use crate::models::LogEntry;

/// Result of processing one complete line.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameEvent {
    Record(LogEntry),
    Rejected(DecodeError),
}

impl FrameEvent {
    pub fn record(&self) -> Option<&LogEntry> {
        match self {
            FrameEvent::Record(entry) => Some(entry),
            FrameEvent::Rejected(_) => None,
        }
    }
}

/// Wire shape of one record. Only `i` decides whether a line is a log entry.
#[derive(Deserialize)]
struct WireRecord {
    i: Option<u32>,
    p: Option<f64>,
    t: Option<f64>,
    d: Option<f64>,
    ts: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct FrameReassembler {
    buffer: String,
    max_buffer_bytes: usize,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER_BYTES)
    }

    pub fn with_max_buffer(max_buffer_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_buffer_bytes,
        }
    }

    /// Bytes received since the last delimiter.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Append `fragment` and process every line it completes.
    ///
    /// Malformed lines yield [`FrameEvent::Rejected`] without disturbing the
    /// lines around them. Lines that parse but carry no `i` are dropped
    /// silently. If the unterminated tail grows past the buffer limit it is
    /// discarded and reported as a [`DecodeError::BufferOverflow`].
    pub fn feed(&mut self, fragment: &str) -> Vec<FrameEvent> {
        self.buffer.push_str(fragment);

        let mut events = Vec::new();
        if let Some(last_delimiter) = self.buffer.rfind('\n') {
            let tail = self.buffer.split_off(last_delimiter + 1);
            let complete = std::mem::replace(&mut self.buffer, tail);

            for line in complete.split('\n') {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_record_line(line) {
                    Ok(Some(entry)) => events.push(FrameEvent::Record(entry)),
                    Ok(None) => {}
                    Err(err) => events.push(FrameEvent::Rejected(err)),
                }
            }
        }

        if self.buffer.len() > self.max_buffer_bytes {
            events.push(FrameEvent::Rejected(DecodeError::BufferOverflow {
                len: self.buffer.len(),
                max: self.max_buffer_bytes,
            }));
            self.buffer.clear();
        }

        events
    }

    /// Drop any partial line.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Parse one trimmed line.
///
/// Returns `Ok(None)` for well-formed objects without an `i` field.
pub fn parse_record_line(line: &str) -> Result<Option<LogEntry>, DecodeError> {
    let wire: WireRecord = serde_json::from_str(line).map_err(|e| DecodeError::InvalidJson {
        line: line.to_string(),
        message: e.to_string(),
    })?;

    let Some(index) = wire.i else {
        return Ok(None);
    };
    let missing = |field: &str| DecodeError::MissingField {
        index,
        field: field.to_string(),
    };

    Ok(Some(LogEntry {
        index,
        pressure: wire.p.ok_or_else(|| missing("p"))?,
        temperature: wire.t.ok_or_else(|| missing("t"))?,
        depth: wire.d.ok_or_else(|| missing("d"))?,
        timestamp: wire.ts.ok_or_else(|| missing("ts"))?,
    }))
}
