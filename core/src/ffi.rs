//! Entry points exported to the mobile app through uniffi.
//!
//! The app owns the BLE stack and key-value storage; it pushes decoded
//! fragments into a [`LogAssembler`] and calls the pure helpers below when
//! it persists logs or discoveries.

use parking_lot::Mutex;

use crate::ble::decode_payload;
use crate::error::DecodeError;
use crate::frame::{parse_record_line, FrameEvent, FrameReassembler};
use crate::matching::MatchingEngine;
use crate::models::{Discovery, DiveLog, LogEntry};
use crate::storage::retain_latest;

pub fn decode_record_line(line: String) -> Result<Option<LogEntry>, DecodeError> {
    parse_record_line(line.trim())
}

pub fn decode_notification(payload: Vec<u8>) -> Result<String, DecodeError> {
    decode_payload(&payload)
}

pub fn match_discoveries(
    discoveries: Vec<Discovery>,
    logs: Vec<DiveLog>,
    tolerance_secs: u64,
) -> Vec<Discovery> {
    MatchingEngine::new(tolerance_secs).match_all(discoveries, &logs)
}

pub fn retain_logs(logs: Vec<DiveLog>, log: DiveLog) -> Vec<DiveLog> {
    retain_latest(logs, log)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedResult {
    /// Records accepted by this call, up to and including the terminal one
    pub records: Vec<LogEntry>,
    /// Display text of each rejected line
    pub rejected: Vec<String>,
    pub complete: bool,
}

#[derive(Debug, Default)]
struct AssemblerState {
    reassembler: FrameReassembler,
    entries: Vec<LogEntry>,
    complete: bool,
}

/// Stateful reassembly of one dive log for callers that drive BLE themselves.
#[derive(Debug)]
pub struct LogAssembler {
    terminal_index: u32,
    state: Mutex<AssemblerState>,
}

impl LogAssembler {
    pub fn new(terminal_index: u32) -> Self {
        Self {
            terminal_index,
            state: Mutex::new(AssemblerState::default()),
        }
    }

    /// Feed one decoded fragment. After the terminal record every further
    /// fragment is ignored until [`LogAssembler::take_log`].
    pub fn feed(&self, fragment: String) -> FeedResult {
        let mut state = self.state.lock();
        let mut result = FeedResult {
            records: Vec::new(),
            rejected: Vec::new(),
            complete: state.complete,
        };
        if state.complete {
            return result;
        }

        for event in state.reassembler.feed(&fragment) {
            match event {
                FrameEvent::Record(entry) => {
                    let terminal = entry.index == self.terminal_index;
                    state.entries.push(entry.clone());
                    result.records.push(entry);
                    if terminal {
                        state.complete = true;
                        result.complete = true;
                        break;
                    }
                }
                FrameEvent::Rejected(err) => result.rejected.push(err.to_string()),
            }
        }
        result
    }

    pub fn entry_count(&self) -> u32 {
        self.state.lock().entries.len() as u32
    }

    /// Hand over the accumulated entries and start a fresh log.
    pub fn take_log(&self) -> Vec<LogEntry> {
        let mut state = self.state.lock();
        state.reassembler.reset();
        state.complete = false;
        std::mem::take(&mut state.entries)
    }
}
