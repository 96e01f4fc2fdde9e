//! One dive log sync: scan, connect, subscribe, receive until the terminal
//! record, then persist and match.
//!
//! A [`DiveLogSession`] is consumed by [`DiveLogSession::run`], which returns
//! exactly one result. Nothing is persisted unless the terminal record
//! arrives; anything the device sends after it is never read.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::ble::{decode_payload, find_characteristic, BleAdapter};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::frame::{FrameEvent, FrameReassembler};
use crate::matching::MatchingEngine;
use crate::models::{DiveLog, LogEntry};
use crate::storage::{KeyValueStore, LogStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    Subscribing,
    Receiving,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Summary of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries in the saved log
    pub entries: usize,
    /// Lines dropped as undecodable
    pub rejected_lines: usize,
    /// Logs held by the store after saving
    pub retained_logs: usize,
}

pub struct DiveLogSession<A, S> {
    adapter: A,
    store: Arc<LogStore<S>>,
    matcher: MatchingEngine,
    config: SyncConfig,
    reassembler: FrameReassembler,
    entries: Vec<LogEntry>,
    rejected_lines: usize,
    state: watch::Sender<SessionState>,
}

impl<A, S> DiveLogSession<A, S>
where
    A: BleAdapter,
    S: KeyValueStore,
{
    pub fn new(adapter: A, store: Arc<LogStore<S>>, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            adapter,
            store,
            matcher: MatchingEngine::new(config.match_tolerance_secs),
            reassembler: FrameReassembler::with_max_buffer(config.max_buffer_bytes),
            config,
            entries: Vec::new(),
            rejected_lines: 0,
            state,
        }
    }

    /// Observe state transitions. The last value seen is always terminal
    /// once the session has finished.
    pub fn state_updates(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SessionState) {
        info!(state = ?next, device = %self.config.device_name, "Sync session state");
        self.state.send_replace(next);
    }

    /// Drive the session to completion or failure.
    pub async fn run(mut self) -> Result<SyncReport, SyncError> {
        let outcome = self.sync().await;
        match &outcome {
            Ok(report) => {
                info!(
                    entries = report.entries,
                    rejected_lines = report.rejected_lines,
                    "Dive log synced"
                );
                self.transition(SessionState::Completed);
            }
            Err(err) => {
                warn!(%err, received = self.entries.len(), "Dive log sync failed");
                self.transition(SessionState::Failed);
            }
        }
        outcome
    }

    async fn sync(&mut self) -> Result<SyncReport, SyncError> {
        let phase_timeout = self.config.scan_timeout();

        self.transition(SessionState::Scanning);
        let device = timeout(phase_timeout, self.adapter.scan(&self.config.device_name))
            .await
            .map_err(|_| SyncError::ScanTimeout(self.config.device_name.clone()))??;
        debug!(id = %device.id, rssi = device.rssi, "Found logger");

        self.transition(SessionState::Connecting);
        let mut link = timeout(phase_timeout, self.adapter.connect(&device))
            .await
            .map_err(|_| SyncError::ConnectTimeout)??;

        let received = self.receive(&mut link).await;
        if let Err(err) = self.adapter.disconnect(&mut link).await {
            warn!(%err, "Disconnect failed");
        }
        let log = received?;

        let entries = log.len();
        let retained_logs = self.store.save_log(log)?;
        self.matcher.run(&*self.store)?;

        Ok(SyncReport {
            entries,
            rejected_lines: self.rejected_lines,
            retained_logs,
        })
    }

    async fn receive(&mut self, link: &mut A::Session) -> Result<DiveLog, SyncError> {
        let session_timeout = self.config.session_timeout();
        let deadline = Instant::now() + session_timeout;

        self.transition(SessionState::Subscribing);
        let services = within(deadline, session_timeout, self.adapter.discover_services(link))
            .await??;
        let (service, characteristic) = find_characteristic(
            &services,
            &self.config.service_uuid,
            &self.config.characteristic_uuid,
        )?;
        let mut stream = within(
            deadline,
            session_timeout,
            self.adapter.subscribe(link, &service, &characteristic),
        )
        .await??;

        self.transition(SessionState::Receiving);
        loop {
            let payload = match within(deadline, session_timeout, stream.next()).await? {
                Some(Ok(payload)) => payload,
                Some(Err(err)) => return Err(err.into()),
                None => return Err(SyncError::StreamEnded),
            };
            let fragment = decode_payload(&payload)?;
            if self.ingest(&fragment) {
                return Ok(DiveLog::new(std::mem::take(&mut self.entries)));
            }
        }
    }

    /// Feed one fragment; returns `true` once the terminal record is seen.
    fn ingest(&mut self, fragment: &str) -> bool {
        for event in self.reassembler.feed(fragment) {
            match event {
                FrameEvent::Record(entry) => {
                    let index = entry.index;
                    debug!(index, ts = entry.timestamp, len = self.entries.len() + 1, "Record");
                    self.entries.push(entry);
                    if index == self.config.terminal_index {
                        info!(entries = self.entries.len(), "Terminal record received");
                        return true;
                    }
                }
                FrameEvent::Rejected(err) => {
                    warn!(%err, "Dropping undecodable line");
                    self.rejected_lines += 1;
                }
            }
        }
        false
    }
}

impl<A, S> DiveLogSession<A, S>
where
    A: BleAdapter + 'static,
    A::Session: 'static,
    S: KeyValueStore + 'static,
{
    /// Run the session on the tokio runtime.
    pub fn spawn(self) -> JoinHandle<Result<SyncReport, SyncError>> {
        tokio::spawn(self.run())
    }
}

async fn within<F: std::future::Future>(
    deadline: Instant,
    limit: Duration,
    future: F,
) -> Result<F::Output, SyncError> {
    timeout_at(deadline, future)
        .await
        .map_err(|_| SyncError::SessionTimeout(limit))
}
