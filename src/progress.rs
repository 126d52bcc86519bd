//! Scan progress eventing.
//!
//! The orchestrator writes events unconditionally through a [`ProgressSink`];
//! delivery is best-effort and at-most-once, with no replay. Zero or many
//! subscribers must not change the orchestrator's behavior or results: a
//! client that disconnects mid-scan simply stops observing, and the scan
//! still persists what it accepts.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::broadcast;

use serde::Serialize;

use crate::models::DocumentSummary;

/// Rotation of generic phrases used when the orchestrator has nothing more
/// specific to report for a processed message.
pub const STATUS_PHRASES: &[&str] = &[
    "Scanning your inbox...",
    "Reading message attachments...",
    "Checking documents for warranty terms...",
    "Still working...",
];

/// Capacity of each per-client broadcast channel. Slow subscribers that lag
/// past this lose old events rather than stalling the scan.
const CHANNEL_CAPACITY: usize = 256;

/// A single scan lifecycle event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Status {
        message: String,
        step: u32,
        total: u32,
    },
    Progress {
        current: u32,
        total: u32,
        message: String,
    },
    Complete {
        total: u32,
        documents: Vec<DocumentSummary>,
    },
    Error {
        error: String,
    },
}

impl ProgressEvent {
    /// Event name used on the wire (SSE event field).
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Status { .. } => "status",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

/// Where the orchestrator pushes events. Implementations must never block
/// the scan or surface delivery failures.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// No-op sink for callers that only want the final report.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Human-friendly progress on stderr for the CLI scan path. Stdout stays
/// parseable for scripts.
pub struct StderrSink;

impl ProgressSink for StderrSink {
    fn emit(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Status { message, .. } => format!("scan  {}\n", message),
            ProgressEvent::Progress {
                current,
                total,
                message,
            } => format!("scan  {} / {} messages  {}\n", current, total, message),
            ProgressEvent::Complete { total, .. } => {
                format!("scan  complete  {} documents accepted\n", total)
            }
            ProgressEvent::Error { error } => format!("scan  error  {}\n", error),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Sink backed by a broadcast channel. Sending with no subscriber is a no-op.
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for BroadcastSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Process-wide map of client id → broadcast channel, connecting SSE
/// subscribers to the scans they initiated. Clients subscribe before
/// starting an asynchronous scan so they cannot miss the completion event.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the sender for a client id.
    pub fn sender(&self, client_id: &str) -> broadcast::Sender<ProgressEvent> {
        let mut channels = self
            .channels
            .lock()
            .expect("channel registry mutex poisoned");
        channels
            .entry(client_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn subscribe(&self, client_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.sender(client_id).subscribe()
    }
}

/// Progress mode for the CLI: off or human-readable on stderr.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn sink(&self) -> Box<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Box::new(NullSink),
            ProgressMode::Human => Box::new(StderrSink),
        }
    }
}
