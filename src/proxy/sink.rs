//! Record sinks for emitted exchange and lifecycle records
//!
//! The sink handle is constructor-injected into every component that emits
//! records (no global logger singleton), which lets tests swap in a capturing
//! double. Emission is fire-and-forget: a sink failure is swallowed with a
//! local diagnostic and never surfaces to the HTTP client.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::proxy::exchange::Exchange;
use crate::proxy::lifecycle::LifecycleRecord;

/// A record handed to the sink
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Record {
    Exchange(Exchange),
    Lifecycle(LifecycleRecord),
}

/// Destination for emitted records
///
/// `emit` must not block the request path and must not propagate failures;
/// persistence and rotation policy belong to the sink, not the inspection
/// layer. Writes are serialized per sink, but completion order across
/// concurrent exchanges is not guaranteed.
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: Record);
}

/// Sink writing one JSON object per line to an owned writer
///
/// The mutex guarantees no interleaved partial lines under concurrency.
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }
}

impl RecordSink for JsonLinesSink {
    fn emit(&self, record: Record) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(error) => {
                warn!(%error, "Failed to serialize record, dropping it");
                return;
            }
        };

        let mut writer = self.writer.lock();
        if let Err(error) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            warn!(%error, "Failed to write record to sink");
        }
    }
}

/// Sink forwarding records as structured tracing events
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn emit(&self, record: Record) {
        match serde_json::to_string(&record) {
            Ok(json) => info!(target: "glasswire::traffic", record = %json),
            Err(error) => warn!(%error, "Failed to serialize record, dropping it"),
        }
    }
}

/// Test double collecting every emitted record for assertions
#[derive(Default)]
pub struct CaptureSink {
    records: Mutex<Vec<Record>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| match record {
                Record::Exchange(exchange) => Some(exchange.clone()),
                Record::Lifecycle(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordSink for CaptureSink {
    fn emit(&self, record: Record) {
        self.records.lock().push(record);
    }
}
