//! Optional process-wide trace sink.
//!
//! Every decoded sequence can be recorded as `(time, escape_seq,
//! printable, direction)` for durable inspection. The storage format is
//! JSON Lines; the schema and time ordering are the contract, the
//! format is not. Writers serialize through an internal buffer.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which way the traffic flowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceDirection {
    Input,
    Output,
}

/// One trace row. `time` is microseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub time: u64,
    pub escape_seq: String,
    pub printable: String,
    pub direction: TraceDirection,
}

struct Sink {
    writer: Mutex<BufWriter<File>>,
}

static SINK: RwLock<Option<Sink>> = RwLock::new(None);

/// Install the process-wide sink, truncating any existing file.
pub fn init(path: impl AsRef<Path>) -> io::Result<()> {
    let file = File::create(path)?;
    let sink = Sink {
        writer: Mutex::new(BufWriter::new(file)),
    };
    *SINK.write().expect("trace sink lock poisoned") = Some(sink);
    Ok(())
}

/// Flush and remove the sink. Also the test-mode reset.
pub fn shutdown() {
    let mut guard = SINK.write().expect("trace sink lock poisoned");
    if let Some(sink) = guard.take() {
        let mut writer = sink.writer.lock().expect("trace writer poisoned");
        if let Err(error) = writer.flush() {
            debug!(%error, "trace sink flush on shutdown failed");
        }
    }
}

pub fn is_enabled() -> bool {
    SINK.read().expect("trace sink lock poisoned").is_some()
}

/// Record one decoded sequence. A missing sink or a write failure never
/// disturbs the caller.
pub fn record(direction: TraceDirection, escape_seq: &str, printable: &str) {
    let guard = SINK.read().expect("trace sink lock poisoned");
    let Some(sink) = guard.as_ref() else {
        return;
    };
    let record = TraceRecord {
        time: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0),
        escape_seq: escape_seq.to_string(),
        printable: printable.to_string(),
        direction,
    };
    let mut writer = sink.writer.lock().expect("trace writer poisoned");
    match serde_json::to_string(&record) {
        Ok(line) => {
            if let Err(error) = writeln!(writer, "{line}") {
                debug!(%error, "trace record write failed");
            }
        }
        Err(error) => debug!(%error, "trace record serialization failed"),
    }
}

/// Record raw emitted bytes (responses, reports) in escaped form.
pub fn record_output_bytes(bytes: &[u8]) {
    if bytes.is_empty() || !is_enabled() {
        return;
    }
    record(TraceDirection::Output, &escape_bytes(bytes), "");
}

pub fn flush() {
    let guard = SINK.read().expect("trace sink lock poisoned");
    if let Some(sink) = guard.as_ref() {
        let mut writer = sink.writer.lock().expect("trace writer poisoned");
        if let Err(error) = writer.flush() {
            debug!(%error, "trace sink flush failed");
        }
    }
}

/// Render bytes with controls in `\xNN` form, e.g. `\x1b[1;31m`.
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}
