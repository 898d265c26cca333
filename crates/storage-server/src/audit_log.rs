//! Append-only CSV audit trail, the durable record `storage_server.c`'s
//! `log_record()` mandated. One record per request-handling decision point;
//! `tracing` carries the same information for human operators, this is the
//! structured sink meant to be grepped/parsed later.
//!
//! A write failure here is reported to stderr and never propagated to the
//! caller — per the spec, logging must never abort a request in flight.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

pub const HEADER: &str = "TIME,THREAD_ID,OPERATION,OUTCOME,CLIENT_ID,FILE,BYTES_PROCESSED,CURR_FILES,CURR_BYTES,CURR_CLIENTS";

/// One CSV row. Fields may legally be empty (e.g. `file` for `read_many`,
/// `client_id` for a server-wide event like shutdown).
#[derive(Debug, Clone, Default)]
pub struct LogRecord {
    pub operation: String,
    pub outcome: String,
    pub client_id: String,
    pub file: String,
    pub bytes_processed: String,
    pub curr_files: String,
    pub curr_bytes: String,
    pub curr_clients: String,
}

pub struct AuditLog {
    file: Mutex<File>,
}

impl AuditLog {
    /// Creates (truncating, like the original's `fopen(path, "w")`) the log
    /// file and writes the header line.
    pub fn create(path: &str) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        writeln!(file, "{HEADER}")?;
        file.flush()?;
        Ok(Self { file: Mutex::new(file) })
    }

    /// Appends one record under the internal mutex. Errors are reported to
    /// stderr and swallowed: see module docs.
    pub fn record(&self, thread_id: u64, record: &LogRecord) {
        let line = format!(
            "{},{thread_id},{},{},{},{},{},{},{},{}",
            timestamp(),
            record.operation,
            record.outcome,
            record.client_id,
            record.file,
            record.bytes_processed,
            record.curr_files,
            record.curr_bytes,
            record.curr_clients,
        );
        let mut file = self.file.lock();
        if let Err(err) = writeln!(file, "{line}").and_then(|()| file.flush()) {
            eprintln!("ERR: could not write audit log record: {err}");
        }
    }
}

/// Seconds since the epoch. Wall-clock time is appropriate here (unlike
/// `storage-core`'s logical ticks) since this is a human-facing audit trail,
/// not an ordering primitive.
fn timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_header_on_create() {
        let path = std::env::temp_dir().join(format!("audit-log-test-{}.csv", std::process::id()));
        let path = path.to_str().unwrap().to_owned();
        let log = AuditLog::create(&path).unwrap();
        log.record(1, &LogRecord { operation: "OPEN".into(), outcome: "OK".into(), ..Default::default() });

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.starts_with(HEADER));
        assert!(contents.contains("OPEN"));
        std::fs::remove_file(&path).ok();
    }
}
