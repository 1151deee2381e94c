// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Append-only trace log of MMIO and interrupt activity.
//!
//! One record per line, tab-separated with `|` as the quote character so the
//! files stay greppable. All numerics are base-10; the timestamp is a float.
//! For ENTER/EXIT records `addr` carries the interrupt number and the
//! remaining fields are zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("trace I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("trace format error: {0}")]
    Format(#[from] csv::Error),
}

pub type TraceResult<T> = Result<T, TraceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKind {
    Read,
    Write,
    Enter,
    Exit,
}

impl AccessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessKind::Read => "READ",
            AccessKind::Write => "WRITE",
            AccessKind::Enter => "ENTER",
            AccessKind::Exit => "EXIT",
        }
    }

    pub fn is_mmio(&self) -> bool {
        matches!(self, AccessKind::Read | AccessKind::Write)
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ" => Ok(AccessKind::Read),
            "WRITE" => Ok(AccessKind::Write),
            "ENTER" => Ok(AccessKind::Enter),
            "EXIT" => Ok(AccessKind::Exit),
            other => Err(format!("unknown access kind '{}'", other)),
        }
    }
}

/// One observed access. The atomic unit of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub kind: AccessKind,
    pub seq: u64,
    /// MMIO address for READ/WRITE, interrupt number for ENTER/EXIT.
    pub addr: u32,
    pub value: u32,
    pub pc: u32,
    /// Access width in bytes (1, 2 or 4).
    pub size: u32,
    /// Wall-clock seconds.
    pub timestamp: f64,
}

impl AccessRecord {
    fn to_row(self) -> [String; 7] {
        [
            self.kind.as_str().to_string(),
            self.seq.to_string(),
            self.addr.to_string(),
            self.value.to_string(),
            self.pc.to_string(),
            self.size.to_string(),
            format!("{}", self.timestamp),
        ]
    }

    fn parse_row(row: &csv::StringRecord) -> Result<Self, String> {
        if row.len() < 7 {
            return Err(format!("expected 7 fields, got {}", row.len()));
        }
        let field = |i: usize| row.get(i).unwrap_or("");
        Ok(AccessRecord {
            kind: field(0).parse()?,
            seq: field(1).parse().map_err(|e| format!("seq: {}", e))?,
            addr: field(2).parse().map_err(|e| format!("addr: {}", e))?,
            value: field(3).parse().map_err(|e| format!("value: {}", e))?,
            pc: field(4).parse().map_err(|e| format!("pc: {}", e))?,
            size: field(5).parse().map_err(|e| format!("size: {}", e))?,
            timestamp: field(6)
                .parse()
                .map_err(|e| format!("timestamp: {}", e))?,
        })
    }
}

fn csv_writer(path: &Path) -> TraceResult<csv::Writer<BufWriter<File>>> {
    let file = File::create(path)?;
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote(b'|')
        .has_headers(false)
        .from_writer(BufWriter::new(file)))
}

fn csv_reader(path: &Path) -> TraceResult<csv::Reader<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quote(b'|')
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file)))
}

/// Append-only trace writer. Flushes on `close` and on drop.
pub struct LogWriter {
    writer: csv::Writer<BufWriter<File>>,
}

impl LogWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> TraceResult<Self> {
        Ok(Self {
            writer: csv_writer(path.as_ref())?,
        })
    }

    pub fn write_record(&mut self, record: &AccessRecord) -> TraceResult<()> {
        self.writer.write_record(record.to_row())?;
        Ok(())
    }

    pub fn close(mut self) -> TraceResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Forward reader over a trace file. Yields records in insertion order and
/// skips malformed rows with a warning.
pub struct LogReader {
    reader: csv::Reader<BufReader<File>>,
}

impl LogReader {
    pub fn open<P: AsRef<Path>>(path: P) -> TraceResult<Self> {
        Ok(Self {
            reader: csv_reader(path.as_ref())?,
        })
    }

    pub fn records(self) -> impl Iterator<Item = AccessRecord> {
        self.reader
            .into_records()
            .filter_map(|row| match row {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::warn!("Skipping unreadable trace row: {}", e);
                    None
                }
            })
            .filter_map(|row| match AccessRecord::parse_row(&row) {
                Ok(rec) => Some(rec),
                Err(e) => {
                    tracing::warn!("Skipping malformed trace row {:?}: {}", row, e);
                    None
                }
            })
    }
}

/// Read a whole trace into memory.
pub fn read_trace<P: AsRef<Path>>(path: P) -> TraceResult<Vec<AccessRecord>> {
    Ok(LogReader::open(path)?.records().collect())
}

/// Recording front-end handle.
///
/// Owns the log writer and the monotonic sequence counter, so recording has
/// no process-global state. The handle is shared between the read/write tee
/// and the interrupt hooks, which may run on different threads.
pub struct TraceRecorder {
    writer: Mutex<LogWriter>,
    seq: AtomicU64,
}

impl TraceRecorder {
    pub fn create<P: AsRef<Path>>(path: P) -> TraceResult<Self> {
        Ok(Self {
            writer: Mutex::new(LogWriter::create(path)?),
            seq: AtomicU64::new(0),
        })
    }

    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn record(&self, kind: AccessKind, addr: u32, value: u32, pc: u32, size: u32) {
        let record = AccessRecord {
            kind,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            addr,
            value,
            pc,
            size,
            timestamp: Self::now(),
        };
        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writer.write_record(&record) {
            tracing::warn!("Failed to append trace record: {}", e);
        }
    }

    pub fn record_read(&self, addr: u32, value: u32, pc: u32, size: u32) {
        self.record(AccessKind::Read, addr, value, pc, size);
    }

    pub fn record_write(&self, addr: u32, value: u32, pc: u32, size: u32) {
        self.record(AccessKind::Write, addr, value, pc, size);
    }

    pub fn record_enter(&self, irq: u32) {
        self.record(AccessKind::Enter, irq, 0, 0, 0);
    }

    pub fn record_exit(&self, irq: u32) {
        self.record(AccessKind::Exit, irq, 0, 0, 0);
    }

    pub fn close(self) -> TraceResult<()> {
        self.writer.into_inner().unwrap_or_else(|p| p.into_inner()).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: AccessKind, seq: u64, addr: u32, value: u32) -> AccessRecord {
        AccessRecord {
            kind,
            seq,
            addr,
            value,
            pc: 0x0800_1234,
            size: 4,
            timestamp: 0.25 * seq as f64,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.tsv");

        let records = vec![
            record(AccessKind::Write, 0, 0x4000_4400, 0x55),
            record(AccessKind::Read, 1, 0x4000_4400, 0x55),
            record(AccessKind::Enter, 2, 28, 0),
            record(AccessKind::Exit, 3, 28, 0),
        ];

        let mut writer = LogWriter::create(&path).unwrap();
        for r in &records {
            writer.write_record(r).unwrap();
        }
        writer.close().unwrap();

        let back = read_trace(&path).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.tsv");
        std::fs::write(
            &path,
            "READ\t0\t1073759232\t85\t134222388\t4\t1.5\n\
             garbage line\n\
             POKE\t1\t1\t1\t1\t1\t1.0\n\
             WRITE\t2\t1073759232\t170\t134222388\t4\t2.5\n",
        )
        .unwrap();

        let back = read_trace(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].kind, AccessKind::Read);
        assert_eq!(back[1].kind, AccessKind::Write);
        assert_eq!(back[1].value, 170);
    }

    #[test]
    fn test_recorder_sequences_and_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.tsv");

        let recorder = TraceRecorder::create(&path).unwrap();
        recorder.record_write(0x4002_0010, 0x01, 0x0800_0100, 4);
        recorder.record_enter(28);
        recorder.record_exit(28);
        recorder.record_read(0x4002_0010, 0x01, 0x0800_0104, 4);
        recorder.close().unwrap();

        let back = read_trace(&path).unwrap();
        let seqs: Vec<u64> = back.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(back[1].kind, AccessKind::Enter);
        assert_eq!(back[1].addr, 28);
        assert_eq!(back[1].value, 0);
    }
}
