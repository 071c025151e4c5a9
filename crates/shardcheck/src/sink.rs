//! Result persistence and reporting.
//!
//! The orchestrator hands every collected key set and the final duplicate
//! summary to a [`ResultSink`]. Sink failures never abort a run; the
//! orchestrator logs them and moves on.

use crate::types::{DuplicateSummary, SinkError};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// Destination for key dumps and the duplicate report.
pub trait ResultSink: Send + Sync {
    /// Persist one shard's key set. `index` is the shard's position in
    /// scan order.
    fn persist_key_set(
        &self,
        index: usize,
        core_name: &str,
        keys: &HashSet<String>,
    ) -> Result<(), SinkError>;

    /// Publish the duplicate summary of a successful run.
    fn emit_report(&self, summary: &DuplicateSummary) -> Result<(), SinkError>;
}

/// Writes `idlist_<index>.txt` files and logs the report.
#[derive(Debug, Clone)]
pub struct FileSink {
    output_dir: PathBuf,
    report_path: Option<PathBuf>,
}

impl FileSink {
    /// Create a sink writing key dumps into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            report_path: None,
        }
    }

    /// Also write the summary as JSON to `path`.
    pub fn with_report(mut self, path: Option<PathBuf>) -> Self {
        self.report_path = path;
        self
    }

    /// Path of the key dump for the shard at `index`.
    pub fn key_set_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("idlist_{}.txt", index))
    }
}

impl ResultSink for FileSink {
    fn persist_key_set(
        &self,
        index: usize,
        core_name: &str,
        keys: &HashSet<String>,
    ) -> Result<(), SinkError> {
        let path = self.key_set_path(index);
        write_key_set(&path, keys)?;
        info!(core = core_name, path = %path.display(), keys = keys.len(), "Wrote key list");
        Ok(())
    }

    fn emit_report(&self, summary: &DuplicateSummary) -> Result<(), SinkError> {
        info!("{} Duplicated IDs:", summary.total);
        for record in summary.records() {
            info!("{}:{:?}", record.key, record.shards);
        }

        if let Some(ref path) = self.report_path {
            let file = File::create(path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, summary)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            info!(path = %path.display(), "Wrote duplicate report");
        }
        Ok(())
    }
}

/// Write keys one per line, sorted.
///
/// Backslash, CR and LF are escaped as `\\`, `\r` and `\n` so every key
/// stays on its own line and reads back unchanged.
pub fn write_key_set(path: &Path, keys: &HashSet<String>) -> Result<(), SinkError> {
    let mut sorted: Vec<&String> = keys.iter().collect();
    sorted.sort_unstable();

    let mut writer = BufWriter::new(File::create(path)?);
    for key in sorted {
        writer.write_all(escape_key(key).as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a key dump back into a set.
pub fn read_key_set(path: &Path) -> Result<HashSet<String>, SinkError> {
    let reader = BufReader::new(File::open(path)?);
    let mut keys = HashSet::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let key = unescape_key(&line).ok_or_else(|| {
            SinkError::Serialization(format!(
                "{}:{}: invalid escape in key line",
                path.display(),
                number + 1
            ))
        })?;
        keys.insert(key);
    }
    Ok(keys)
}

fn escape_key(key: &str) -> Cow<'_, str> {
    if !key.contains(['\\', '\r', '\n']) {
        return Cow::Borrowed(key);
    }
    let mut escaped = String::with_capacity(key.len() + 2);
    for c in key.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\r' => escaped.push_str("\\r"),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

fn unescape_key(line: &str) -> Option<String> {
    let mut key = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            key.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => key.push('\\'),
            'r' => key.push('\r'),
            'n' => key.push('\n'),
            _ => return None,
        }
    }
    Some(key)
}

/// Keeps everything in memory. Useful when embedding the check.
#[derive(Debug, Default)]
pub struct MemorySink {
    key_sets: Mutex<HashMap<usize, (String, HashSet<String>)>>,
    report: Mutex<Option<DuplicateSummary>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Core name and keys persisted for `index`.
    pub fn key_set(&self, index: usize) -> Option<(String, HashSet<String>)> {
        self.key_sets
            .lock()
            .ok()
            .and_then(|sets| sets.get(&index).cloned())
    }

    /// Number of persisted key sets.
    pub fn key_set_count(&self) -> usize {
        self.key_sets.lock().map(|sets| sets.len()).unwrap_or(0)
    }

    /// The last emitted report.
    pub fn report(&self) -> Option<DuplicateSummary> {
        self.report.lock().ok().and_then(|r| r.clone())
    }
}

impl ResultSink for MemorySink {
    fn persist_key_set(
        &self,
        index: usize,
        core_name: &str,
        keys: &HashSet<String>,
    ) -> Result<(), SinkError> {
        let mut sets = self
            .key_sets
            .lock()
            .map_err(|_| SinkError::Serialization("key set store poisoned".into()))?;
        sets.insert(index, (core_name.to_string(), keys.clone()));
        Ok(())
    }

    fn emit_report(&self, summary: &DuplicateSummary) -> Result<(), SinkError> {
        let mut report = self
            .report
            .lock()
            .map_err(|_| SinkError::Serialization("report store poisoned".into()))?;
        *report = Some(summary.clone());
        Ok(())
    }
}
