//! JSON-lines result file

use super::traits::{OutputError, OutputRecord, OutputResult, ResultSink};
use crate::target::CrawlTarget;
use chrono::Utc;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Appends one JSON object per successful crawl to a file
///
/// Each line is flushed as soon as it is written, so a reader tailing the
/// file never sees a partial record from a live worker.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it and its parent directory
    pub fn open(path: impl AsRef<Path>) -> OutputResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonLinesSink {
    fn accept(&self, target: &CrawlTarget, payload: &Value) -> OutputResult<()> {
        let record = OutputRecord::new(target, payload, Utc::now());
        let line = serde_json::to_string(&record)?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| OutputError::Write(format!("{} writer lock poisoned", self.path.display())))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}
