use super::traits::{OutputError, OutputRecord, OutputResult, ResultSink};
use crate::target::CrawlTarget;
use chrono::Utc;
use serde_json::Value;
use std::sync::Mutex;

/// Keeps results in memory; used by tests and dry runs
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<OutputRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every accepted record, oldest first
    pub fn records(&self) -> Vec<OutputRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ResultSink for MemorySink {
    fn accept(&self, target: &CrawlTarget, payload: &Value) -> OutputResult<()> {
        self.records
            .lock()
            .map_err(|_| OutputError::Write("memory sink lock poisoned".to_string()))?
            .push(OutputRecord::new(target, payload, Utc::now()));
        Ok(())
    }
}
