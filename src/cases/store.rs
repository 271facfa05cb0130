//! # Case Stores
//!
//! Append-only sinks for `{case_id, event}` records.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::errors::CaseStoreError;
use crate::events::ExecutionEvent;

/// One event logged under one case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: String,
    pub event: ExecutionEvent,
}

#[async_trait]
pub trait CaseStore: Send + Sync + std::fmt::Debug {
    async fn append(&self, record: &CaseRecord) -> Result<(), CaseStoreError>;
}

/// Case store kept in memory, used by tests and the `memory` backend
#[derive(Debug, Default)]
pub struct InMemoryCaseStore {
    records: Mutex<Vec<CaseRecord>>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CaseRecord> {
        self.records.lock().clone()
    }

    pub fn records_for(&self, case_id: &str) -> Vec<CaseRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.case_id == case_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn append(&self, record: &CaseRecord) -> Result<(), CaseStoreError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Append-only JSON lines file, one record per line
#[derive(Debug)]
pub struct JsonLinesCaseStore {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl JsonLinesCaseStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CaseStoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CaseStoreError::io(path.display().to_string(), e.to_string()))?;
        info!(path = %path.display(), "📒 Case store opened");
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CaseStore for JsonLinesCaseStore {
    async fn append(&self, record: &CaseRecord) -> Result<(), CaseStoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| CaseStoreError::io(self.path.display().to_string(), e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| CaseStoreError::io(self.path.display().to_string(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use serde_json::json;
    use uuid::Uuid;

    fn record(case_id: &str) -> CaseRecord {
        let id = Uuid::new_v4();
        CaseRecord {
            case_id: case_id.to_string(),
            event: ExecutionEvent::new(id, "wf", id.to_string(), EventType::Started, json!({})),
        }
    }

    #[tokio::test]
    async fn test_json_lines_store_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.jsonl");

        let store = JsonLinesCaseStore::open(&path).await.unwrap();
        store.append(&record("case-1")).await.unwrap();
        store.append(&record("case-2")).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<CaseRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].case_id, "case-1");
        assert_eq!(lines[1].case_id, "case-2");
    }

    #[tokio::test]
    async fn test_in_memory_store_filters_by_case() {
        let store = InMemoryCaseStore::new();
        store.append(&record("a")).await.unwrap();
        store.append(&record("b")).await.unwrap();
        assert_eq!(store.records().len(), 2);
        assert_eq!(store.records_for("a").len(), 1);
    }
}
