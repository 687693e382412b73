//! Log stream (C7)
//!
//! Captures the sidecar's stdout line by line. JSON lines are kept verbatim
//! (with `timestamp` and `level` renamed so the wrapper's own fields don't
//! collide) and everything is re-emitted through the structured logger at
//! debug with a `worker` marker. The accumulated entries upload to the
//! object store under a per-work-item key, appending across retries.

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use crate::object_store::ObjectStore;

pub struct LogStream {
    entries: Vec<Value>,
}

impl LogStream {
    /// Start a capture, bracketed with a retry header for the work item
    #[must_use]
    pub fn new(retry_count: u32, work_item_id: u64) -> Self {
        Self {
            entries: vec![Value::String(format!(
                "Start of service execution (retryCount={retry_count}, id={work_item_id})"
            ))],
        }
    }

    /// Consume one stdout chunk, splitting on newlines. Non-JSON lines are
    /// stored verbatim, whitespace included.
    pub fn append_chunk(&mut self, chunk: &str) {
        for line in chunk.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(mut entry)) => {
                    if let Some(timestamp) = entry.remove("timestamp") {
                        entry.insert("workerTimestamp".to_string(), timestamp);
                    }
                    if let Some(level) = entry.remove("level") {
                        entry.insert("workerLevel".to_string(), level);
                    }
                    let entry = Value::Object(entry);
                    debug!(worker = true, "{}", entry);
                    self.entries.push(entry);
                }
                _ => {
                    debug!(worker = true, "{}", line);
                    self.entries.push(Value::String(line.to_string()));
                }
            }
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    /// Upload the captured entries. An existing log file (from a retried
    /// item) is read first and the new entries appended to it.
    pub async fn upload(&self, store: &dyn ObjectStore, url: &str) -> Result<()> {
        let mut combined: Vec<Value> = match store.get_object(url).await {
            Ok(existing) => serde_json::from_slice(&existing).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        combined.extend(self.entries.iter().cloned());
        store.put_object(url, serde_json::to_vec(&combined)?).await
    }
}

/// Per-work-item log location
#[must_use]
pub fn log_url(artifact_bucket: &str, job_id: &str, work_item_id: u64) -> String {
    format!("s3://{artifact_bucket}/{job_id}/{work_item_id}/logs.json")
}
