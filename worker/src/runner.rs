//! Execution outcome types and the routing executor
//!
//! Work items carrying a scroll cursor go to the local CMR-query endpoint;
//! everything else goes through sidecar exec. Either way the result is a
//! `WorkOutcome` the puller folds back onto the work item.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use harmony_common::models::{WorkItem, WorkItemStatus};

use crate::logstream::{log_url, LogStream};
use crate::object_store::ObjectStore;
use crate::query::QueryClient;
use crate::sidecar::SidecarRunner;

/// Result of executing one work item
#[derive(Debug, Clone)]
pub struct WorkOutcome {
    pub status: WorkItemStatus,
    pub results: Vec<String>,
    pub output_item_sizes: Vec<u64>,
    pub total_items_size: u64,
    pub scroll_id: Option<String>,
    pub hits: Option<u64>,
    pub message: Option<String>,
    pub message_category: Option<String>,
}

impl WorkOutcome {
    #[must_use]
    pub fn successful(results: Vec<String>, output_item_sizes: Vec<u64>) -> Self {
        let total_items_size = output_item_sizes.iter().sum();
        Self {
            status: WorkItemStatus::Successful,
            results,
            output_item_sizes,
            total_items_size,
            scroll_id: None,
            hits: None,
            message: None,
            message_category: None,
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: WorkItemStatus::Failed,
            results: Vec::new(),
            output_item_sizes: Vec::new(),
            total_items_size: 0,
            scroll_id: None,
            hits: None,
            message: Some(message.into()),
            message_category: None,
        }
    }

    #[must_use]
    pub fn failed_with_category(message: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            message_category: Some(category.into()),
            ..Self::failed(message)
        }
    }

    #[must_use]
    pub fn warning(message: impl Into<String>, category: Option<String>) -> Self {
        Self {
            status: WorkItemStatus::Warning,
            message_category: category,
            ..Self::failed(message)
        }
    }

    /// Fold this outcome onto the work item being reported
    pub fn apply_to(&self, item: &mut WorkItem) {
        item.status = self.status;
        item.results = self.results.clone();
        item.output_item_sizes = self.output_item_sizes.clone();
        item.total_items_size = self.total_items_size;
        item.scroll_id = self.scroll_id.clone();
        item.hits = self.hits;
        item.message = self.message.clone();
        item.message_category = self.message_category.clone();
    }
}

/// Executes one work item end to end
#[async_trait]
pub trait WorkItemExecutor: Send + Sync {
    async fn execute(&self, item: &WorkItem, max_cmr_granules: Option<u32>) -> WorkOutcome;
}

/// Production executor: routes scroll-bearing items to the query endpoint and
/// the rest through sidecar exec, uploading captured logs either way the
/// sidecar ran.
pub struct ServiceExecutor {
    sidecar: SidecarRunner,
    query: QueryClient,
    store: Arc<dyn ObjectStore>,
    artifact_bucket: String,
}

impl ServiceExecutor {
    #[must_use]
    pub fn new(
        sidecar: SidecarRunner,
        query: QueryClient,
        store: Arc<dyn ObjectStore>,
        artifact_bucket: String,
    ) -> Self {
        Self {
            sidecar,
            query,
            store,
            artifact_bucket,
        }
    }
}

#[async_trait]
impl WorkItemExecutor for ServiceExecutor {
    async fn execute(&self, item: &WorkItem, max_cmr_granules: Option<u32>) -> WorkOutcome {
        if item.scroll_id.is_some() {
            return self.query.run(item, max_cmr_granules).await;
        }

        let mut logs = LogStream::new(item.retry_count, item.id);
        let outcome = self.sidecar.run(item, &mut logs).await;
        let url = log_url(&self.artifact_bucket, &item.job_id, item.id);
        if let Err(e) = logs.upload(self.store.as_ref(), &url).await {
            warn!("Failed to upload service logs for work item {}: {}", item.id, e);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harmony_common::models::DataOperation;

    #[test]
    fn test_successful_outcome_totals_sizes() {
        let outcome = WorkOutcome::successful(
            vec!["s3://b/j/1/outputs/catalog0.json".to_string()],
            vec![100, 23],
        );
        assert_eq!(outcome.status, WorkItemStatus::Successful);
        assert_eq!(outcome.total_items_size, 123);
    }

    #[test]
    fn test_apply_to_folds_fields() {
        let operation = DataOperation::new(
            "req-1".to_string(),
            "jdoe".to_string(),
            "harmony-test".to_string(),
        );
        let mut item = WorkItem::new(7, "req-1".to_string(), "svc:1".to_string(), 0, operation);
        item.scroll_id = Some("s1".to_string());

        let mut outcome = WorkOutcome::successful(vec!["s3://x/catalog0.json".to_string()], vec![1]);
        outcome.scroll_id = Some("s2".to_string());
        outcome.hits = Some(99);
        outcome.apply_to(&mut item);

        assert_eq!(item.status, WorkItemStatus::Successful);
        assert_eq!(item.scroll_id.as_deref(), Some("s2"));
        assert_eq!(item.hits, Some(99));
        assert_eq!(item.results, vec!["s3://x/catalog0.json".to_string()]);
    }

    #[test]
    fn test_failure_constructors() {
        let failed = WorkOutcome::failed_with_category(
            "Unknown internal server error",
            "Internal server error",
        );
        assert_eq!(failed.status, WorkItemStatus::Failed);
        assert_eq!(failed.message_category.as_deref(), Some("Internal server error"));

        let warning = WorkOutcome::warning("no data in subset", Some("nodata".to_string()));
        assert_eq!(warning.status, WorkItemStatus::Warning);
        assert_eq!(warning.message.as_deref(), Some("no data in subset"));
    }
}
