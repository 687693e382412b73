//! Work item models: the unit of work executed by a worker pod, plus the
//! wire records exchanged over the work-item HTTP protocol.

use serde::{Deserialize, Serialize};

use super::operation::DataOperation;

/// Work item lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Ready,
    Running,
    Successful,
    Failed,
    Warning,
}

impl WorkItemStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkItemStatus::Ready | WorkItemStatus::Running)
    }
}

/// One sidecar invocation's worth of work. Owned by the work-item store; a
/// pod holds a lease while executing and must report terminal status or let
/// the lease expire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: u64,
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "serviceID")]
    pub service_id: String,
    pub step_index: u32,
    pub status: WorkItemStatus,
    /// Paging cursor for CMR-query items
    #[serde(rename = "scrollID", default, skip_serializing_if = "Option::is_none")]
    pub scroll_id: Option<String>,
    pub operation: DataOperation,
    /// Input STAC catalog handed to the sidecar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stac_catalog_location: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    /// Execution duration in milliseconds
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub sort_index: u32,
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default)]
    pub output_item_sizes: Vec<u64>,
    #[serde(default)]
    pub total_items_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hits: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "message_category", default, skip_serializing_if = "Option::is_none")]
    pub message_category: Option<String>,
}

impl WorkItem {
    #[must_use]
    pub fn new(
        id: u64,
        job_id: String,
        service_id: String,
        step_index: u32,
        operation: DataOperation,
    ) -> Self {
        Self {
            id,
            job_id,
            service_id,
            step_index,
            status: WorkItemStatus::Ready,
            scroll_id: None,
            operation,
            stac_catalog_location: None,
            retry_count: 0,
            duration: 0,
            sort_index: 0,
            results: Vec::new(),
            output_item_sizes: Vec::new(),
            total_items_size: 0,
            hits: None,
            message: None,
            message_category: None,
        }
    }
}

/// Body of a successful work GET: one item plus an optional CMR page cap
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkResponse {
    pub work_item: WorkItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cmr_granules: Option<u32>,
}

/// Terminal result record PUT back to the work-item endpoint. The echoed
/// operation has its source variables stripped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemUpdate {
    pub id: u64,
    pub status: WorkItemStatus,
    pub duration: u64,
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default)]
    pub output_item_sizes: Vec<u64>,
    #[serde(default)]
    pub total_items_size: u64,
    #[serde(rename = "scrollID", default, skip_serializing_if = "Option::is_none")]
    pub scroll_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hits: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "message_category", default, skip_serializing_if = "Option::is_none")]
    pub message_category: Option<String>,
    pub operation: DataOperation,
}

impl WorkItemUpdate {
    /// Build the update record for a finished item, stripping echoed variables
    #[must_use]
    pub fn from_item(item: &WorkItem) -> Self {
        let mut operation = item.operation.clone();
        operation.strip_variables();
        Self {
            id: item.id,
            status: item.status,
            duration: item.duration,
            results: item.results.clone(),
            output_item_sizes: item.output_item_sizes.clone(),
            total_items_size: item.total_items_size,
            scroll_id: item.scroll_id.clone(),
            hits: item.hits,
            message: item.message.clone(),
            message_category: item.message_category.clone(),
            operation,
        }
    }
}
