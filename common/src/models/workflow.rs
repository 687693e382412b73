//! Workflow step: one position in a service's pipeline. Steps form a static
//! DAG described by the planner; the worker is oblivious to chaining.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    #[serde(rename = "jobID")]
    pub job_id: String,
    pub step_index: u32,
    /// Image reference executed for this step
    #[serde(rename = "serviceID")]
    pub service_id: String,
    /// The data operation serialized at a pinned schema version
    pub operation: String,
    pub work_item_count: u32,
    #[serde(default)]
    pub is_sequential: bool,
}
