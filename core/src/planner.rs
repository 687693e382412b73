//! Work planning (C3)
//!
//! Expands a chosen service into a job, its workflow steps, and the initial
//! work items that drive the first step, then persists everything in one
//! atomic store write.

use uuid::Uuid;

use harmony_common::models::{
    DataOperation, DataSource, Job, ServiceConfig, WorkItem, WorkflowStep,
};
use harmony_common::{Error, Result};

use crate::store::WorkStore;

/// System-wide planning limits
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Hard cap on granules processed for any request
    pub max_granule_limit: u32,
    /// Batch size used when a service does not declare one
    pub default_batch_size: u32,
    /// Sync cutoff used when a service does not declare one
    pub max_synchronous_granules: u32,
    /// Page size for the CMR query step
    pub cmr_max_page_size: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_granule_limit: 350_000,
            default_batch_size: 2000,
            max_synchronous_granules: 1,
            cmr_max_page_size: 2000,
        }
    }
}

/// The persisted plan for one request
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub job: Job,
    pub steps: Vec<WorkflowStep>,
    pub initial_items: Vec<WorkItem>,
}

fn div_ceil(dividend: u32, divisor: u32) -> u32 {
    if divisor == 0 {
        0
    } else {
        dividend.div_ceil(divisor)
    }
}

/// Number of granules to process and, when a bound binds, the job message
/// naming it. Bounds are checked most specific first: collection, service,
/// maxResults, then the system cap.
pub fn granule_limits(
    operation: &DataOperation,
    config: &ServiceConfig,
    planner: &PlannerConfig,
) -> (u32, Option<String>) {
    let cmr_hits = operation.cmr_hits;
    let mut bounds: Vec<(u32, String)> = Vec::new();

    for source in &operation.sources {
        if let Some(limit) = config.collection(&source.collection).and_then(|c| c.granule_limit) {
            bounds.push((
                limit,
                format!(
                    "because collection {} is limited to {limit} for the {} service.",
                    source.collection, config.name
                ),
            ));
        }
    }
    if let Some(limit) = config.granule_limit {
        bounds.push((
            limit,
            format!("because the service {} is limited to {limit}.", config.name),
        ));
    }
    if let Some(limit) = operation.max_results {
        bounds.push((limit, format!("because you requested {limit} maxResults.")));
    }
    bounds.push((
        planner.max_granule_limit,
        "because of system constraints.".to_string(),
    ));

    let tightest = bounds.iter().map(|(limit, _)| *limit).min().unwrap_or(cmr_hits);
    let count = cmr_hits.min(tightest);
    if count >= cmr_hits {
        return (count, None);
    }

    let reason = bounds
        .iter()
        .find(|(limit, _)| *limit == count)
        .map(|(_, reason)| reason.clone())
        .unwrap_or_default();
    let message = format!(
        "CMR query identified {cmr_hits} granules, but the request has been limited to \
         process only the first {count} granules {reason}"
    );
    (count, Some(message))
}

/// A request is synchronous iff forced, pre-decided, or small enough for the
/// service's sync cutoff.
pub fn is_synchronous(
    operation: &DataOperation,
    config: &ServiceConfig,
    planner: &PlannerConfig,
    num_granules: u32,
) -> bool {
    if operation.require_synchronous {
        return true;
    }
    if let Some(decided) = operation.is_synchronous {
        return decided;
    }
    num_granules
        <= config
            .maximum_sync_granules
            .unwrap_or(planner.max_synchronous_granules)
}

/// Effective batch size for a service
pub fn effective_batch_size(
    config: &ServiceConfig,
    planner: &PlannerConfig,
    max_results: Option<u32>,
) -> u32 {
    config
        .batch_size
        .unwrap_or(planner.default_batch_size)
        .min(max_results.unwrap_or(u32::MAX))
        .min(planner.max_granule_limit)
}

/// Split an operation into per-source granule batches of at most
/// `batch_size`. A batch size of zero means no batching. Batches never cross
/// source boundaries; a source larger than the batch size becomes several
/// batches.
pub fn batch_operations(operation: &DataOperation, batch_size: u32) -> Vec<DataOperation> {
    if batch_size == 0 {
        return vec![operation.clone()];
    }

    let mut batches = Vec::new();
    for source in &operation.sources {
        for chunk in source.granules.chunks(batch_size as usize) {
            let mut batch = operation.clone();
            batch.sources = vec![DataSource {
                granules: chunk.to_vec(),
                ..source.clone()
            }];
            batches.push(batch);
        }
    }

    if batches.is_empty() {
        vec![operation.clone()]
    } else {
        batches
    }
}

/// Create the job, workflow steps, and initial work items for a chosen
/// service, persisting them atomically.
pub async fn plan_job(
    config: &ServiceConfig,
    operation: &DataOperation,
    request_url: &str,
    planner: &PlannerConfig,
    store: &dyn WorkStore,
) -> Result<JobPlan> {
    let (num_granules, limit_message) = granule_limits(operation, config, planner);
    let synchronous = is_synchronous(operation, config, planner, num_granules);

    let mut job = Job::new(
        operation.request_id.clone(),
        operation.user.clone(),
        request_url.to_string(),
        !synchronous,
        num_granules,
        operation.collection_ids(),
    );
    job.message = limit_message;

    let serialized = serde_json::to_string(operation)?;
    let page_size = planner.cmr_max_page_size.min(num_granules.max(1));
    let batch_size = effective_batch_size(config, planner, operation.max_results);

    let mut steps = Vec::new();
    for (index, step) in config.steps.iter().enumerate() {
        let work_item_count = if step.is_sequential {
            div_ceil(num_granules, page_size)
        } else {
            div_ceil(num_granules, batch_size).max(1)
        };
        steps.push(WorkflowStep {
            job_id: job.job_id.clone(),
            step_index: index as u32,
            service_id: step.image.clone(),
            operation: serialized.clone(),
            work_item_count,
            is_sequential: step.is_sequential,
        });
    }

    let mut initial_items = Vec::new();
    match config.steps.first() {
        Some(first) if first.is_sequential => {
            // CMR query step: one item carrying a fresh scroll cursor
            let mut item = WorkItem::new(
                0,
                job.job_id.clone(),
                first.image.clone(),
                0,
                operation.clone(),
            );
            item.scroll_id = Some(Uuid::new_v4().to_string());
            initial_items.push(item);
        }
        Some(first) => {
            for (index, batch) in batch_operations(operation, batch_size).into_iter().enumerate() {
                let mut item =
                    WorkItem::new(0, job.job_id.clone(), first.image.clone(), 0, batch);
                item.sort_index = index as u32;
                initial_items.push(item);
            }
        }
        None => {}
    }

    store
        .create_job(&job, &steps, &initial_items)
        .await
        .map_err(|_| Error::Server("Failed to save job to database.".to_string()))?;

    Ok(JobPlan {
        job,
        steps,
        initial_items,
    })
}
