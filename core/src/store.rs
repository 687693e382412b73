//! Work store contract (C4)
//!
//! The store owns job, workflow-step, and work-item records. The planner
//! needs a single atomic write for a job and its initial items; worker pods
//! consume items over the work-item HTTP protocol, which is served from the
//! same store. An item handed to a pod is leased `running`; the pod must
//! report terminal status or the lease expires server-side.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use harmony_common::models::{Job, WorkItem, WorkItemStatus, WorkItemUpdate, WorkflowStep};

#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Atomically persist a job with its workflow steps and initial work
    /// items. Either everything lands or nothing does.
    async fn create_job(
        &self,
        job: &Job,
        steps: &[WorkflowStep],
        items: &[WorkItem],
    ) -> anyhow::Result<()>;

    /// Hand out at most one ready work item for the service, leasing it
    /// `running` to the named pod.
    async fn next_work_item(
        &self,
        service_id: &str,
        pod_name: &str,
    ) -> anyhow::Result<Option<WorkItem>>;

    /// Apply a terminal update reported by a pod
    async fn update_work_item(&self, update: &WorkItemUpdate) -> anyhow::Result<()>;
}

#[derive(Default)]
struct MemoryStoreInner {
    jobs: HashMap<String, Job>,
    steps: Vec<WorkflowStep>,
    items: Vec<WorkItem>,
    leases: HashMap<u64, String>,
    next_id: u64,
}

/// In-memory store used by planner tests and as executable documentation of
/// the store contract.
#[derive(Default)]
pub struct MemoryWorkStore {
    inner: Mutex<MemoryStoreInner>,
    fail_writes: bool,
}

impl MemoryWorkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes always fail, for exercising error paths
    #[must_use]
    pub fn failing() -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner::default()),
            fail_writes: true,
        }
    }

    pub async fn job(&self, job_id: &str) -> Option<Job> {
        self.inner.lock().await.jobs.get(job_id).cloned()
    }

    pub async fn steps_for(&self, job_id: &str) -> Vec<WorkflowStep> {
        self.inner
            .lock()
            .await
            .steps
            .iter()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect()
    }

    pub async fn items_for(&self, job_id: &str) -> Vec<WorkItem> {
        self.inner
            .lock()
            .await
            .items
            .iter()
            .filter(|i| i.job_id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WorkStore for MemoryWorkStore {
    async fn create_job(
        &self,
        job: &Job,
        steps: &[WorkflowStep],
        items: &[WorkItem],
    ) -> anyhow::Result<()> {
        if self.fail_writes {
            anyhow::bail!("write rejected");
        }
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.jobs.insert(job.job_id.clone(), job.clone());
        inner.steps.extend_from_slice(steps);
        for item in items {
            let mut item = item.clone();
            if item.id == 0 {
                inner.next_id += 1;
                item.id = inner.next_id;
            }
            inner.items.push(item);
        }
        Ok(())
    }

    async fn next_work_item(
        &self,
        service_id: &str,
        pod_name: &str,
    ) -> anyhow::Result<Option<WorkItem>> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let item = inner
            .items
            .iter_mut()
            .find(|i| i.service_id == service_id && i.status == WorkItemStatus::Ready);
        match item {
            Some(item) => {
                item.status = WorkItemStatus::Running;
                let leased = item.clone();
                inner.leases.insert(leased.id, pod_name.to_string());
                Ok(Some(leased))
            }
            None => Ok(None),
        }
    }

    async fn update_work_item(&self, update: &WorkItemUpdate) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let item = inner
            .items
            .iter_mut()
            .find(|i| i.id == update.id)
            .ok_or_else(|| anyhow::anyhow!("no work item with id {}", update.id))?;
        item.status = update.status;
        item.duration = update.duration;
        item.results = update.results.clone();
        item.output_item_sizes = update.output_item_sizes.clone();
        item.total_items_size = update.total_items_size;
        item.scroll_id = update.scroll_id.clone();
        item.hits = update.hits;
        item.message = update.message.clone();
        item.message_category = update.message_category.clone();
        inner.leases.remove(&update.id);
        Ok(())
    }
}
