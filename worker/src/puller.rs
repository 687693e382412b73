//! The pull worker loop (C5)
//!
//! One loop per pod: acquire at most one work item, execute it, report the
//! outcome, repeat. The loop exits cleanly when termination is requested;
//! an in-flight item always finishes (or times out) and is reported first.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use harmony_common::models::{WorkItem, WorkItemStatus, WorkItemUpdate, WorkResponse};

use crate::backoff::backoff_delay;
use crate::runner::{WorkItemExecutor, WorkOutcome};
use crate::sentinel::Sentinels;
use crate::work_client::WorkClient;

pub struct PullWorker {
    work_client: WorkClient,
    sentinels: Sentinels,
    executor: Arc<dyn WorkItemExecutor>,
    worker_timeout: std::time::Duration,
}

impl PullWorker {
    #[must_use]
    pub fn new(
        work_client: WorkClient,
        sentinels: Sentinels,
        executor: Arc<dyn WorkItemExecutor>,
        worker_timeout: std::time::Duration,
    ) -> Self {
        Self {
            work_client,
            sentinels,
            executor,
            worker_timeout,
        }
    }

    /// Poll until termination is requested. Returns normally so the process
    /// can exit 0.
    pub async fn run(&self) -> Result<()> {
        info!("Starting pull worker loop");
        let mut retry: u32 = 0;
        loop {
            if self.sentinels.terminating() {
                info!("Termination requested; exiting pull loop");
                return Ok(());
            }
            self.sentinels.purge_working_dir().await;

            match self.work_client.get_work().await {
                Ok(Some(work)) => {
                    retry = 0;
                    self.sentinels.set_working().await;
                    let item = self.process(work).await;
                    self.work_client.report(&WorkItemUpdate::from_item(&item)).await;
                    self.sentinels.clear_working().await;
                }
                Ok(None) => {
                    debug!("No work available");
                    retry += 1;
                    if self.sentinels.sleep_check(backoff_delay(retry)).await {
                        info!("Termination requested during idle sleep; exiting");
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!("Failed to get work: {}", e);
                    retry += 1;
                    if self.sentinels.sleep_check(backoff_delay(retry)).await {
                        info!("Termination requested during retry sleep; exiting");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Execute one item under the worker timeout and fold the outcome in
    async fn process(&self, work: WorkResponse) -> WorkItem {
        let mut item = work.work_item;
        item.status = WorkItemStatus::Running;
        info!("Executing work item {} for job {}", item.id, item.job_id);

        let started = Instant::now();
        let outcome = match timeout(
            self.worker_timeout,
            self.executor.execute(&item, work.max_cmr_granules),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => WorkOutcome::failed(format!(
                "Worker timed out after {} seconds",
                self.worker_timeout.as_secs()
            )),
        };

        outcome.apply_to(&mut item);
        item.duration = started.elapsed().as_millis() as u64;
        info!(
            "Work item {} finished with status {:?} in {}ms",
            item.id, item.status, item.duration
        );
        item
    }
}
