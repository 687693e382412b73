//! HTTP client for the work-item protocol (pod to server)

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use tracing::{debug, error, warn};

use harmony_common::models::{WorkItemUpdate, WorkResponse};

use crate::backoff::backoff_delay;
use crate::config::WorkerConfig;

/// Client for polling and reporting work items
pub struct WorkClient {
    http: reqwest::Client,
    work_url: String,
    service_id: String,
    pod_name: String,
    shared_secret: String,
    max_put_retries: u32,
}

impl WorkClient {
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        Self::with_work_url(config, config.work_url())
    }

    /// Construct against an explicit work URL (used by tests)
    pub fn with_work_url(config: &WorkerConfig, work_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.client_id.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            work_url,
            service_id: config.harmony_service.clone(),
            pod_name: config.my_pod_name.clone(),
            shared_secret: config.shared_secret_key.clone(),
            max_put_retries: config.max_put_work_retries,
        })
    }

    /// Poll for work. `None` means no work is available; transient server
    /// failures surface as errors for the caller's backoff.
    pub async fn get_work(&self) -> Result<Option<WorkResponse>> {
        let response = self
            .http
            .get(&self.work_url)
            .query(&[
                ("serviceID", self.service_id.as_str()),
                ("podName", self.pod_name.as_str()),
            ])
            .bearer_auth(&self.shared_secret)
            .send()
            .await
            .context("Work request failed")?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let work: WorkResponse = response
                    .json()
                    .await
                    .context("Invalid work response body")?;
                debug!("Received work item {}", work.work_item.id);
                Ok(Some(work))
            }
            status => bail!("Work request returned status {status}"),
        }
    }

    /// Report a terminal work item. Transient failures retry on the backoff
    /// curve; terminal rejections are logged and swallowed, because the item
    /// lease expires server-side.
    pub async fn report(&self, update: &WorkItemUpdate) {
        let url = format!("{}/{}", self.work_url, update.id);
        let mut attempt: u32 = 0;
        loop {
            match self
                .http
                .put(&url)
                .bearer_auth(&self.shared_secret)
                .json(update)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return;
                    }
                    if status == StatusCode::CONFLICT {
                        // the server has already moved on, e.g. a cancelled job
                        warn!("Work item {} update rejected with conflict", update.id);
                        return;
                    }
                    let transient = matches!(status.as_u16(), 502 | 503 | 504);
                    if !transient || attempt >= self.max_put_retries {
                        error!(
                            "Failed to update work item {}: status {}",
                            update.id, status
                        );
                        return;
                    }
                    warn!(
                        "Work item {} update returned status {}; retrying",
                        update.id, status
                    );
                }
                Err(e) => {
                    if attempt >= self.max_put_retries {
                        error!("Abandoning work item {} update: {}", update.id, e);
                        return;
                    }
                    warn!("Work item {} update failed: {}; retrying", update.id, e);
                }
            }
            attempt += 1;
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }
}
