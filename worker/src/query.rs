//! CMR-query variant of work execution
//!
//! Items carrying a scroll cursor POST to the query sidecar's local HTTP
//! endpoint instead of going through K8s exec. The response carries the
//! produced catalogs, their sizes, and possibly the next cursor.

use serde::{Deserialize, Serialize};
use tracing::debug;

use harmony_common::models::WorkItem;

use crate::sidecar::{catalog_dir_url, sanitize_service_name};
use crate::runner::WorkOutcome;

/// Error category the query service uses for user-facing granule validation
/// failures, surfaced directly without the service-name prefix.
const GRANULE_VALIDATION_CATEGORY: &str = "granValidation";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    output_dir: &'a str,
    harmony_input: &'a harmony_common::models::DataOperation,
    scroll_id: Option<&'a str>,
    max_cmr_granules: Option<u32>,
    work_item_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    batch_catalogs: Option<Vec<String>>,
    #[serde(default)]
    total_items_size: Option<u64>,
    #[serde(default)]
    output_item_sizes: Option<Vec<u64>>,
    #[serde(rename = "scrollID", default)]
    scroll_id: Option<String>,
    #[serde(default)]
    hits: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_category: Option<String>,
    #[serde(default)]
    error_level: Option<String>,
}

/// Client for the query sidecar's local work endpoint
pub struct QueryClient {
    http: reqwest::Client,
    endpoint: String,
    service_name: String,
    artifact_bucket: String,
}

impl QueryClient {
    #[must_use]
    pub fn new(worker_port: u16, harmony_service: &str, artifact_bucket: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("http://127.0.0.1:{worker_port}/work"),
            service_name: sanitize_service_name(harmony_service).to_string(),
            artifact_bucket: artifact_bucket.to_string(),
        }
    }

    /// Endpoint override for tests
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub async fn run(&self, item: &WorkItem, max_cmr_granules: Option<u32>) -> WorkOutcome {
        let output_dir = catalog_dir_url(&self.artifact_bucket, &item.job_id, item.id);
        let request = QueryRequest {
            output_dir: &output_dir,
            harmony_input: &item.operation,
            scroll_id: item.scroll_id.as_deref(),
            max_cmr_granules,
            work_item_id: item.id,
        };

        debug!("Posting query work item {} to {}", item.id, self.endpoint);
        let response = match self.http.post(&self.endpoint).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                return WorkOutcome::failed(format!("{}: {e}", self.service_name));
            }
        };

        if !response.status().is_success() {
            return WorkOutcome::failed(format!(
                "{}: query service returned status {}",
                self.service_name,
                response.status()
            ));
        }

        let body: QueryResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                return WorkOutcome::failed(format!(
                    "{}: invalid query service response: {e}",
                    self.service_name
                ));
            }
        };

        if let Some(error) = body.error {
            // granule validation errors go straight to the user
            if body.error_category.as_deref() == Some(GRANULE_VALIDATION_CATEGORY) {
                return WorkOutcome::failed_with_category(error, GRANULE_VALIDATION_CATEGORY);
            }
            let message = format!("{}: {error}", self.service_name);
            if body.error_level.as_deref() == Some("warning") {
                return WorkOutcome::warning(message, body.error_category);
            }
            return match body.error_category {
                Some(category) => WorkOutcome::failed_with_category(message, category),
                None => WorkOutcome::failed(message),
            };
        }

        let results: Vec<String> = body
            .batch_catalogs
            .unwrap_or_default()
            .into_iter()
            .map(|catalog| {
                if catalog.starts_with("s3://") {
                    catalog
                } else {
                    format!("{output_dir}{catalog}")
                }
            })
            .collect();

        let mut outcome =
            WorkOutcome::successful(results, body.output_item_sizes.unwrap_or_default());
        if let Some(total) = body.total_items_size {
            outcome.total_items_size = total;
        }
        outcome.scroll_id = body.scroll_id;
        outcome.hits = body.hits;
        outcome
    }
}
