//! Sidecar invocation (C6)
//!
//! Translates a work item into an exec on the `worker` container of this
//! pod, interprets the exit status and any `error.json` the service wrote,
//! and discovers the STAC catalogs it produced.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::{error, info, warn};

use harmony_common::models::{DataOperation, ShapeRef, WorkItem};

use crate::backoff::internal_error_delay;
use crate::config::WorkerConfig;
use crate::k8s::{ExecStatus, PodClient};
use crate::logstream::LogStream;
use crate::object_store::ObjectStore;
use crate::runner::WorkOutcome;

/// Name of the sidecar container sharing the pod
pub const WORKER_CONTAINER: &str = "worker";

/// Exit code Kubernetes uses for OOM kills
pub const OOM_EXIT_CODE: i32 = 137;

const MAX_INLINE_OPERATION_BYTES: usize = 100_000;
const OPERATION_FILE: &str = "/tmp/operation.json";
const SHAPEFILE_FILE: &str = "/tmp/shapefile.json";
const MAX_EXEC_RETRIES: u32 = 5;
const PRIME_RETRY_SPACING: Duration = Duration::from_millis(100);

/// `error.json` as written by a service into its output directory
#[derive(Debug, Deserialize)]
struct ErrorInfo {
    error: String,
    level: Option<String>,
    category: Option<String>,
}

/// Image reference without its tag, used to prefix service messages
#[must_use]
pub fn sanitize_service_name(image: &str) -> &str {
    match image.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => name,
        _ => image,
    }
}

/// Output STAC directory for a work item
#[must_use]
pub fn catalog_dir_url(artifact_bucket: &str, job_id: &str, work_item_id: u64) -> String {
    format!("s3://{artifact_bucket}/{job_id}/{work_item_id}/outputs/")
}

/// Assemble the sidecar command line. Oversized operations spill to a file in
/// the shared /tmp; inline GeoJSON shapes are normalized to a file reference.
pub async fn build_command(
    config: &WorkerConfig,
    item: &WorkItem,
    catalog_dir: &str,
) -> Result<Vec<String>> {
    let mut operation = item.operation.clone();
    normalize_shape(&mut operation).await?;
    let serialized = serde_json::to_string(&operation)?;

    let separator = if config.invocation_args.contains('\n') {
        '\n'
    } else {
        ' '
    };
    let mut command: Vec<String> = config
        .invocation_args
        .split(separator)
        .filter(|arg| !arg.is_empty())
        .map(String::from)
        .collect();

    command.push("--harmony-action".to_string());
    command.push("invoke".to_string());

    if serialized.len() > MAX_INLINE_OPERATION_BYTES {
        tokio::fs::write(OPERATION_FILE, &serialized)
            .await
            .context("Failed to write operation file")?;
        command.push("--harmony-input-file".to_string());
        command.push(OPERATION_FILE.to_string());
    } else {
        command.push("--harmony-input".to_string());
        command.push(serialized);
    }

    command.push("--harmony-sources".to_string());
    command.push(item.stac_catalog_location.clone().unwrap_or_default());
    command.push("--harmony-metadata-dir".to_string());
    command.push(catalog_dir.to_string());

    Ok(command)
}

/// Replace an inline GeoJSON shape with a reference to a file in the shared
/// /tmp so the sidecar can read it.
async fn normalize_shape(operation: &mut DataOperation) -> Result<()> {
    if let Some(ShapeRef::Inline(geojson)) = &operation.geojson {
        if !geojson.is_empty() {
            tokio::fs::write(SHAPEFILE_FILE, geojson)
                .await
                .context("Failed to write shapefile")?;
            operation.geojson = Some(ShapeRef::File {
                href: format!("file://{SHAPEFILE_FILE}"),
                mime_type: "application/geo+json".to_string(),
            });
        }
    }
    Ok(())
}

/// STAC catalog URLs produced by a successful run, in service order:
/// `batch-catalogs.json` file order when present, else `catalog(N).json`
/// sorted by the captured integer (missing index sorts first).
pub async fn discover_catalogs(
    store: &dyn ObjectStore,
    catalog_dir: &str,
) -> Result<Vec<String>> {
    let batch_url = format!("{catalog_dir}batch-catalogs.json");
    if store.object_exists(&batch_url).await? {
        let names: Vec<String> = serde_json::from_slice(&store.get_object(&batch_url).await?)
            .context("Invalid batch-catalogs.json")?;
        return Ok(names
            .into_iter()
            .map(|name| format!("{catalog_dir}{name}"))
            .collect());
    }

    let pattern = Regex::new(r"^catalog(\d*)\.json$").expect("static regex");
    let mut indexed: Vec<(u64, String)> = store
        .list_objects(catalog_dir)
        .await?
        .into_iter()
        .filter_map(|url| {
            let name = url.rsplit('/').next().unwrap_or_default();
            let captures = pattern.captures(name)?;
            let index = captures
                .get(1)
                .and_then(|digits| digits.as_str().parse().ok())
                .unwrap_or(0);
            Some((index, url))
        })
        .collect();
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, url)| url).collect())
}

/// Interpret a failed exec: a service-authored `error.json` wins, then the
/// exit code, then the status message.
pub async fn resolve_error(
    store: &dyn ObjectStore,
    catalog_dir: &str,
    service: &str,
    status: &ExecStatus,
) -> WorkOutcome {
    let error_url = format!("{catalog_dir}error.json");
    if let Ok(body) = store.get_object(&error_url).await {
        if let Ok(info) = serde_json::from_slice::<ErrorInfo>(&body) {
            let message = format!("{service}: {}", info.error);
            if info.level.as_deref() == Some("warning") {
                return WorkOutcome::warning(message, info.category);
            }
            return match info.category {
                Some(category) => WorkOutcome::failed_with_category(message, category),
                None => WorkOutcome::failed(message),
            };
        }
        warn!("Service wrote an unreadable error.json under {}", catalog_dir);
    }

    let reason = match status.exit_code {
        Some(OOM_EXIT_CODE) => "Service failed due to running out of memory".to_string(),
        _ => status
            .message
            .clone()
            .unwrap_or_else(|| "Service terminated without error message".to_string()),
    };
    WorkOutcome::failed(format!("{service}: {reason}"))
}

/// Runs work items through the sidecar container via K8s exec
pub struct SidecarRunner {
    pods: PodClient,
    config: WorkerConfig,
    store: Arc<dyn ObjectStore>,
}

impl SidecarRunner {
    #[must_use]
    pub fn new(pods: PodClient, config: WorkerConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self { pods, config, store }
    }

    /// Execute one work item, capturing output into `logs`
    pub async fn run(&self, item: &WorkItem, logs: &mut LogStream) -> WorkOutcome {
        let service = sanitize_service_name(&self.config.harmony_service);
        let catalog_dir =
            catalog_dir_url(&self.config.artifact_bucket, &item.job_id, item.id);

        let command = match build_command(&self.config, item, &catalog_dir).await {
            Ok(command) => command,
            Err(e) => return WorkOutcome::failed(format!("{service}: {e}")),
        };

        let mut attempt = 0;
        let status = loop {
            match self
                .pods
                .exec_captured(&self.config.my_pod_name, WORKER_CONTAINER, command.clone(), logs)
                .await
            {
                Ok(status) => break status,
                Err(e) if e.is_internal_server_error() && attempt < MAX_EXEC_RETRIES => {
                    warn!(
                        "Sidecar exec returned an internal error (attempt {}): {}",
                        attempt + 1,
                        e
                    );
                    tokio::time::sleep(internal_error_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) if e.is_internal_server_error() => {
                    error!("Sidecar exec failed after {} retries: {}", MAX_EXEC_RETRIES, e);
                    return WorkOutcome::failed_with_category(
                        "Unknown internal server error",
                        "Internal server error",
                    );
                }
                Err(e) => return WorkOutcome::failed(format!("{service}: {e}")),
            }
        };

        if status.success {
            self.resolve_success(service, &catalog_dir).await
        } else {
            resolve_error(self.store.as_ref(), &catalog_dir, service, &status).await
        }
    }

    async fn resolve_success(&self, service: &str, catalog_dir: &str) -> WorkOutcome {
        match discover_catalogs(self.store.as_ref(), catalog_dir).await {
            Ok(results) => {
                let mut sizes = Vec::with_capacity(results.len());
                for url in &results {
                    let size = match self.store.get_object(url).await {
                        Ok(body) => body.len() as u64,
                        Err(_) => 0,
                    };
                    sizes.push(size);
                }
                WorkOutcome::successful(results, sizes)
            }
            Err(e) => WorkOutcome::failed(format!("{service}: {e}")),
        }
    }

    /// One dummy invocation before servicing traffic, to work around a K8s
    /// client initialization bug. Retried until the sidecar answers.
    pub async fn prime(&self) -> Result<()> {
        let operation = DataOperation::new(
            "prime".to_string(),
            "prime".to_string(),
            self.config.client_id.clone(),
        );
        let item = WorkItem::new(
            0,
            "prime".to_string(),
            self.config.harmony_service.clone(),
            0,
            operation,
        );
        let catalog_dir = catalog_dir_url(&self.config.artifact_bucket, "prime", 0);
        let command = build_command(&self.config, &item, &catalog_dir).await?;

        for attempt in 1..=self.config.max_prime_retries {
            let mut logs = LogStream::new(0, 0);
            match self
                .pods
                .exec_captured(&self.config.my_pod_name, WORKER_CONTAINER, command.clone(), &mut logs)
                .await
            {
                Ok(_) => {
                    info!("Sidecar prime invocation succeeded");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Prime invocation failed (attempt {}): {}", attempt, e);
                    tokio::time::sleep(PRIME_RETRY_SPACING).await;
                }
            }
        }
        anyhow::bail!(
            "Sidecar prime invocation did not succeed after {} attempts",
            self.config.max_prime_retries
        )
    }
}
