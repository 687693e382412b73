//! Kubernetes client wrapper for pod probing and sidecar exec

use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::{
    api::{Api, AttachParams},
    Client, Config, Error,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

use crate::logstream::LogStream;

/// Result type for K8s operations
pub type K8sResult<T> = Result<T, K8sError>;

/// Kubernetes operation errors
#[derive(Debug, thiserror::Error)]
pub enum K8sError {
    #[error("Kubernetes API error: {0}")]
    Api(#[from] Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Timeout waiting for resource: {0}")]
    Timeout(String),
}

impl K8sError {
    /// Whether the error is a 500-class response from the exec API, which the
    /// worker treats as retryable.
    #[must_use]
    pub fn is_internal_server_error(&self) -> bool {
        matches!(self, K8sError::Api(Error::Api(response)) if response.code >= 500)
    }
}

/// Terminal status of an exec'd process
#[derive(Debug, Clone)]
pub struct ExecStatus {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

impl ExecStatus {
    fn from_status(status: Option<Status>) -> Self {
        match status {
            Some(status) => {
                let success = status.status.as_deref() == Some("Success");
                let exit_code = status
                    .details
                    .as_ref()
                    .and_then(|details| details.causes.as_ref())
                    .and_then(|causes| {
                        causes
                            .iter()
                            .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
                    })
                    .and_then(|cause| cause.message.as_ref())
                    .and_then(|code| code.parse().ok());
                Self {
                    success,
                    exit_code,
                    message: status.message,
                }
            }
            None => Self {
                success: false,
                exit_code: None,
                message: None,
            },
        }
    }
}

/// Kubernetes client wrapper scoped to the worker's namespace
pub struct PodClient {
    client: Client,
    namespace: String,
}

impl PodClient {
    /// Create a new client with inferred configuration
    pub async fn new(namespace: String) -> K8sResult<Self> {
        let config = Config::infer()
            .await
            .map_err(|e| K8sError::Config(format!("Failed to infer K8s config: {e}")))?;
        let client = Client::try_from(config)?;
        Ok(Self { client, namespace })
    }

    #[must_use]
    pub fn with_client(client: Client, namespace: String) -> Self {
        Self { client, namespace }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Whether the named container of the pod is in the `running` state
    pub async fn container_running(&self, pod_name: &str, container: &str) -> K8sResult<bool> {
        let pod = self.pods().get(pod_name).await.map_err(|e| match e {
            Error::Api(response) if response.code == 404 => {
                K8sError::NotFound(format!("Pod '{pod_name}' not found"))
            }
            e => K8sError::from(e),
        })?;

        let running = pod
            .status
            .and_then(|status| status.container_statuses)
            .unwrap_or_default()
            .iter()
            .any(|cs| {
                cs.name == container
                    && cs
                        .state
                        .as_ref()
                        .is_some_and(|state| state.running.is_some())
            });
        Ok(running)
    }

    /// Poll until the container reaches `running`, or time out
    pub async fn wait_for_container_running(
        &self,
        pod_name: &str,
        container: &str,
        ready_timeout: Duration,
        interval: Duration,
    ) -> K8sResult<()> {
        let started = Instant::now();
        loop {
            match self.container_running(pod_name, container).await {
                Ok(true) => return Ok(()),
                Ok(false) => debug!("Container {} not running yet", container),
                Err(e) => debug!("Pod status read failed: {}", e),
            }
            if started.elapsed() >= ready_timeout {
                return Err(K8sError::Timeout(format!(
                    "Container '{container}' of pod '{pod_name}' did not reach running"
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Exec a command in the named container, streaming its output into the
    /// log stream, and return the terminal status.
    pub async fn exec_captured(
        &self,
        pod_name: &str,
        container: &str,
        command: Vec<String>,
        logs: &mut LogStream,
    ) -> K8sResult<ExecStatus> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = self.pods().exec(pod_name, command, &params).await?;
        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status_future = attached.take_status();

        let (stdout_lines, stderr_lines) =
            tokio::join!(read_lines(stdout), read_lines(stderr));
        for line in stdout_lines.iter().chain(stderr_lines.iter()) {
            logs.append_chunk(line);
        }

        let status = match status_future {
            Some(future) => future.await,
            None => None,
        };
        let _ = attached.join().await;
        Ok(ExecStatus::from_status(status))
    }
}

async fn read_lines(stream: Option<impl AsyncRead + Unpin>) -> Vec<String> {
    let mut collected = Vec::new();
    if let Some(stream) = stream {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            collected.push(line);
        }
    }
    collected
}
