//! Worker configuration from the pod environment

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Hosts reached over plain http rather than https
const HTTP_BACKEND_HOSTS: [&str; 2] = ["harmony", "host.docker.internal"];

/// Configuration consumed by the pull worker, read from environment variables
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Image id of the service this pod runs
    pub harmony_service: String,
    /// Invocation arguments for the sidecar, newline separated (space
    /// separated as a fallback)
    pub invocation_args: String,
    pub backend_host: String,
    pub backend_port: u16,
    /// Local port of the CMR query sidecar's HTTP endpoint
    pub worker_port: u16,
    /// Hard cap on a single work item's execution
    pub worker_timeout: Duration,
    pub max_put_work_retries: u32,
    pub max_prime_retries: u32,
    pub artifact_bucket: String,
    pub my_pod_name: String,
    pub working_dir: PathBuf,
    pub shared_secret_key: String,
    pub client_id: String,
    pub kubernetes_namespace: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("Invalid value for {name}")),
        Err(_) => Ok(default),
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let harmony_service =
            std::env::var("HARMONY_SERVICE").context("HARMONY_SERVICE must be set")?;
        let my_pod_name = std::env::var("MY_POD_NAME").context("MY_POD_NAME must be set")?;

        Ok(Self {
            harmony_service,
            invocation_args: env_or("INVOCATION_ARGS", ""),
            backend_host: env_or("BACKEND_HOST", "harmony"),
            backend_port: parse_env("BACKEND_PORT", 3000)?,
            worker_port: parse_env("WORKER_PORT", 5000)?,
            worker_timeout: Duration::from_secs(parse_env("WORKER_TIMEOUT", 3600u64)?),
            max_put_work_retries: parse_env("MAX_PUT_WORK_RETRIES", 3)?,
            max_prime_retries: parse_env("MAX_PRIME_RETRIES", 1200)?,
            artifact_bucket: env_or("ARTIFACT_BUCKET", "harmony-artifacts"),
            my_pod_name,
            working_dir: PathBuf::from(env_or("WORKING_DIR", "/tmp")),
            shared_secret_key: env_or("SHARED_SECRET_KEY", ""),
            client_id: env_or("CLIENT_ID", "harmony-worker"),
            kubernetes_namespace: env_or("KUBERNETES_NAMESPACE", "harmony"),
        })
    }

    /// Work-item endpoint. Plain http for in-cluster and local-dev hosts.
    #[must_use]
    pub fn work_url(&self) -> String {
        let scheme = if HTTP_BACKEND_HOSTS.contains(&self.backend_host.as_str()) {
            "http"
        } else {
            "https"
        };
        format!(
            "{scheme}://{}:{}/service/work",
            self.backend_host, self.backend_port
        )
    }

    /// The CMR query service uses the local HTTP path instead of sidecar exec
    #[must_use]
    pub fn is_query_service(&self) -> bool {
        self.harmony_service.contains("query-cmr")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_host(host: &str) -> WorkerConfig {
        WorkerConfig {
            harmony_service: "harmonyservices/subsetter:latest".to_string(),
            invocation_args: String::new(),
            backend_host: host.to_string(),
            backend_port: 3000,
            worker_port: 5000,
            worker_timeout: Duration::from_secs(3600),
            max_put_work_retries: 3,
            max_prime_retries: 2,
            artifact_bucket: "harmony-artifacts".to_string(),
            my_pod_name: "subsetter-pod-0".to_string(),
            working_dir: PathBuf::from("/tmp"),
            shared_secret_key: String::new(),
            client_id: "harmony-worker".to_string(),
            kubernetes_namespace: "harmony".to_string(),
        }
    }

    #[test]
    fn test_work_url_scheme_selection() {
        assert_eq!(
            config_with_host("harmony").work_url(),
            "http://harmony:3000/service/work"
        );
        assert_eq!(
            config_with_host("host.docker.internal").work_url(),
            "http://host.docker.internal:3000/service/work"
        );
        assert_eq!(
            config_with_host("harmony.earthdata.nasa.gov").work_url(),
            "https://harmony.earthdata.nasa.gov:3000/service/work"
        );
    }

    #[test]
    fn test_query_service_detection() {
        let mut config = config_with_host("harmony");
        assert!(!config.is_query_service());
        config.harmony_service = "harmonyservices/query-cmr:latest".to_string();
        assert!(config.is_query_service());
    }
}
