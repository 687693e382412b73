//! End-to-end pull worker tests against a mock work-item endpoint

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harmony_common::models::{DataOperation, DataSource, WorkItem};
use harmony_worker::config::WorkerConfig;
use harmony_worker::puller::PullWorker;
use harmony_worker::runner::{WorkItemExecutor, WorkOutcome};
use harmony_worker::sentinel::{Sentinels, TERMINATING_FILE, WORKING_FILE};
use harmony_worker::work_client::WorkClient;

fn worker_config(working_dir: PathBuf) -> WorkerConfig {
    WorkerConfig {
        harmony_service: "harmonyservices/query-cmr:latest".to_string(),
        invocation_args: String::new(),
        backend_host: "harmony".to_string(),
        backend_port: 3000,
        worker_port: 5000,
        worker_timeout: Duration::from_secs(30),
        max_put_work_retries: 1,
        max_prime_retries: 2,
        artifact_bucket: "artifacts".to_string(),
        my_pod_name: "query-cmr-pod-0".to_string(),
        working_dir,
        shared_secret_key: "secret".to_string(),
        client_id: "harmony-worker".to_string(),
        kubernetes_namespace: "harmony".to_string(),
    }
}

fn scroll_work_item() -> serde_json::Value {
    let mut operation = DataOperation::new(
        "req-1".to_string(),
        "jdoe".to_string(),
        "harmony-test".to_string(),
    );
    operation.sources.push(DataSource {
        collection: "C1-PROV".to_string(),
        short_name: None,
        version_id: None,
        variables: vec!["V1".to_string()],
        granules: Vec::new(),
    });
    let mut item = WorkItem::new(
        7,
        "req-1".to_string(),
        "harmonyservices/query-cmr:latest".to_string(),
        0,
        operation,
    );
    item.scroll_id = Some("s1".to_string());
    serde_json::to_value(&item).unwrap()
}

/// Test executor with a configurable outcome and delay; records whether the
/// WORKING sentinel existed while it ran.
struct StubExecutor {
    outcome: WorkOutcome,
    delay: Duration,
    working_path: Option<PathBuf>,
    saw_working: Arc<AtomicBool>,
}

impl StubExecutor {
    fn new(outcome: WorkOutcome) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            working_path: None,
            saw_working: Arc::new(AtomicBool::new(false)),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn watching_working(mut self, path: PathBuf) -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        self.working_path = Some(path);
        self.saw_working = flag.clone();
        (self, flag)
    }
}

#[async_trait]
impl WorkItemExecutor for StubExecutor {
    async fn execute(&self, _item: &WorkItem, _max_cmr_granules: Option<u32>) -> WorkOutcome {
        if let Some(path) = &self.working_path {
            self.saw_working.store(path.exists(), Ordering::SeqCst);
        }
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()
    }
}

struct Harness {
    server: MockServer,
    sentinels: Sentinels,
    _workdir: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let workdir = tempfile::tempdir().unwrap();
        let sentinels = Sentinels::new(workdir.path());
        Self {
            server,
            sentinels,
            _workdir: workdir,
        }
    }

    fn worker(&self, executor: StubExecutor, timeout: Duration) -> PullWorker {
        let mut config = worker_config(self.sentinels.working_dir().to_path_buf());
        config.worker_timeout = timeout;
        let client = WorkClient::with_work_url(
            &config,
            format!("{}/service/work", self.server.uri()),
        )
        .unwrap();
        PullWorker::new(client, self.sentinels.clone(), Arc::new(executor), timeout)
    }

    async fn requests(&self, http_method: &str) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.to_string() == http_method)
            .collect()
    }
}

#[tokio::test]
async fn test_pull_cycle_happy_path() {
    let harness = Harness::new().await;

    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workItem": scroll_work_item(),
                "maxCmrGranules": 2000,
            })),
        )
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/service/work/7"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&harness.server)
        .await;

    let mut outcome = WorkOutcome::successful(
        vec!["s3://artifacts/req-1/7/outputs/catalog0.json".to_string()],
        vec![123],
    );
    outcome.scroll_id = Some("s2".to_string());

    let worker = harness.worker(StubExecutor::new(outcome), Duration::from_secs(30));
    let sentinels = harness.sentinels.clone();
    let run = tokio::spawn(async move { worker.run().await });

    // give the worker one full cycle, then ask it to stop
    tokio::time::sleep(Duration::from_millis(500)).await;
    sentinels.request_termination();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("worker did not exit")
        .unwrap()
        .unwrap();

    let puts = harness.requests("PUT").await;
    assert_eq!(puts.len(), 1, "exactly one PUT per completed item");
    let body: serde_json::Value = serde_json::from_slice(&puts[0].body).unwrap();
    assert_eq!(body["status"], "successful");
    assert_eq!(
        body["results"],
        serde_json::json!(["s3://artifacts/req-1/7/outputs/catalog0.json"])
    );
    assert_eq!(body["totalItemsSize"], 123);
    assert_eq!(body["scrollID"], "s2");
    // echoed operation has its variables stripped
    assert_eq!(body["operation"]["sources"][0]["variables"], serde_json::json!([]));
}

#[tokio::test]
async fn test_no_work_means_no_put() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.server)
        .await;

    let worker = harness.worker(
        StubExecutor::new(WorkOutcome::failed("unused")),
        Duration::from_secs(30),
    );
    let sentinels = harness.sentinels.clone();
    let run = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    sentinels.request_termination();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("worker did not exit")
        .unwrap()
        .unwrap();

    assert!(!harness.requests("GET").await.is_empty());
    assert!(harness.requests("PUT").await.is_empty());
}

#[tokio::test]
async fn test_termination_during_backoff_exits_promptly() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&harness.server)
        .await;

    let worker = harness.worker(
        StubExecutor::new(WorkOutcome::failed("unused")),
        Duration::from_secs(30),
    );
    let workdir = harness.sentinels.working_dir().to_path_buf();
    let run = tokio::spawn(async move { worker.run().await });

    // let the worker enter its backoff sleep, then write the PreStop sentinel
    tokio::time::sleep(Duration::from_millis(300)).await;
    std::fs::write(workdir.join(TERMINATING_FILE), b"").unwrap();

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(3), run)
        .await
        .expect("worker did not observe TERMINATING within a second or so")
        .unwrap()
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(harness.requests("PUT").await.is_empty());
}

#[tokio::test]
async fn test_termination_during_execution_still_reports() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "workItem": scroll_work_item() })),
        )
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/service/work/7"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&harness.server)
        .await;

    let executor = StubExecutor::new(WorkOutcome::successful(vec![], vec![]))
        .with_delay(Duration::from_millis(800));
    let worker = harness.worker(executor, Duration::from_secs(30));
    let sentinels = harness.sentinels.clone();
    let run = tokio::spawn(async move { worker.run().await });

    // termination arrives while the item is executing
    tokio::time::sleep(Duration::from_millis(300)).await;
    sentinels.request_termination();

    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("worker did not exit")
        .unwrap()
        .unwrap();

    let puts = harness.requests("PUT").await;
    assert_eq!(puts.len(), 1, "in-flight item must be reported before exit");
}

#[tokio::test]
async fn test_working_sentinel_brackets_execution() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "workItem": scroll_work_item() })),
        )
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/service/work/7"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&harness.server)
        .await;

    let working_path = harness.sentinels.working_dir().join(WORKING_FILE);
    let (executor, saw_working) = StubExecutor::new(WorkOutcome::successful(vec![], vec![]))
        .watching_working(working_path.clone());

    let worker = harness.worker(executor, Duration::from_secs(30));
    let sentinels = harness.sentinels.clone();
    let run = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    sentinels.request_termination();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("worker did not exit")
        .unwrap()
        .unwrap();

    assert!(saw_working.load(Ordering::SeqCst), "WORKING existed during execution");
    assert!(!working_path.exists(), "WORKING removed once idle");
}

#[tokio::test]
async fn test_worker_timeout_produces_timeout_error() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "workItem": scroll_work_item() })),
        )
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/service/work/7"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&harness.server)
        .await;

    let executor = StubExecutor::new(WorkOutcome::successful(vec![], vec![]))
        .with_delay(Duration::from_secs(30));
    let worker = harness.worker(executor, Duration::from_secs(2));
    let sentinels = harness.sentinels.clone();
    let run = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_millis(2600)).await;
    sentinels.request_termination();
    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("worker did not exit")
        .unwrap()
        .unwrap();

    let puts = harness.requests("PUT").await;
    assert_eq!(puts.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&puts[0].body).unwrap();
    assert_eq!(body["status"], "failed");
    assert_eq!(body["message"], "Worker timed out after 2 seconds");
}

#[tokio::test]
async fn test_put_follows_get_in_order() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "workItem": scroll_work_item() })),
        )
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/service/work"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/service/work/7"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&harness.server)
        .await;

    let worker = harness.worker(
        StubExecutor::new(WorkOutcome::successful(vec![], vec![])),
        Duration::from_secs(30),
    );
    let sentinels = harness.sentinels.clone();
    let run = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    sentinels.request_termination();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("worker did not exit")
        .unwrap()
        .unwrap();

    let all = harness.server.received_requests().await.unwrap_or_default();
    let methods: Vec<String> = all.iter().map(|r| r.method.to_string()).collect();
    let first_put = methods.iter().position(|m| m == "PUT").expect("a PUT happened");
    assert_eq!(methods[..first_put].iter().filter(|m| *m == "GET").count(), 1);
    // the PUT for the item precedes any further GET
    assert!(methods[..first_put].iter().all(|m| m == "GET"));
}
