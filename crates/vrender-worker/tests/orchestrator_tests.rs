//! End-to-end tests for the render service.
//!
//! The render command is a small `sh` script so these run without FFmpeg.
//! Unix only.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use vrender_media::{
    AssetFetcher, BuildContext, MediaResult, RenderCommandBuilder, RenderInvocation,
};
use vrender_models::{Job, JobFailure, JobId, JobRequest, JobState, OutputLocation, RenderSpec};
use vrender_storage::{LocalPublisher, OutputPublisher, StorageError, StorageResult};
use vrender_worker::{CancelOutcome, RegistryError, RenderService, WorkerConfig, WorkerError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Runs `sh -c <script> sh <output_path>`.
struct ShellBuilder {
    script: String,
}

impl ShellBuilder {
    fn new(script: &str) -> Arc<Self> {
        Arc::new(Self {
            script: script.to_string(),
        })
    }
}

#[async_trait]
impl RenderCommandBuilder for ShellBuilder {
    async fn build(&self, _spec: &RenderSpec, ctx: &BuildContext) -> MediaResult<RenderInvocation> {
        let output = ctx.output_path();
        Ok(RenderInvocation::new(
            "sh",
            vec![
                "-c".to_string(),
                self.script.clone(),
                "sh".to_string(),
                output.display().to_string(),
            ],
            output,
        ))
    }
}

/// Never finishes building.
struct StallingBuilder;

#[async_trait]
impl RenderCommandBuilder for StallingBuilder {
    async fn build(&self, _spec: &RenderSpec, _ctx: &BuildContext) -> MediaResult<RenderInvocation> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        unreachable!("build deadline should have fired")
    }
}

/// Downloads every clip source, then renders like [`ShellBuilder`].
struct FetchingBuilder {
    fetcher: AssetFetcher,
    shell: Arc<ShellBuilder>,
}

#[async_trait]
impl RenderCommandBuilder for FetchingBuilder {
    async fn build(&self, spec: &RenderSpec, ctx: &BuildContext) -> MediaResult<RenderInvocation> {
        for (index, clip) in spec.clips.iter().enumerate() {
            self.fetcher.resolve(&clip.src, &ctx.work_dir, index).await?;
        }
        self.shell.build(spec, ctx).await
    }
}

struct RejectingPublisher;

#[async_trait]
impl OutputPublisher for RejectingPublisher {
    async fn publish(&self, _local: &Path, _file_name: &str) -> StorageResult<OutputLocation> {
        Err(StorageError::upload_failed("bucket refused the upload"))
    }
}

const WRITE_OUTPUT: &str = r#"echo "frame=1 fps=30" >&2; printf data > "$1""#;
const SLOW_WRITE_OUTPUT: &str = r#"sleep 0.5; printf data > "$1""#;

struct Harness {
    service: RenderService,
    outputs: TempDir,
    _work: TempDir,
}

fn config(work: &TempDir) -> WorkerConfig {
    WorkerConfig {
        work_dir: work.path().to_path_buf(),
        render_timeout: Duration::from_secs(20),
        payload_fetch_timeout: Duration::from_secs(5),
        ..WorkerConfig::default()
    }
}

fn harness_with(
    builder: Arc<dyn RenderCommandBuilder>,
    publisher: Option<Arc<dyn OutputPublisher>>,
    tweak: impl FnOnce(&mut WorkerConfig),
) -> Harness {
    let work = TempDir::new().unwrap();
    let outputs = TempDir::new().unwrap();
    let mut config = config(&work);
    tweak(&mut config);

    let publisher = publisher.unwrap_or_else(|| Arc::new(LocalPublisher::new(outputs.path(), None)));
    let service = RenderService::new(config, builder, publisher).unwrap();

    Harness {
        service,
        outputs,
        _work: work,
    }
}

fn harness(script: &str) -> Harness {
    harness_with(ShellBuilder::new(script), None, |_| {})
}

fn inline_request() -> JobRequest {
    JobRequest::inline(json!({"output": {"width": 640, "height": 360}}), None)
}

async fn wait_for(service: &RenderService, id: &JobId, check: impl Fn(&Job) -> bool) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let job = service.status(id).unwrap();
        if check(&job) {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting on job {} (state {})",
            id,
            job.state()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn wait_terminal(service: &RenderService, id: &JobId) -> Job {
    wait_for(service, id, Job::is_terminal).await
}

#[tokio::test]
async fn test_successful_render() {
    let h = harness(WRITE_OUTPUT);
    let id = h.service.submit(inline_request()).unwrap();

    let job = wait_terminal(&h.service, &id).await;
    assert_eq!(job.state(), JobState::Succeeded);
    assert_eq!(job.message, "Render completed");

    let output = job.output_location().unwrap();
    assert_eq!(output.url(), format!("/outputs/{}.mp4", id));
    assert!(h.outputs.path().join(format!("{}.mp4", id)).exists());
    assert!(job.logs.as_deref().unwrap_or_default().contains("frame=1"));
    assert!(job.started_at.is_some() && job.finished_at.is_some());
}

#[tokio::test]
async fn test_requested_output_filename() {
    let h = harness(WRITE_OUTPUT);
    let request = JobRequest::inline(json!({}), Some("promo.mp4".to_string()));
    let id = h.service.submit(request).unwrap();

    let job = wait_terminal(&h.service, &id).await;
    assert_eq!(job.output_location().unwrap().url(), "/outputs/promo.mp4");
    assert!(h.outputs.path().join("promo.mp4").exists());
}

#[tokio::test]
async fn test_submit_is_visible_immediately() {
    let h = harness(SLOW_WRITE_OUTPUT);
    let id = h.service.submit(inline_request()).unwrap();

    let job = h.service.status(&id).unwrap();
    assert!(matches!(job.state(), JobState::Queued | JobState::Running));
}

#[tokio::test]
async fn test_single_slot_runs_jobs_in_order() {
    let h = harness(SLOW_WRITE_OUTPUT);
    let first = h.service.submit(inline_request()).unwrap();
    let second = h.service.submit(inline_request()).unwrap();

    wait_for(&h.service, &first, |job| job.state() == JobState::Running).await;
    assert_eq!(h.service.status(&second).unwrap().state(), JobState::Queued);

    let first = wait_terminal(&h.service, &first).await;
    let second = wait_terminal(&h.service, &second).await;
    assert_eq!(first.state(), JobState::Succeeded);
    assert_eq!(second.state(), JobState::Succeeded);
    assert!(second.started_at.unwrap() >= first.finished_at.unwrap());
}

#[tokio::test]
async fn test_running_jobs_never_exceed_pool_size() {
    let h = harness_with(ShellBuilder::new(SLOW_WRITE_OUTPUT), None, |c| {
        c.max_concurrent_jobs = 2;
    });
    let ids: Vec<JobId> = (0..5)
        .map(|_| h.service.submit(inline_request()).unwrap())
        .collect();

    let mut peak = 0;
    loop {
        let counts = h.service.state_counts();
        peak = peak.max(counts.running);
        assert!(counts.running <= 2, "{} jobs running", counts.running);
        if counts.succeeded == ids.len() {
            break;
        }
        assert_eq!(counts.failed, 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(peak, 2);
}

#[tokio::test]
async fn test_render_exit_code_is_reported() {
    let h = harness(r#"echo "Invalid data found" >&2; exit 2"#);
    let id = h.service.submit(inline_request()).unwrap();

    let job = wait_terminal(&h.service, &id).await;
    match job.error() {
        Some(JobFailure::RenderFailed {
            exit_code,
            log_tail,
        }) => {
            assert_eq!(*exit_code, Some(2));
            assert!(log_tail.contains("Invalid data found"));
        }
        other => panic!("unexpected failure: {:?}", other),
    }
    assert!(job.output_location().is_none());
}

#[tokio::test]
async fn test_missing_output_fails() {
    let h = harness("exit 0");
    let id = h.service.submit(inline_request()).unwrap();

    let job = wait_terminal(&h.service, &id).await;
    assert!(matches!(job.error(), Some(JobFailure::OutputMissing { .. })));
}

#[tokio::test]
async fn test_render_timeout_kills_process() {
    let h = harness_with(ShellBuilder::new("sleep 30"), None, |c| {
        c.render_timeout = Duration::from_secs(1);
    });
    let started = std::time::Instant::now();
    let id = h.service.submit(inline_request()).unwrap();

    let job = wait_terminal(&h.service, &id).await;
    assert_eq!(job.error(), Some(&JobFailure::RenderTimeout { timeout_secs: 1 }));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_payload_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payload.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let h = harness(WRITE_OUTPUT);
    let url = format!("{}/payload.json", server.uri()).parse().unwrap();
    let id = h.service.submit(JobRequest::remote(url, None)).unwrap();

    let job = wait_terminal(&h.service, &id).await;
    match job.error() {
        Some(JobFailure::PayloadFetchError { status, .. }) => assert_eq!(*status, Some(500)),
        other => panic!("unexpected failure: {:?}", other),
    }
    assert!(job.logs.is_none());
}

#[tokio::test]
async fn test_remote_payload_renders() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payload.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": {"fps": 25}})))
        .mount(&server)
        .await;

    let h = harness(WRITE_OUTPUT);
    let url = format!("{}/payload.json", server.uri()).parse().unwrap();
    let id = h.service.submit(JobRequest::remote(url, None)).unwrap();

    let job = wait_terminal(&h.service, &id).await;
    assert_eq!(job.state(), JobState::Succeeded);
}

#[tokio::test]
async fn test_invalid_payload() {
    let h = harness(WRITE_OUTPUT);
    let request = JobRequest::inline(json!({"output": {"width": 3}}), None);
    let id = h.service.submit(request).unwrap();

    let job = wait_terminal(&h.service, &id).await;
    assert!(matches!(job.error(), Some(JobFailure::PayloadInvalid { .. })));
}

#[tokio::test]
async fn test_publish_failure() {
    let h = harness_with(
        ShellBuilder::new(WRITE_OUTPUT),
        Some(Arc::new(RejectingPublisher)),
        |_| {},
    );
    let id = h.service.submit(inline_request()).unwrap();

    let job = wait_terminal(&h.service, &id).await;
    match job.error() {
        Some(JobFailure::PublishFailed { message }) => {
            assert!(message.contains("bucket refused the upload"))
        }
        other => panic!("unexpected failure: {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_queued_and_running() {
    let h = harness("sleep 30");
    let running = h.service.submit(inline_request()).unwrap();
    let queued = h.service.submit(inline_request()).unwrap();

    wait_for(&h.service, &running, |job| job.state() == JobState::Running).await;

    assert_eq!(h.service.cancel(&queued).unwrap(), CancelOutcome::Dequeued);
    let job = h.service.status(&queued).unwrap();
    assert_eq!(job.error(), Some(&JobFailure::Cancelled));
    assert!(job.started_at.is_none());

    assert_eq!(h.service.cancel(&running).unwrap(), CancelOutcome::Signalled);
    let job = wait_terminal(&h.service, &running).await;
    assert_eq!(job.error(), Some(&JobFailure::Cancelled));

    assert_eq!(h.service.cancel(&running).unwrap(), CancelOutcome::AlreadyFinished);
    assert!(matches!(
        h.service.cancel(&JobId::from_string("missing")),
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_racing_completion_reports_finished_jobs() {
    let h = harness(WRITE_OUTPUT);

    for _ in 0..5 {
        let id = h.service.submit(inline_request()).unwrap();
        wait_for(&h.service, &id, |job| job.state() != JobState::Queued).await;

        loop {
            match h.service.cancel(&id).unwrap() {
                CancelOutcome::Signalled => {}
                CancelOutcome::AlreadyFinished => {
                    assert!(h.service.status(&id).unwrap().is_terminal());
                    break;
                }
                CancelOutcome::Dequeued => panic!("job {} was dequeued after it started", id),
            }
            tokio::task::yield_now().await;
        }
    }
}

#[tokio::test]
async fn test_slot_is_released_after_cancel() {
    let h = harness("sleep 30");
    let first = h.service.submit(inline_request()).unwrap();
    let second = h.service.submit(inline_request()).unwrap();

    wait_for(&h.service, &first, |job| job.state() == JobState::Running).await;
    h.service.cancel(&first).unwrap();

    wait_for(&h.service, &second, |job| job.state() == JobState::Running).await;
    h.service.cancel(&second).unwrap();
    wait_terminal(&h.service, &second).await;
}

#[tokio::test]
async fn test_terminal_jobs_are_evicted() {
    let h = harness_with(ShellBuilder::new(WRITE_OUTPUT), None, |c| {
        c.job_retention = Duration::ZERO;
        c.retention_sweep_interval = Duration::from_millis(50);
    });
    let id = h.service.submit(inline_request()).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        match h.service.status(&id) {
            Err(RegistryError::NotFound(_)) => break,
            Ok(job) => {
                assert!(tokio::time::Instant::now() < deadline, "job {} never evicted", id);
                assert_ne!(job.state(), JobState::Failed);
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_states_only_move_forward() {
    let h = harness(SLOW_WRITE_OUTPUT);
    let id = h.service.submit(inline_request()).unwrap();

    let rank = |state: JobState| match state {
        JobState::Queued => 0,
        JobState::Running => 1,
        JobState::Succeeded | JobState::Failed => 2,
    };

    let mut last = 0;
    loop {
        let job = h.service.status(&id).unwrap();
        let current = rank(job.state());
        assert!(current >= last);
        last = current;
        if job.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_shutdown_drains_and_rejects() {
    let h = harness(SLOW_WRITE_OUTPUT);
    let id = h.service.submit(inline_request()).unwrap();
    wait_for(&h.service, &id, |job| job.state() == JobState::Running).await;

    h.service.shutdown().await;
    assert_eq!(h.service.status(&id).unwrap().state(), JobState::Succeeded);

    let err = h.service.submit(inline_request()).unwrap_err();
    assert!(matches!(err, WorkerError::ShuttingDown));
}

#[tokio::test]
async fn test_stalled_build_times_out() {
    let h = harness_with(Arc::new(StallingBuilder), None, |c| {
        c.build_timeout = Duration::from_secs(1);
    });
    let started = std::time::Instant::now();
    let id = h.service.submit(inline_request()).unwrap();

    let job = wait_terminal(&h.service, &id).await;
    assert_eq!(job.error(), Some(&JobFailure::RenderTimeout { timeout_secs: 1 }));
    assert!(started.elapsed() < Duration::from_secs(10));

    // The slot is free again.
    let next = h.service.submit(inline_request()).unwrap();
    wait_for(&h.service, &next, |job| job.state() != JobState::Queued).await;
}

#[tokio::test]
async fn test_oversized_clip_download_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clips/huge.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64 * 1024]))
        .mount(&server)
        .await;

    let assets = TempDir::new().unwrap();
    let builder = Arc::new(FetchingBuilder {
        fetcher: AssetFetcher::new(assets.path(), None, Duration::from_secs(5), 1024).unwrap(),
        shell: ShellBuilder::new(WRITE_OUTPUT),
    });
    let h = harness_with(builder, None, |_| {});

    let payload = json!({"tracks": [{"type": "video", "clips": [
        {"src": format!("{}/clips/huge.mp4", server.uri()), "start": 0, "duration": 2}
    ]}]});
    let id = h.service.submit(JobRequest::inline(payload, None)).unwrap();

    let job = wait_terminal(&h.service, &id).await;
    match job.error() {
        Some(JobFailure::PayloadFetchError { message, status }) => {
            assert!(message.contains("byte limit"), "{}", message);
            assert_eq!(*status, None);
        }
        other => panic!("unexpected failure: {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_waits_for_cancelled_jobs() {
    let h = harness_with(ShellBuilder::new("sleep 30"), None, |c| {
        c.shutdown_timeout = Duration::from_millis(200);
    });
    let id = h.service.submit(inline_request()).unwrap();
    wait_for(&h.service, &id, |job| job.state() == JobState::Running).await;

    h.service.shutdown().await;

    let job = h.service.status(&id).unwrap();
    assert_eq!(job.state(), JobState::Failed);
    assert_eq!(job.error(), Some(&JobFailure::Cancelled));
}
