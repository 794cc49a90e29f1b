//! Retrying failed and cancelled jobs

use crate::helpers::*;
use stagegate::{JobStatus, JobStatus::*, PipelineStatus, SchedulerError};

#[tokio::test]
async fn test_retry_unblocks_later_stages() {
    let h = Harness::from_yaml(BUILD_TEST_DEPLOY).await;

    h.succeed("build").await;
    h.fail("test").await;
    assert_eq!(h.status("deploy").await, Skipped);
    assert_eq!(h.pipeline_status().await, PipelineStatus::Failed);

    let failed = h.job_id("test").await;
    let outcome = h.retry("test").await;
    let retried = outcome.created_job().expect("a new job record");
    assert_ne!(retried, failed);

    let pipeline = h.pipeline().await;
    assert_eq!(pipeline.status, PipelineStatus::Pending);
    assert!(pipeline.finished_at.is_none());

    // The failed record is kept as history
    let history: Vec<_> = pipeline.jobs.iter().filter(|job| job.name == "test").collect();
    assert_eq!(history.len(), 2);
    let old = pipeline.job(failed).unwrap();
    assert!(old.retried);
    assert_eq!(old.status, Failed);

    let new = pipeline.latest_job("test").unwrap();
    assert_eq!(new.id, retried);
    assert_eq!(new.status, Pending);
    assert_eq!(new.triggered_by.as_deref(), Some("tester"));
    assert_eq!(h.status("deploy").await, Created);

    h.succeed("test").await;
    assert_eq!(h.status("deploy").await, Pending);
    h.succeed("deploy").await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Success);
}

#[tokio::test]
async fn test_retry_waits_for_busy_later_stage() {
    let h = Harness::from_yaml(GITLAB_STYLE).await;
    h.succeed("build").await;
    h.fail("test").await;
    assert_eq!(h.status("test_failure").await, Pending);

    // test_failure was enqueued first, so the new test record waits for it
    h.retry("test").await;
    assert_statuses(
        &h.statuses().await,
        &[
            ("build", Success),
            ("test_failure", Pending),
            ("deploy", Created),
            ("production", Created),
            ("cleanup", Created),
            ("test", Created),
        ],
    );
    assert!(!h.process().await);

    h.succeed("test_failure").await;
    assert_eq!(h.status("test").await, Pending);
    assert_eq!(h.status("deploy").await, Created);

    h.succeed("test").await;
    assert_eq!(h.status("deploy").await, Pending);
    assert_eq!(h.manual_actions().await, vec!["production".to_string()]);

    h.succeed("deploy").await;
    h.succeed("cleanup").await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Success);
}

#[tokio::test]
async fn test_retry_cancelled_job() {
    let h = Harness::from_yaml(BUILD_TEST_DEPLOY).await;

    h.start("build").await;
    h.cancel_job("build").await;
    assert_eq!(h.status("test").await, Skipped);
    assert_eq!(h.pipeline_status().await, PipelineStatus::Canceled);

    h.retry("build").await;
    assert_statuses(
        &h.statuses().await,
        &[("build", Pending), ("test", Created), ("deploy", Created)],
    );
}

#[tokio::test]
async fn test_retrying_twice_creates_one_job() {
    let h = Harness::from_yaml(BUILD_TEST_DEPLOY).await;
    h.fail("build").await;

    let failed = h.job_id("build").await;
    let first = h
        .engine
        .retry(h.pipeline_id, failed, None)
        .await
        .unwrap();
    assert!(first.created_job().is_some());

    let second = h
        .engine
        .retry(h.pipeline_id, failed, None)
        .await
        .unwrap();
    assert!(second.is_noop());

    let pipeline = h.pipeline().await;
    assert_eq!(pipeline.jobs.iter().filter(|job| job.name == "build").count(), 2);
}

#[tokio::test]
async fn test_retrying_successful_job_is_noop() {
    let h = Harness::from_yaml(BUILD_TEST_DEPLOY).await;
    h.succeed("build").await;

    let version = h.pipeline().await.lock_version;
    assert!(h.retry("build").await.is_noop());
    assert_eq!(h.pipeline().await.lock_version, version);
}

#[tokio::test]
async fn test_retrying_running_job_is_rejected() {
    let h = Harness::from_yaml(BUILD_TEST_DEPLOY).await;
    h.start("build").await;

    let build = h.job_id("build").await;
    let err = h.engine.retry(h.pipeline_id, build, None).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::NotRetryable {
            status: JobStatus::Running,
            ..
        }
    ));
}

#[tokio::test]
async fn test_job_of_another_pipeline_is_rejected() {
    let first = Harness::from_yaml(BUILD_TEST_DEPLOY).await;
    first.fail("build").await;
    let foreign = first.job_id("build").await;

    let other = first
        .engine
        .create_pipeline(
            stagegate::PipelineConfig::from_yaml(BUILD_TEST_DEPLOY)
                .unwrap()
                .to_pipeline(),
        )
        .await
        .unwrap();

    let err = first.engine.retry(other.id, foreign, None).await.unwrap_err();
    match err {
        SchedulerError::JobPipelineMismatch {
            job_id,
            expected,
            actual,
        } => {
            assert_eq!(job_id, foreign);
            assert_eq!(expected, other.id);
            assert_eq!(actual, first.pipeline_id);
        }
        other => panic!("unexpected error {:?}", other),
    }
}
