//! Cancelling a pipeline is terminal

use crate::helpers::*;
use stagegate::{JobStatus::*, PipelineStatus, SchedulerError};

#[tokio::test]
async fn test_cancel_in_second_stage() {
    let h = Harness::from_yaml(GITLAB_STYLE).await;

    h.succeed("build").await;
    h.start("test").await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Running);

    h.cancel().await;
    assert_statuses(
        &h.statuses().await,
        &[
            ("build", Success),
            ("test", Canceled),
            ("test_failure", Canceled),
            ("deploy", Canceled),
            ("production", Canceled),
            ("cleanup", Canceled),
        ],
    );

    let pipeline = h.pipeline().await;
    assert_eq!(pipeline.status, PipelineStatus::Canceled);
    assert!(pipeline.finished_at.is_some());
    assert!(pipeline.is_halted());
    assert_eq!(h.transitions_of("test").last(), Some(&(Running, Canceled)));
}

#[tokio::test]
async fn test_cancelled_pipeline_takes_no_further_changes() {
    let h = Harness::from_yaml(BUILD_TEST_DEPLOY).await;
    h.start("build").await;
    h.cancel().await;
    let version = h.pipeline().await.lock_version;

    assert!(h.cancel().await.is_noop());
    assert!(!h.process().await);
    assert_eq!(h.pipeline().await.lock_version, version);

    let build = h.job_id("build").await;
    let err = h.engine.retry(h.pipeline_id, build, None).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::PipelineHalted {
            status: PipelineStatus::Canceled,
            ..
        }
    ));

    let err = h.engine.succeed(h.pipeline_id, build).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidTransition(_)));
    assert_eq!(h.pipeline_status().await, PipelineStatus::Canceled);
}

#[tokio::test]
async fn test_cancelling_finished_pipeline_is_noop() {
    let h = Harness::from_yaml(BUILD_TEST_DEPLOY).await;
    h.fail("build").await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Failed);

    assert!(h.cancel().await.is_noop());
    let pipeline = h.pipeline().await;
    assert_eq!(pipeline.status, PipelineStatus::Failed);
    assert!(!pipeline.is_halted());
}
