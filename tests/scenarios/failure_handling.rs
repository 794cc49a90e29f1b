//! on_failure, always and on_success jobs after a failed stage

use crate::helpers::*;
use stagegate::{JobStatus::*, PipelineStatus};

#[tokio::test]
async fn test_success_path_skips_failure_jobs() {
    let h = Harness::from_yaml(GITLAB_STYLE).await;
    assert_statuses(
        &h.statuses().await,
        &[
            ("build", Pending),
            ("test", Created),
            ("test_failure", Created),
            ("deploy", Created),
            ("production", Created),
            ("cleanup", Created),
        ],
    );

    h.succeed("build").await;
    h.succeed("test").await;
    assert_statuses(
        &h.statuses().await,
        &[
            ("build", Success),
            ("test", Success),
            ("test_failure", Skipped),
            ("deploy", Pending),
            ("production", Skipped),
            ("cleanup", Created),
        ],
    );

    h.succeed("deploy").await;
    assert_eq!(h.status("cleanup").await, Pending);

    h.succeed("cleanup").await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Success);
}

#[tokio::test]
async fn test_failed_test_runs_failure_and_cleanup_jobs() {
    let h = Harness::from_yaml(GITLAB_STYLE).await;

    h.succeed("build").await;
    h.fail("test").await;
    assert_statuses(
        &h.statuses().await,
        &[
            ("build", Success),
            ("test", Failed),
            ("test_failure", Pending),
            ("deploy", Created),
            ("production", Created),
            ("cleanup", Created),
        ],
    );

    h.succeed("test_failure").await;
    assert_statuses(
        &h.statuses().await,
        &[
            ("build", Success),
            ("test", Failed),
            ("test_failure", Success),
            ("deploy", Skipped),
            ("production", Skipped),
            ("cleanup", Pending),
        ],
    );
    assert!(h.manual_actions().await.is_empty());

    h.succeed("cleanup").await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Failed);
}

#[tokio::test]
async fn test_failure_job_failing_still_runs_cleanup() {
    let h = Harness::from_yaml(GITLAB_STYLE).await;

    h.succeed("build").await;
    h.fail("test").await;
    h.fail("test_failure").await;
    assert_eq!(h.status("deploy").await, Skipped);
    assert_eq!(h.status("cleanup").await, Pending);

    h.succeed("cleanup").await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Failed);
}

#[tokio::test]
async fn test_failed_deploy_runs_cleanup() {
    let h = Harness::from_yaml(GITLAB_STYLE).await;

    h.succeed("build").await;
    h.succeed("test").await;
    h.fail("deploy").await;
    assert_eq!(h.status("cleanup").await, Pending);
    assert_eq!(h.pipeline_status().await, PipelineStatus::Pending);

    h.succeed("cleanup").await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Failed);
}

#[tokio::test]
async fn test_failure_skips_every_later_on_success_job() {
    let h = Harness::from_yaml(BUILD_TEST_DEPLOY).await;

    h.fail("build").await;
    assert_statuses(
        &h.statuses().await,
        &[("build", Failed), ("test", Skipped), ("deploy", Skipped)],
    );
    let pipeline = h.pipeline().await;
    assert_eq!(pipeline.status, PipelineStatus::Failed);
    assert!(pipeline.finished_at.is_some());
}

#[tokio::test]
async fn test_skip_cascade_across_condition_stages() {
    let yaml = r#"
name: "cascade"
stages: [first, manual_only, failure_only, always_only]
jobs:
  - name: first
    stage: first
  - name: approve
    stage: manual_only
    when: manual
  - name: rollback
    stage: failure_only
    when: on_failure
  - name: notify
    stage: always_only
    when: always
"#;
    let h = Harness::from_yaml(yaml).await;

    h.succeed("first").await;
    assert_statuses(
        &h.statuses().await,
        &[
            ("first", Success),
            ("approve", Skipped),
            ("rollback", Skipped),
            ("notify", Pending),
        ],
    );
    assert_eq!(h.manual_actions().await, vec!["approve".to_string()]);
}
