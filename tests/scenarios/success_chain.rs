//! Stages run one after another when everything succeeds

use crate::helpers::*;
use stagegate::{JobStatus::*, PipelineStatus};

const THREE_STAGES: &str = r#"
name: "three-stages"
stages: [build, test, deploy]
jobs:
  - name: compile
    stage: build
  - name: assets
    stage: build
  - name: rspec
    stage: test
  - name: rubocop
    stage: test
  - name: release
    stage: deploy
"#;

#[tokio::test]
async fn test_stage_waits_for_every_job_below() {
    let h = Harness::from_yaml(THREE_STAGES).await;

    assert_statuses(
        &h.statuses().await,
        &[
            ("compile", Pending),
            ("assets", Pending),
            ("rspec", Created),
            ("rubocop", Created),
            ("release", Created),
        ],
    );
    assert_eq!(h.pipeline_status().await, PipelineStatus::Pending);

    h.start("compile").await;
    h.succeed("compile").await;
    assert_eq!(h.status("rspec").await, Created);
    assert_eq!(h.pipeline_status().await, PipelineStatus::Pending);

    h.succeed("assets").await;
    assert_statuses(
        &h.statuses().await,
        &[
            ("compile", Success),
            ("assets", Success),
            ("rspec", Pending),
            ("rubocop", Pending),
            ("release", Created),
        ],
    );
}

#[tokio::test]
async fn test_full_chain_reaches_success() {
    let h = Harness::from_yaml(THREE_STAGES).await;

    for name in ["compile", "assets", "rspec", "rubocop"] {
        h.start(name).await;
        assert_eq!(h.pipeline_status().await, PipelineStatus::Running);
        h.succeed(name).await;
    }
    assert_eq!(h.status("release").await, Pending);

    h.succeed("release").await;
    let pipeline = h.pipeline().await;
    assert_eq!(pipeline.status, PipelineStatus::Success);
    assert!(pipeline.finished_at.is_some());
    assert_eq!(
        h.transitions_of("release"),
        vec![(Created, Pending), (Pending, Success)]
    );
}

#[tokio::test]
async fn test_processing_twice_changes_nothing() {
    let h = Harness::from_yaml(THREE_STAGES).await;
    h.succeed("compile").await;
    h.succeed("assets").await;

    let before = h.pipeline().await;
    assert!(!h.process().await);
    assert!(!h.process().await);
    let after = h.pipeline().await;

    assert_eq!(before.lock_version, after.lock_version);
    assert_eq!(before.status, after.status);
    assert_eq!(h.statuses().await.len(), 5);
}

#[tokio::test]
async fn test_allowed_failure_does_not_block() {
    let yaml = r#"
name: "allow-failure"
stages: [lint, test]
jobs:
  - name: rubocop
    stage: lint
    allow_failure: true
  - name: rspec
    stage: test
"#;
    let h = Harness::from_yaml(yaml).await;

    h.fail("rubocop").await;
    assert_eq!(h.status("rspec").await, Pending);

    h.succeed("rspec").await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Success);
}

#[tokio::test]
async fn test_reporting_same_status_twice_is_noop() {
    let h = Harness::from_yaml(BUILD_TEST_DEPLOY).await;

    h.start("build").await;
    let version = h.pipeline().await.lock_version;
    assert!(h.start("build").await.is_noop());
    assert_eq!(h.pipeline().await.lock_version, version);
}

#[tokio::test]
async fn test_pipeline_without_jobs_is_skipped() {
    let yaml = r#"
name: "empty"
stages: [build]
jobs: []
"#;
    let h = Harness::from_yaml(yaml).await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Skipped);
}
