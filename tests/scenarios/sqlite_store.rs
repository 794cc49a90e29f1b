//! The same scenarios persisted through SQLite

use crate::helpers::*;
use stagegate::{JobStatus::*, PipelineStatus, SqlitePipelineStore};
use std::sync::Arc;

const LAZY_GITLAB: &str = r#"
name: "lazy-gitlab"
lazy: true
stages: [build, test, deploy, cleanup]
jobs:
  - name: build
    stage: build
  - name: test
    stage: test
  - name: deploy
    stage: deploy
  - name: production
    stage: deploy
    when: manual
  - name: cleanup
    stage: cleanup
    when: always
"#;

async fn sqlite_harness(yaml: &str) -> Harness {
    let store = SqlitePipelineStore::new(":memory:").await.unwrap();
    Harness::with_store(yaml, Arc::new(store)).await
}

#[tokio::test]
async fn test_retry_and_manual_action_survive_reloads() {
    let h = sqlite_harness(LAZY_GITLAB).await;
    assert_statuses(&h.statuses().await, &[("build", Pending)]);

    h.succeed("build").await;
    h.fail("test").await;
    assert_statuses(
        &h.statuses().await,
        &[
            ("build", Success),
            ("test", Failed),
            ("deploy", Skipped),
            ("production", Skipped),
            ("cleanup", Pending),
        ],
    );

    h.succeed("cleanup").await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Failed);

    // Replacement records are appended after the finished cleanup job
    h.retry("test").await;
    assert_statuses(
        &h.statuses().await,
        &[
            ("build", Success),
            ("cleanup", Success),
            ("test", Pending),
            ("deploy", Created),
            ("production", Created),
        ],
    );

    h.succeed("test").await;
    assert_eq!(h.status("deploy").await, Pending);
    assert_eq!(h.manual_actions().await, vec!["production".to_string()]);

    h.play("production").await;
    h.succeed("deploy").await;
    h.succeed("production").await;
    assert_eq!(h.pipeline_status().await, PipelineStatus::Success);

    let pipeline = h.pipeline().await;
    assert_eq!(pipeline.jobs.iter().filter(|job| job.retried).count(), 4);
    assert!(pipeline.lazy_stages.is_empty());
}

#[tokio::test]
async fn test_cancel_persists_halt() {
    let h = sqlite_harness(BUILD_TEST_DEPLOY).await;
    h.start("build").await;
    h.cancel().await;

    let pipeline = h.pipeline().await;
    assert_eq!(pipeline.status, PipelineStatus::Canceled);
    assert!(pipeline.is_halted());
    assert!(!h.process().await);

    let summaries = h.engine.list_pipelines().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].status, PipelineStatus::Canceled);
    assert_eq!(summaries[0].job_count, 3);
}
