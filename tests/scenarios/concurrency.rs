//! Passes invalidated by a concurrent commit or a store outage

use crate::helpers::*;
use async_trait::async_trait;
use stagegate::{
    persistence::PipelineSummary, Changeset, EmbeddedConfig, EngineConfig, InMemoryStore,
    JobStatus, Pipeline, PipelineStore, SchedulerError, SchedulerEvent, StoreError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Lets another writer commit right before each of the next `races` saves,
/// and rejects every save while `down`
struct FlakyStore {
    inner: InMemoryStore,
    races: AtomicUsize,
    down: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            races: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PipelineStore for FlakyStore {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<(), StoreError> {
        self.inner.create_pipeline(pipeline).await
    }

    async fn load_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline, StoreError> {
        self.inner.load_pipeline(pipeline_id).await
    }

    async fn save_transitions(&self, changeset: &Changeset) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("database is locked".to_string()));
        }
        let racing = self
            .races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if racing {
            let current = self.inner.load_pipeline(changeset.pipeline_id).await?;
            self.inner.save_transitions(&Changeset::new(&current)).await?;
        }
        self.inner.save_transitions(changeset).await
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Uuid, StoreError> {
        self.inner.find_job(job_id).await
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>, StoreError> {
        self.inner.list_pipelines().await
    }
}

#[tokio::test]
async fn test_conflicting_pass_is_recomputed() {
    let store = Arc::new(FlakyStore::new());
    let h = Harness::with_store(BUILD_TEST_DEPLOY, store.clone()).await;
    assert_eq!(h.pipeline().await.lock_version, 1);

    store.races.store(1, Ordering::SeqCst);
    h.succeed("build").await;

    let pipeline = h.pipeline().await;
    assert_eq!(pipeline.latest_job("build").unwrap().status, JobStatus::Success);
    assert_eq!(pipeline.latest_job("test").unwrap().status, JobStatus::Pending);
    // one bump by the other writer, one by the recomputed pass
    assert_eq!(pipeline.lock_version, 3);

    // Only the committed attempt is reported
    assert_eq!(
        h.transitions_of("build"),
        vec![
            (JobStatus::Created, JobStatus::Pending),
            (JobStatus::Pending, JobStatus::Success)
        ]
    );
}

#[tokio::test]
async fn test_conflict_surfaces_after_retries_run_out() {
    let store = Arc::new(FlakyStore::new());
    let h = Harness::build(
        BUILD_TEST_DEPLOY,
        store.clone(),
        Arc::new(EmbeddedConfig),
        EngineConfig::new().with_max_conflict_retries(2),
    )
    .await;

    store.races.store(usize::MAX, Ordering::SeqCst);
    let build = h.job_id("build").await;
    let err = h.engine.succeed(h.pipeline_id, build).await.unwrap_err();

    match &err {
        SchedulerError::Conflict {
            pipeline_id,
            attempts,
        } => {
            assert_eq!(*pipeline_id, h.pipeline_id);
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.is_retryable());

    store.races.store(0, Ordering::SeqCst);
    assert_eq!(h.status("build").await, JobStatus::Pending);
}

#[tokio::test]
async fn test_no_retries_means_first_conflict_fails() {
    let store = Arc::new(FlakyStore::new());
    let h = Harness::build(
        BUILD_TEST_DEPLOY,
        store.clone(),
        Arc::new(EmbeddedConfig),
        EngineConfig::new().with_max_conflict_retries(0),
    )
    .await;

    store.races.store(1, Ordering::SeqCst);
    // nothing to commit, so no conflict either
    assert!(!h.engine.process(h.pipeline_id).await.unwrap());

    let build = h.job_id("build").await;
    let err = h.engine.start(h.pipeline_id, build).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Conflict { attempts: 1, .. }));
}

#[tokio::test]
async fn test_unavailable_store_applies_nothing() {
    let store = Arc::new(FlakyStore::new());
    let h = Harness::with_store(BUILD_TEST_DEPLOY, store.clone()).await;
    let before = h.pipeline().await;
    let events = h.events().len();

    store.down.store(true, Ordering::SeqCst);
    let build = h.job_id("build").await;
    let err = h.engine.succeed(h.pipeline_id, build).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Store(StoreError::Unavailable(_))));
    assert!(err.is_retryable());

    let after = h.pipeline().await;
    assert_eq!(after.lock_version, before.lock_version);
    assert_eq!(after.jobs, before.jobs);
    assert_eq!(h.events().len(), events);

    // The caller retries once the store is back
    store.down.store(false, Ordering::SeqCst);
    h.succeed("build").await;
    assert_eq!(h.status("test").await, JobStatus::Pending);
}

#[tokio::test]
async fn test_concurrent_reports_converge() {
    let yaml = r#"
name: "parallel"
stages: [build, test]
jobs:
  - name: compile
    stage: build
  - name: assets
    stage: build
  - name: rspec
    stage: test
"#;
    let h = Harness::from_yaml(yaml).await;
    let compile = h.job_id("compile").await;
    let assets = h.job_id("assets").await;

    let (first, second) = tokio::join!(
        h.engine.succeed(h.pipeline_id, compile),
        h.engine.succeed(h.pipeline_id, assets),
    );
    first.unwrap();
    second.unwrap();
    h.check_invariants().await;

    assert_statuses(
        &h.statuses().await,
        &[
            ("compile", JobStatus::Success),
            ("assets", JobStatus::Success),
            ("rspec", JobStatus::Pending),
        ],
    );

    let enqueued = h
        .events()
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                SchedulerEvent::JobTransitioned {
                    name,
                    to: JobStatus::Pending,
                    ..
                } if name == "rspec"
            )
        })
        .count();
    assert_eq!(enqueued, 1);
}
