//! SQLite-based pipeline store

use crate::core::{Condition, HaltReason, Job, JobStatus, LazyStage, Pipeline, PipelineStatus};
use crate::persistence::{Changeset, PipelineStore, PipelineSummary, StoreError};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

/// SQLite pipeline store
pub struct SqlitePipelineStore {
    pool: SqlitePool,
}

impl SqlitePipelineStore {
    /// Open (or create) a database; `:memory:` gives a private in-memory database
    pub async fn new(db_path: &str) -> Result<Self, StoreError> {
        if db_path == ":memory:" {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
            return Self::connect(options, 1).await;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        Self::connect(options, 5).await
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self, StoreError> {
        let db_path = Self::default_path();
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).map_err(|err| StoreError::Unavailable(err.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        Self::connect(options, 5).await
    }

    /// Database location used when none is given
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stagegate")
            .join("pipelines.db")
    }

    async fn connect(
        options: SqliteConnectOptions,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                lock_version INTEGER NOT NULL DEFAULT 0,
                halt TEXT,
                config_source TEXT,
                created_at TEXT NOT NULL,
                finished_at TEXT
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                pipeline_id TEXT NOT NULL REFERENCES pipelines(id),
                name TEXT NOT NULL,
                stage TEXT NOT NULL,
                stage_index INTEGER NOT NULL,
                status TEXT NOT NULL,
                run_when TEXT NOT NULL,
                allow_failure INTEGER NOT NULL DEFAULT 0,
                position INTEGER NOT NULL,
                retried INTEGER NOT NULL DEFAULT 0,
                triggered_by TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT
            );

            CREATE TABLE IF NOT EXISTS lazy_stages (
                pipeline_id TEXT NOT NULL REFERENCES pipelines(id),
                stage_index INTEGER NOT NULL,
                name TEXT NOT NULL,
                PRIMARY KEY (pipeline_id, stage_index)
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_pipeline ON jobs(pipeline_id, position);
            CREATE INDEX IF NOT EXISTS idx_pipelines_created_at ON pipelines(created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
        Uuid::parse_str(value)
            .map_err(|err| StoreError::Corrupt(format!("bad id '{}': {}", value, err)))
    }

    fn parse<T: FromStr>(value: &str) -> Result<T, StoreError>
    where
        T::Err: std::fmt::Display,
    {
        value
            .parse()
            .map_err(|err: T::Err| StoreError::Corrupt(err.to_string()))
    }

    fn parse_halt(value: Option<String>) -> Result<Option<HaltReason>, StoreError> {
        value
            .map(|json| {
                serde_json::from_str(&json).map_err(|err| StoreError::Corrupt(err.to_string()))
            })
            .transpose()
    }

    fn encode_halt(reason: &HaltReason) -> Result<String, StoreError> {
        serde_json::to_string(reason).map_err(|err| StoreError::Corrupt(err.to_string()))
    }

    fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
        Ok(Job {
            id: Self::parse_uuid(&row.try_get::<String, _>("id")?)?,
            pipeline_id: Self::parse_uuid(&row.try_get::<String, _>("pipeline_id")?)?,
            name: row.try_get("name")?,
            stage: row.try_get("stage")?,
            stage_index: row.try_get::<i64, _>("stage_index")? as u32,
            status: Self::parse::<JobStatus>(&row.try_get::<String, _>("status")?)?,
            condition: Self::parse::<Condition>(&row.try_get::<String, _>("run_when")?)?,
            allow_failure: row.try_get("allow_failure")?,
            position: row.try_get::<i64, _>("position")? as u64,
            retried: row.try_get("retried")?,
            triggered_by: row.try_get("triggered_by")?,
            created_at: Self::from_naive(row.try_get("created_at")?),
            started_at: row
                .try_get::<Option<NaiveDateTime>, _>("started_at")?
                .map(Self::from_naive),
            finished_at: row
                .try_get::<Option<NaiveDateTime>, _>("finished_at")?
                .map(Self::from_naive),
        })
    }

    async fn insert_job(conn: &mut SqliteConnection, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs
            (id, pipeline_id, name, stage, stage_index, status, run_when, allow_failure,
             position, retried, triggered_by, created_at, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.pipeline_id.to_string())
        .bind(&job.name)
        .bind(&job.stage)
        .bind(job.stage_index as i64)
        .bind(job.status.as_str())
        .bind(job.condition.as_str())
        .bind(job.allow_failure)
        .bind(job.position as i64)
        .bind(job.retried)
        .bind(&job.triggered_by)
        .bind(Self::to_naive(job.created_at))
        .bind(job.started_at.map(Self::to_naive))
        .bind(job.finished_at.map(Self::to_naive))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl PipelineStore for SqlitePipelineStore {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let halt = pipeline.halt.as_ref().map(Self::encode_halt).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO pipelines
            (id, name, status, lock_version, halt, config_source, created_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(pipeline.id.to_string())
        .bind(&pipeline.name)
        .bind(pipeline.status.as_str())
        .bind(pipeline.lock_version as i64)
        .bind(halt)
        .bind(&pipeline.config_source)
        .bind(Self::to_naive(pipeline.created_at))
        .bind(pipeline.finished_at.map(Self::to_naive))
        .execute(&mut *tx)
        .await?;

        for job in &pipeline.jobs {
            Self::insert_job(&mut *tx, job).await?;
        }

        for stage in &pipeline.lazy_stages {
            sqlx::query(
                "INSERT INTO lazy_stages (pipeline_id, stage_index, name) VALUES (?1, ?2, ?3)",
            )
            .bind(pipeline.id.to_string())
            .bind(stage.index as i64)
            .bind(&stage.name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline, StoreError> {
        let id = pipeline_id.to_string();
        let row = sqlx::query(
            r#"
            SELECT id, name, status, lock_version, halt, config_source, created_at, finished_at
            FROM pipelines
            WHERE id = ?1
            "#,
        )
        .bind(&id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::PipelineNotFound(pipeline_id))?;

        let jobs = sqlx::query(
            r#"
            SELECT id, pipeline_id, name, stage, stage_index, status, run_when, allow_failure,
                   position, retried, triggered_by, created_at, started_at, finished_at
            FROM jobs
            WHERE pipeline_id = ?1
            ORDER BY position ASC
            "#,
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(Self::job_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let lazy_stages = sqlx::query(
            "SELECT stage_index, name FROM lazy_stages WHERE pipeline_id = ?1 ORDER BY stage_index ASC",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| -> Result<LazyStage, StoreError> {
            Ok(LazyStage {
                index: row.try_get::<i64, _>("stage_index")? as u32,
                name: row.try_get("name")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Pipeline {
            id: pipeline_id,
            name: row.try_get("name")?,
            status: Self::parse::<PipelineStatus>(&row.try_get::<String, _>("status")?)?,
            jobs,
            lazy_stages,
            lock_version: row.try_get::<i64, _>("lock_version")? as u64,
            halt: Self::parse_halt(row.try_get("halt")?)?,
            config_source: row.try_get("config_source")?,
            created_at: Self::from_naive(row.try_get("created_at")?),
            finished_at: row
                .try_get::<Option<NaiveDateTime>, _>("finished_at")?
                .map(Self::from_naive),
        })
    }

    async fn save_transitions(&self, changeset: &Changeset) -> Result<(), StoreError> {
        let pipeline_id = changeset.pipeline_id.to_string();
        let conflict = || StoreError::Conflict {
            pipeline_id: changeset.pipeline_id,
        };
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query(
            "UPDATE pipelines SET lock_version = lock_version + 1 WHERE id = ?1 AND lock_version = ?2",
        )
        .bind(&pipeline_id)
        .bind(changeset.expected_lock_version as i64)
        .execute(&mut *tx)
        .await?;

        if locked.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM pipelines WHERE id = ?1")
                .bind(&pipeline_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => conflict(),
                None => StoreError::PipelineNotFound(changeset.pipeline_id),
            });
        }

        for job_id in &changeset.superseded {
            let updated = sqlx::query(
                "UPDATE jobs SET retried = 1 WHERE id = ?1 AND pipeline_id = ?2 AND retried = 0",
            )
            .bind(job_id.to_string())
            .bind(&pipeline_id)
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(conflict());
            }
        }

        for transition in &changeset.transitions {
            let started_at =
                (transition.to == JobStatus::Running).then(|| Self::to_naive(transition.at));
            let finished_at = transition.to.is_terminal().then(|| Self::to_naive(transition.at));

            let updated = sqlx::query(
                r#"
                UPDATE jobs
                SET status = ?1,
                    started_at = COALESCE(?2, started_at),
                    finished_at = COALESCE(?3, finished_at)
                WHERE id = ?4 AND pipeline_id = ?5 AND status = ?6
                "#,
            )
            .bind(transition.to.as_str())
            .bind(started_at)
            .bind(finished_at)
            .bind(transition.job_id.to_string())
            .bind(&pipeline_id)
            .bind(transition.from.as_str())
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(conflict());
            }
        }

        for job in &changeset.created_jobs {
            Self::insert_job(&mut *tx, job).await?;
        }

        for stage_index in &changeset.materialized_stages {
            sqlx::query("DELETE FROM lazy_stages WHERE pipeline_id = ?1 AND stage_index = ?2")
                .bind(&pipeline_id)
                .bind(*stage_index as i64)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(reason) = &changeset.halt {
            sqlx::query("UPDATE pipelines SET halt = ?1 WHERE id = ?2")
                .bind(Self::encode_halt(reason)?)
                .bind(&pipeline_id)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(change) = &changeset.status {
            sqlx::query("UPDATE pipelines SET status = ?1, finished_at = ?2 WHERE id = ?3")
                .bind(change.to.as_str())
                .bind(change.finished_at.map(Self::to_naive))
                .bind(&pipeline_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Uuid, StoreError> {
        let row = sqlx::query("SELECT pipeline_id FROM jobs WHERE id = ?1")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::JobNotFound(job_id))?;

        Self::parse_uuid(&row.try_get::<String, _>("pipeline_id")?)
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.name, p.status, p.created_at, p.finished_at,
                   (SELECT COUNT(*) FROM jobs j WHERE j.pipeline_id = p.id AND j.retried = 0) AS job_count
            FROM pipelines p
            ORDER BY p.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PipelineSummary, StoreError> {
                Ok(PipelineSummary {
                    id: Self::parse_uuid(&row.try_get::<String, _>("id")?)?,
                    name: row.try_get("name")?,
                    status: Self::parse::<PipelineStatus>(&row.try_get::<String, _>("status")?)?,
                    job_count: row.try_get::<i64, _>("job_count")? as usize,
                    created_at: Self::from_naive(row.try_get("created_at")?),
                    finished_at: row
                        .try_get::<Option<NaiveDateTime>, _>("finished_at")?
                        .map(Self::from_naive),
                })
            })
            .collect()
    }
}
