//! C1: Job Store. A key-value store keyed by `job_id` with a secondary index
//! on `session_id`, backed by Postgres (spec §4.5).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::common::JobId;

use super::models::{ErrorInfo, Job, Kind, State};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found")]
    NotFound,

    #[error("illegal transition from {from:?} to {to:?}")]
    IllegalTransition { from: State, to: State },

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Fields that may be set alongside a state transition. Left as `None` when
/// the transition doesn't touch that field.
#[derive(Debug, Default, Clone)]
pub struct StateUpdate {
    pub artifact_key: Option<String>,
    pub error: Option<ErrorInfo>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// When true, `attempt` is incremented as part of this update.
    pub bump_attempt: bool,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create-or-replace a job record.
    async fn put(&self, job: &Job) -> Result<(), StoreError>;

    /// Point read by job id.
    async fn get(&self, job_id: JobId) -> Result<Job, StoreError>;

    /// Conditional update: rejects any transition not present in the matrix
    /// (spec §4.5). A `completed -> completed` call is an idempotent no-op
    /// that returns the existing record unchanged.
    async fn update_state(
        &self,
        job_id: JobId,
        next: State,
        fields: StateUpdate,
    ) -> Result<Job, StoreError>;

    /// Next per-`(session_id, kind)` ordinal, assigned atomically (spec §3,
    /// `user_ordinal`).
    async fn next_user_ordinal(&self, session_id: &str, kind: Kind) -> Result<i32, StoreError>;

    /// Completed jobs for a session, most recent first (spec §4.5, gallery read path).
    async fn list_by_session(
        &self,
        session_id: &str,
        kind: Option<Kind>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError>;

    /// Offline reconciliation: jobs stuck in `processing` since before
    /// `older_than` are marked `failed(dead_lettered)` (spec §4.3, point 6).
    /// Returns the ids that were reconciled.
    async fn reconcile_stuck_jobs(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError>;
}

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: Uuid,
    session_id: String,
    kind: Kind,
    state: State,
    prompt: String,
    artifact_key: Option<String>,
    error_kind: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    attempt: i32,
    user_ordinal: i32,
}

impl From<JobRow> for Job {
    fn from(r: JobRow) -> Self {
        Job {
            job_id: JobId::from_uuid(r.job_id),
            session_id: r.session_id,
            kind: r.kind,
            state: r.state,
            prompt: r.prompt,
            artifact_key: r.artifact_key,
            error: r.error_kind.map(|kind| ErrorInfo {
                kind,
                message: r.error_message.unwrap_or_default(),
            }),
            created_at: r.created_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            attempt: r.attempt,
            user_ordinal: r.user_ordinal,
        }
    }
}

const JOB_COLUMNS: &str = "job_id, session_id, kind, state, prompt, artifact_key, \
     error_kind, error_message, created_at, started_at, completed_at, attempt, user_ordinal";

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn put(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, session_id, kind, state, prompt, artifact_key,
                error_kind, error_message, created_at, started_at, completed_at,
                attempt, user_ordinal
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (job_id) DO UPDATE SET
                state = EXCLUDED.state,
                artifact_key = EXCLUDED.artifact_key,
                error_kind = EXCLUDED.error_kind,
                error_message = EXCLUDED.error_message,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                attempt = EXCLUDED.attempt
            "#,
        )
        .bind(job.job_id.into_uuid())
        .bind(&job.session_id)
        .bind(job.kind)
        .bind(job.state)
        .bind(&job.prompt)
        .bind(&job.artifact_key)
        .bind(job.error.as_ref().map(|e| e.kind.clone()))
        .bind(job.error.as_ref().map(|e| e.message.clone()))
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.attempt)
        .bind(job.user_ordinal)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"
        ))
        .bind(job_id.into_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        Ok(row.into())
    }

    async fn update_state(
        &self,
        job_id: JobId,
        next: State,
        fields: StateUpdate,
    ) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1 FOR UPDATE"
        ))
        .bind(job_id.into_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;
        let current: Job = current.into();

        if current.state == State::Completed && next == State::Completed {
            // Idempotent no-op: a redelivered message whose job already
            // succeeded must not touch the record again.
            tx.commit().await?;
            return Ok(current);
        }

        if !current.state.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                from: current.state,
                to: next,
            });
        }

        let attempt = if fields.bump_attempt {
            current.attempt + 1
        } else {
            current.attempt
        };

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs SET
                state = $1,
                artifact_key = COALESCE($2, artifact_key),
                error_kind = COALESCE($3, error_kind),
                error_message = COALESCE($4, error_message),
                started_at = COALESCE($5, started_at),
                completed_at = COALESCE($6, completed_at),
                attempt = $7
            WHERE job_id = $8
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(next)
        .bind(&fields.artifact_key)
        .bind(fields.error.as_ref().map(|e| e.kind.clone()))
        .bind(fields.error.as_ref().map(|e| e.message.clone()))
        .bind(fields.started_at)
        .bind(fields.completed_at)
        .bind(attempt)
        .bind(job_id.into_uuid())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn next_user_ordinal(&self, session_id: &str, kind: Kind) -> Result<i32, StoreError> {
        let (ordinal,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO user_ordinal_counters (session_id, kind, next_value)
            VALUES ($1, $2, 2)
            ON CONFLICT (session_id, kind) DO UPDATE
                SET next_value = user_ordinal_counters.next_value + 1
            RETURNING next_value - 1
            "#,
        )
        .bind(session_id)
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;

        Ok(ordinal)
    }

    async fn list_by_session(
        &self,
        session_id: &str,
        kind: Option<Kind>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE session_id = $1
              AND state = 'completed'
              AND ($2::job_kind IS NULL OR kind = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        ))
        .bind(session_id)
        .bind(kind)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn reconcile_stuck_jobs(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            r#"
            UPDATE jobs SET
                state = 'failed',
                error_kind = 'dead_lettered',
                error_message = 'reconciled: stuck in processing past the dead-letter reconciliation threshold',
                completed_at = NULL
            WHERE state = 'processing' AND started_at < $1
            RETURNING job_id
            "#,
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| JobId::from_uuid(id)).collect())
    }
}
