//! C4: Quota Ledger. Counts completed units per `(session_id, kind)` and
//! honors a per-session override multiplier (spec §4.6).

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use thiserror::Error;

use crate::common::JobId;

use super::models::{Kind, Remaining};

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Current completed count for `(session_id, kind)` and the session's override level.
    async fn get(&self, session_id: &str, kind: Kind) -> Result<(i64, i32), QuotaError>;

    /// Credit one completed unit for `(session_id, kind)`, attributed to `job_id`.
    /// Called only on successful completion (C7), never at intake, so failed or
    /// blocked jobs never consume quota. Idempotent per `job_id`: safe to call
    /// more than once for the same completion (spec §4.3 step 3 — a redelivery
    /// of an already-`completed` job re-asserts the credit instead of skipping
    /// it outright, so a prior increment failure isn't silently lost).
    async fn increment(&self, job_id: JobId, session_id: &str, kind: Kind) -> Result<(), QuotaError>;

    /// Remaining budget for every kind, for `/login` and `/submit` responses.
    async fn remaining(
        &self,
        session_id: &str,
        base_limits: &HashMap<Kind, i64>,
    ) -> Result<Remaining, QuotaError>;

    /// Operator-facing override adjustment (mechanism out of scope per spec §4.6;
    /// kept here as the single write path so `effective_budget` stays consistent).
    async fn set_override_level(&self, session_id: &str, level: i32) -> Result<(), QuotaError>;
}

/// Effective budget = base × (1 + override_level) — the linear reading spec §9
/// settles on as the most forgiving of the ambiguous source behaviors.
pub fn effective_budget(base_limit: i64, override_level: i32) -> i64 {
    base_limit * (1 + override_level as i64)
}

pub struct PostgresQuotaLedger {
    pool: PgPool,
}

impl PostgresQuotaLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn override_level(&self, session_id: &str) -> Result<i32, QuotaError> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT override_level FROM session_overrides WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(lvl,)| lvl).unwrap_or(0))
    }
}

#[async_trait]
impl QuotaLedger for PostgresQuotaLedger {
    async fn get(&self, session_id: &str, kind: Kind) -> Result<(i64, i32), QuotaError> {
        let count: Option<(i64,)> = sqlx::query_as(
            "SELECT completed_count FROM quota_counters WHERE session_id = $1 AND kind = $2",
        )
        .bind(session_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;

        let override_level = self.override_level(session_id).await?;
        Ok((count.map(|(c,)| c).unwrap_or(0), override_level))
    }

    async fn increment(&self, job_id: JobId, session_id: &str, kind: Kind) -> Result<(), QuotaError> {
        let mut tx = self.pool.begin().await?;

        // First writer for this job_id wins; a redelivered credit for a job
        // that already has a row here is a no-op rather than a double count.
        let credited = sqlx::query(
            r#"
            INSERT INTO quota_credits (job_id, session_id, kind)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job_id.into_uuid())
        .bind(session_id)
        .bind(kind)
        .execute(&mut *tx)
        .await?;

        if credited.rows_affected() == 1 {
            sqlx::query(
                r#"
                INSERT INTO quota_counters (session_id, kind, completed_count)
                VALUES ($1, $2, 1)
                ON CONFLICT (session_id, kind) DO UPDATE
                    SET completed_count = quota_counters.completed_count + 1
                "#,
            )
            .bind(session_id)
            .bind(kind)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remaining(
        &self,
        session_id: &str,
        base_limits: &HashMap<Kind, i64>,
    ) -> Result<Remaining, QuotaError> {
        let override_level = self.override_level(session_id).await?;
        let mut remaining = Remaining::default();

        for kind in [Kind::Card, Kind::Video, Kind::Print] {
            let (count, _) = self.get(session_id, kind).await?;
            let base = base_limits.get(&kind).copied().unwrap_or(0);
            let left = (effective_budget(base, override_level) - count).max(0);
            match kind {
                Kind::Card => remaining.card = left,
                Kind::Video => remaining.video = left,
                Kind::Print => remaining.print = left,
            }
        }

        Ok(remaining)
    }

    async fn set_override_level(&self, session_id: &str, level: i32) -> Result<(), QuotaError> {
        sqlx::query(
            r#"
            INSERT INTO session_overrides (session_id, override_level)
            VALUES ($1, $2)
            ON CONFLICT (session_id) DO UPDATE SET override_level = EXCLUDED.override_level
            "#,
        )
        .bind(session_id)
        .bind(level)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
