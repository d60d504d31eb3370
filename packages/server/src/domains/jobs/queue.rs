//! C3: Work Queue. At-least-once, Postgres-backed FIFO-ish handoff with a
//! per-message visibility timeout, a redelivery cap, and a dead-letter sink
//! (spec §4.2), grounded in the same lease/claim pattern used for scheduled
//! background jobs elsewhere in this codebase: `FOR UPDATE SKIP LOCKED` to
//! claim, a `visible_at` column standing in for the lease expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::common::JobId;

use super::models::{Kind, QueueMessage};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Opaque handle identifying one delivery of a message. Deletion is the
/// consumer's explicit acknowledgement of successful processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptHandle(pub Uuid);

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message: QueueMessage,
    pub receipt: ReceiptHandle,
    /// How many times this message has been delivered, including this delivery.
    pub delivery_count: i32,
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message_id: Uuid,
    pub job_id: JobId,
    pub delivery_count: i32,
    pub dead_lettered_at: DateTime<Utc>,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publish a message. No queue message may reference a nonexistent job,
    /// so callers must have already written the job record (spec §3 invariant).
    async fn publish(&self, message: QueueMessage) -> Result<(), QueueError>;

    /// Receive at most one message (batch size 1, spec §4.3 — "why batch size
    /// = 1"), long-polling up to `wait` so workers pick up with ~zero latency.
    /// Messages that have exhausted the redelivery cap are moved to the
    /// dead-letter sink transparently and never returned here.
    async fn receive(&self, wait: Duration) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Acknowledge successful processing.
    async fn delete(&self, receipt: ReceiptHandle) -> Result<(), QueueError>;

    /// Operator-visible dead-letter sink contents.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError>;
}

pub struct PostgresWorkQueue {
    pool: PgPool,
    visibility: Duration,
    max_redeliveries: i32,
}

impl PostgresWorkQueue {
    pub fn new(pool: PgPool, visibility: Duration, max_redeliveries: i32) -> Self {
        Self {
            pool,
            visibility,
            max_redeliveries,
        }
    }

    /// One non-blocking claim attempt. Returns `Ok(None)` if nothing is visible.
    async fn try_claim(&self) -> Result<Option<ReceivedMessage>, QueueError> {
        loop {
            let row = sqlx::query_as::<_, QueueRow>(
                r#"
                WITH next AS (
                    SELECT id FROM queue_messages
                    WHERE visible_at <= NOW()
                    ORDER BY created_at
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                UPDATE queue_messages
                SET visible_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                    delivery_count = delivery_count + 1
                WHERE id IN (SELECT id FROM next)
                RETURNING id, job_id, session_id, kind, prompt, user_ordinal, delivery_count
                "#,
            )
            .bind(self.visibility.as_millis().to_string())
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            // (cap + 1)th delivery: move to the dead-letter sink instead of
            // handing it back to a worker (spec §4.2).
            if row.delivery_count > self.max_redeliveries + 1 {
                self.dead_letter(&row).await?;
                continue;
            }

            return Ok(Some(ReceivedMessage {
                message: QueueMessage {
                    job_id: JobId::from_uuid(row.job_id),
                    session_id: row.session_id,
                    kind: row.kind,
                    prompt: row.prompt,
                    user_ordinal: row.user_ordinal,
                },
                receipt: ReceiptHandle(row.id),
                delivery_count: row.delivery_count,
            }));
        }
    }

    async fn dead_letter(&self, row: &QueueRow) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO dead_letter_messages (message_id, job_id, delivery_count, dead_lettered_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(row.id)
        .bind(row.job_id)
        .bind(row.delivery_count)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM queue_messages WHERE id = $1")
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    job_id: Uuid,
    session_id: String,
    kind: Kind,
    prompt: String,
    user_ordinal: i32,
    delivery_count: i32,
}

#[async_trait]
impl WorkQueue for PostgresWorkQueue {
    async fn publish(&self, message: QueueMessage) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO queue_messages (id, job_id, session_id, kind, prompt, user_ordinal, visible_at, delivery_count)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, NOW(), 0)
            "#,
        )
        .bind(message.job_id.into_uuid())
        .bind(&message.session_id)
        .bind(message.kind)
        .bind(&message.prompt)
        .bind(message.user_ordinal)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<ReceivedMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        let poll_interval = Duration::from_millis(250);

        loop {
            if let Some(received) = self.try_claim().await? {
                return Ok(Some(received));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll_interval.min(deadline - tokio::time::Instant::now())).await;
        }
    }

    async fn delete(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM queue_messages WHERE id = $1")
            .bind(receipt.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let rows: Vec<(Uuid, Uuid, i32, DateTime<Utc>)> = sqlx::query_as(
            "SELECT message_id, job_id, delivery_count, dead_lettered_at FROM dead_letter_messages ORDER BY dead_lettered_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(message_id, job_id, delivery_count, dead_lettered_at)| DeadLetter {
                message_id,
                job_id: JobId::from_uuid(job_id),
                delivery_count,
                dead_lettered_at,
            })
            .collect())
    }
}
