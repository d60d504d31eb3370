//! Explicit record shapes for the job pipeline (spec §3): `Job`, its
//! `State`/`Kind`/`ErrorInfo`, and the `QueueMessage` envelope. Kept as plain
//! structs rather than the source's dynamic records so every boundary
//! validates against a concrete shape (spec §9, "Dynamic/duck-typed patterns").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::JobId;

/// Generation variety. `Print` exists only for quota accounting (spec §6's
/// `quota.base.print`); no job is ever created with kind `print`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Card,
    Video,
    Print,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Card => "card",
            Kind::Video => "video",
            Kind::Print => "print",
        }
    }

    /// Plural form used in artifact keys (`kind_plural/...`).
    pub fn plural(&self) -> &'static str {
        match self {
            Kind::Card => "cards",
            Kind::Video => "videos",
            Kind::Print => "prints",
        }
    }

    /// File extension for the produced artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            Kind::Card => "png",
            Kind::Video => "mp4",
            Kind::Print => "png",
        }
    }

    /// Kinds that can actually be submitted through intake (`print` is quota-only).
    pub fn generatable() -> [Kind; 2] {
        [Kind::Card, Kind::Video]
    }
}

impl std::str::FromStr for Kind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(Kind::Card),
            "video" => Ok(Kind::Video),
            "print" => Ok(Kind::Print),
            _ => Err(()),
        }
    }
}

/// Job lifecycle state (spec §3, transition matrix in §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum State {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl State {
    /// Whether `self -> next` is a legal transition per the matrix in spec §4.5.
    pub fn can_transition_to(&self, next: State) -> bool {
        use State::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Queued) // redelivery
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Completed) // idempotent no-op
        )
    }
}

/// Short machine-readable error kind plus a human message (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

/// A job record (spec §3). Exists in the store before any queue message
/// referencing it is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub session_id: String,
    pub kind: Kind,
    pub state: State,
    pub prompt: String,
    pub artifact_key: Option<String>,
    pub error: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt: i32,
    pub user_ordinal: i32,
}

/// The envelope a worker receives off the queue (spec §3, "QueueMessage").
/// Carries everything the worker needs without re-reading the job store.
/// Idempotency key is the job id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: JobId,
    pub session_id: String,
    pub kind: Kind,
    pub prompt: String,
    pub user_ordinal: i32,
}

/// Remaining quota per kind, surfaced on `/login` and `/submit` responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Remaining {
    pub card: i64,
    pub video: i64,
    pub print: i64,
}

/// Builds the deterministic artifact key convention from spec §3:
/// `kind_plural/{session_id}_user_{ordinal:03}_override{level}_{seq}_{yyyymmdd_hhmmss}.{ext}`
pub fn artifact_key(
    kind: Kind,
    session_id: &str,
    user_ordinal: i32,
    override_level: i32,
    seq: i64,
    at: DateTime<Utc>,
) -> String {
    format!(
        "{plural}/{session_id}_user_{ordinal:03}_override{level}_{seq}_{stamp}.{ext}",
        plural = kind.plural(),
        session_id = session_id,
        ordinal = user_ordinal,
        level = override_level,
        seq = seq,
        stamp = at.format("%Y%m%d_%H%M%S"),
        ext = kind.extension(),
    )
}
