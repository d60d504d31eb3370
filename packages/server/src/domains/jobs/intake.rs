//! C6: Intake Service. Validates a request, checks quota, persists a
//! `queued` record, publishes to the work queue, and returns a job id
//! immediately (spec §4.1).

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::common::{AppError, JobId};
use crate::config::Config;

use super::models::{ErrorInfo, Job, Kind, QueueMessage, Remaining, State};
use super::quota::{effective_budget, QuotaLedger};
use super::store::{JobStore, StateUpdate};
use super::queue::WorkQueue;

pub struct SubmitResponse {
    pub job_id: JobId,
    pub user_ordinal: i32,
    pub remaining: Remaining,
}

pub struct IntakeService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    quota: Arc<dyn QuotaLedger>,
    config: Arc<Config>,
}

impl IntakeService {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        quota: Arc<dyn QuotaLedger>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            queue,
            quota,
            config,
        }
    }

    pub async fn submit(
        &self,
        session_id: &str,
        kind: Kind,
        prompt: String,
    ) -> Result<SubmitResponse, AppError> {
        self.validate(kind, &prompt)?;

        let (counter, override_level) = self.quota.get(session_id, kind).await?;
        let base_limit = self.config.base_limit(kind);
        let budget = effective_budget(base_limit, override_level);

        if counter >= budget {
            warn!(session_id, kind = kind.as_str(), counter, budget, "quota exceeded at admission");
            return Err(AppError::QuotaExceeded {
                remaining: (budget - counter).max(0),
            });
        }

        let job_id = JobId::new();
        let user_ordinal = self.store.next_user_ordinal(session_id, kind).await?;

        let job = Job {
            job_id,
            session_id: session_id.to_string(),
            kind,
            state: State::Queued,
            prompt: prompt.clone(),
            artifact_key: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempt: 0,
            user_ordinal,
        };

        // The record must exist before any queue message references it.
        self.store.put(&job).await?;

        let message = QueueMessage {
            job_id,
            session_id: session_id.to_string(),
            kind,
            prompt,
            user_ordinal,
        };

        if let Err(e) = self.queue.publish(message).await {
            error!(%job_id, error = %e, "enqueue failed after job record was persisted");
            let _ = self
                .store
                .update_state(
                    job_id,
                    State::Failed,
                    StateUpdate {
                        error: Some(ErrorInfo {
                            kind: "enqueue_failed".to_string(),
                            message: e.to_string(),
                        }),
                        ..Default::default()
                    },
                )
                .await;
            return Err(AppError::EnqueueFailed(e.to_string()));
        }

        info!(%job_id, session_id, kind = kind.as_str(), user_ordinal, "job submitted");

        let mut remaining = self
            .quota
            .remaining(session_id, &self.config.quota_base)
            .await?;
        // This job hasn't completed yet, but it's reserved against the budget
        // for the purpose of the number shown back to the caller.
        match kind {
            Kind::Card => remaining.card = (remaining.card - 1).max(0),
            Kind::Video => remaining.video = (remaining.video - 1).max(0),
            Kind::Print => remaining.print = (remaining.print - 1).max(0),
        }

        Ok(SubmitResponse {
            job_id,
            user_ordinal,
            remaining,
        })
    }

    fn validate(&self, kind: Kind, prompt: &str) -> Result<(), AppError> {
        if !Kind::generatable().contains(&kind) {
            return Err(AppError::InvalidInput(format!(
                "kind {:?} is not submittable",
                kind
            )));
        }

        let bounds = self.config.prompt_bounds(kind);
        let len = prompt.chars().count();
        if len < bounds.min_len || len > bounds.max_len {
            return Err(AppError::InvalidInput(format!(
                "prompt length {len} outside [{}, {}] for {}",
                bounds.min_len,
                bounds.max_len,
                kind.as_str()
            )));
        }

        Ok(())
    }
}
