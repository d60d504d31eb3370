//! C7: Worker Pool. Consumes from the queue under a strict in-process
//! concurrency ceiling, calls the generation backend, writes the artifact,
//! and transitions the job record to its terminal state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::backend::{BackendError, GenerationBackend};
use super::blob::BlobStore;
use super::models::{artifact_key, ErrorInfo, Kind, State};
use super::queue::{ReceivedMessage, WorkQueue};
use super::quota::QuotaLedger;
use super::store::{JobStore, StateUpdate};

pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    quota: Arc<dyn QuotaLedger>,
    blob: Arc<dyn BlobStore>,
    backend: Arc<dyn GenerationBackend>,
    http: reqwest::Client,
    concurrency: usize,
    poll_wait: Duration,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        quota: Arc<dyn QuotaLedger>,
        blob: Arc<dyn BlobStore>,
        backend: Arc<dyn GenerationBackend>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            queue,
            quota,
            blob,
            backend,
            http: reqwest::Client::new(),
            concurrency,
            poll_wait: Duration::from_secs(20),
        }
    }

    /// Runs until the process exits. Holds at most `concurrency` generation
    /// calls in flight, regardless of how fast the queue offers messages.
    pub async fn run(self: Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore closed, pool is shutting down
            };

            let received = match self.queue.receive(self.poll_wait).await {
                Ok(Some(received)) => received,
                Ok(None) => {
                    drop(permit);
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "queue receive failed");
                    drop(permit);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let pool = Arc::clone(&self);
            tokio::spawn(async move {
                pool.process(received).await;
                drop(permit);
            });
        }
    }

    async fn process(&self, received: ReceivedMessage) {
        let ReceivedMessage {
            message,
            receipt,
            delivery_count,
        } = received;
        let job_id = message.job_id;

        let current = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(%job_id, error = %e, "worker could not load claimed job");
                return;
            }
        };

        if current.state == State::Completed {
            // Redelivery after a success whose delete was lost, or whose
            // quota increment failed. Re-assert the increment (idempotent
            // per job_id) before deleting, so a prior failure isn't silently
            // stranded with the message acked anyway.
            if let Err(e) = self.quota.increment(job_id, &current.session_id, current.kind).await {
                error!(%job_id, error = %e, "failed to re-assert quota credit for already-completed job, leaving message for redelivery");
                return;
            }
            if let Err(e) = self.queue.delete(receipt).await {
                warn!(%job_id, error = %e, "failed to delete message for already-completed job");
            }
            return;
        }

        // A job redelivered mid-flight (previous worker crashed before
        // completing or failing it) steps back through `queued` before the
        // claim's own `queued -> processing` transition.
        if current.state == State::Processing {
            if let Err(e) = self
                .store
                .update_state(job_id, State::Queued, StateUpdate::default())
                .await
            {
                error!(%job_id, error = %e, "failed to revert stuck job to queued before reclaiming");
                return;
            }
        }

        let claimed = match self
            .store
            .update_state(
                job_id,
                State::Processing,
                StateUpdate {
                    started_at: Some(chrono::Utc::now()),
                    bump_attempt: true,
                    ..Default::default()
                },
            )
            .await
        {
            Ok(job) => job,
            Err(e) => {
                error!(%job_id, error = %e, "failed to mark job processing");
                return;
            }
        };

        info!(%job_id, kind = message.kind.as_str(), delivery_count, attempt = claimed.attempt, "processing job");

        match self.generate(message.kind, &message.prompt).await {
            Ok((bytes, content_type)) => self.complete(job_id, &message, bytes, &content_type, receipt).await,
            Err(e) if is_transient(&e) => {
                // Leave the message undeleted; the visibility timer will redeliver it.
                warn!(%job_id, error = %e, "transient generation failure, awaiting redelivery");
            }
            Err(e) => self.fail(job_id, &e, receipt).await,
        }
    }

    async fn generate(&self, kind: Kind, prompt: &str) -> Result<(Vec<u8>, &'static str), BackendError> {
        match kind {
            Kind::Card => {
                let bytes = self.backend.generate_image(prompt).await?;
                Ok((bytes, "image/png"))
            }
            Kind::Video => {
                // Video generation needs a seed frame; generate one from the
                // same prompt before handing it to the video call.
                let seed = self.backend.generate_image(prompt).await?;
                let url = self.backend.generate_video(prompt, &seed).await?;
                let bytes = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| BackendError::BackendUnavailable(e.to_string()))?
                    .bytes()
                    .await
                    .map_err(|e| BackendError::BackendUnavailable(e.to_string()))?
                    .to_vec();
                Ok((bytes, "video/mp4"))
            }
            Kind::Print => unreachable!("print jobs are never enqueued"),
        }
    }

    async fn complete(
        &self,
        job_id: crate::common::JobId,
        message: &super::models::QueueMessage,
        bytes: Vec<u8>,
        content_type: &str,
        receipt: super::queue::ReceiptHandle,
    ) {
        let (_, override_level) = match self.quota.get(&message.session_id, message.kind).await {
            Ok(v) => v,
            Err(e) => {
                error!(%job_id, error = %e, "failed to read override level before writing artifact");
                return;
            }
        };

        let key = artifact_key(
            message.kind,
            &message.session_id,
            message.user_ordinal,
            override_level,
            job_id.into_uuid().as_u128() as i64,
            chrono::Utc::now(),
        );

        // Order matters: the artifact must exist before the record points at
        // it; the counter must move before the message is deleted.
        if let Err(e) = self.blob.put(&key, bytes, content_type).await {
            error!(%job_id, error = %e, "failed to write artifact, leaving message for redelivery");
            return;
        }

        if let Err(e) = self
            .store
            .update_state(
                job_id,
                State::Completed,
                StateUpdate {
                    artifact_key: Some(key),
                    completed_at: Some(chrono::Utc::now()),
                    ..Default::default()
                },
            )
            .await
        {
            error!(%job_id, error = %e, "failed to mark job completed after artifact write");
            return;
        }

        // The counter must move before the message is deleted: if this fails,
        // leave the message for redelivery rather than ack it. Redelivery
        // hits the `already completed` branch above, which retries the same
        // idempotent increment.
        if let Err(e) = self.quota.increment(job_id, &message.session_id, message.kind).await {
            error!(%job_id, error = %e, "failed to increment quota counter after completion, leaving message for redelivery");
            return;
        }

        if let Err(e) = self.queue.delete(receipt).await {
            warn!(%job_id, error = %e, "completed job but failed to delete its queue message");
        }
    }

    async fn fail(
        &self,
        job_id: crate::common::JobId,
        error: &BackendError,
        receipt: super::queue::ReceiptHandle,
    ) {
        // `process` routes every transient error (Throttled, BackendUnavailable)
        // to the redelivery arm before `fail` is ever reached, so only a
        // permanent policy block ends up here.
        let kind = "policy_blocked";

        if let Err(e) = self
            .store
            .update_state(
                job_id,
                State::Failed,
                StateUpdate {
                    error: Some(ErrorInfo {
                        kind: kind.to_string(),
                        message: error.to_string(),
                    }),
                    completed_at: Some(chrono::Utc::now()),
                    ..Default::default()
                },
            )
            .await
        {
            error!(%job_id, error = %e, "failed to mark job failed");
            return;
        }

        if let Err(e) = self.queue.delete(receipt).await {
            warn!(%job_id, error = %e, "failed job but failed to delete its queue message");
        }
    }
}

/// Throttling and backend-unavailability are retried via redelivery; policy
/// blocks are permanent (the prompt will never succeed on retry).
fn is_transient(error: &BackendError) -> bool {
    matches!(error, BackendError::Throttled | BackendError::BackendUnavailable(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_and_unavailable_are_transient() {
        assert!(is_transient(&BackendError::Throttled));
        assert!(is_transient(&BackendError::BackendUnavailable("x".into())));
        assert!(!is_transient(&BackendError::PolicyBlocked("x".into())));
    }
}
