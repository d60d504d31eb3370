//! C8: Status & Gallery Service. Read-only views over the job store and
//! blob store. Never inlines artifact bytes — only ever mints signed URLs.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{AppError, JobId};

use super::blob::BlobStore;
use super::models::{Job, Kind, State};
use super::store::JobStore;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusResponse {
    pub job_id: JobId,
    pub state: State,
    pub user_ordinal: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub job_id: JobId,
    pub kind: Kind,
    pub prompt: String,
    pub user_ordinal: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub url: String,
}

pub struct StatusService {
    store: Arc<dyn JobStore>,
    blob: Arc<dyn BlobStore>,
    signed_url_ttl_short: Duration,
    signed_url_ttl_gallery: Duration,
    gallery_limit: i64,
}

impl StatusService {
    pub fn new(
        store: Arc<dyn JobStore>,
        blob: Arc<dyn BlobStore>,
        signed_url_ttl_short: Duration,
        signed_url_ttl_gallery: Duration,
        gallery_limit: i64,
    ) -> Self {
        Self {
            store,
            blob,
            signed_url_ttl_short,
            signed_url_ttl_gallery,
            gallery_limit,
        }
    }

    pub async fn get_status(&self, job_id: JobId) -> Result<StatusResponse, AppError> {
        let job = self.store.get(job_id).await?;
        self.to_status_response(job).await
    }

    pub async fn load_gallery(&self, session_id: &str) -> Result<Vec<ArtifactSummary>, AppError> {
        let jobs = self
            .store
            .list_by_session(session_id, None, self.gallery_limit)
            .await?;

        let mut summaries = Vec::with_capacity(jobs.len());
        for job in jobs {
            let Some(key) = &job.artifact_key else {
                continue; // list_by_session only returns completed jobs, but be defensive
            };
            let url = self
                .blob
                .signed_url(key, self.signed_url_ttl_gallery)
                .await?;
            summaries.push(ArtifactSummary {
                job_id: job.job_id,
                kind: job.kind,
                prompt: job.prompt,
                user_ordinal: job.user_ordinal,
                created_at: job.created_at,
                url,
            });
        }

        Ok(summaries)
    }

    async fn to_status_response(&self, job: Job) -> Result<StatusResponse, AppError> {
        let mut response = StatusResponse {
            job_id: job.job_id,
            state: job.state,
            user_ordinal: job.user_ordinal,
            created_at: job.created_at,
            artifact_url: None,
            error_kind: None,
            error_message: None,
        };

        match job.state {
            State::Completed => {
                let key = job.artifact_key.as_deref().ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!(
                        "job {} is completed with no artifact_key",
                        job.job_id
                    ))
                })?;
                response.artifact_url = Some(
                    self.blob
                        .signed_url(key, self.signed_url_ttl_short)
                        .await?,
                );
            }
            State::Failed => {
                if let Some(error) = job.error {
                    response.error_kind = Some(error.kind);
                    response.error_message = Some(error.message);
                }
            }
            State::Queued | State::Processing => {}
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::jobs::blob::fake::InMemoryBlobStore;
    use crate::domains::jobs::models::ErrorInfo;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct FakeStore {
        jobs: Mutex<Vec<Job>>,
    }

    #[async_trait]
    impl JobStore for FakeStore {
        async fn put(&self, job: &Job) -> Result<(), super::super::store::StoreError> {
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }

        async fn get(&self, job_id: JobId) -> Result<Job, super::super::store::StoreError> {
            self.jobs
                .lock()
                .unwrap()
                .iter()
                .find(|j| j.job_id == job_id)
                .cloned()
                .ok_or(super::super::store::StoreError::NotFound)
        }

        async fn update_state(
            &self,
            _job_id: JobId,
            _next: State,
            _fields: super::super::store::StateUpdate,
        ) -> Result<Job, super::super::store::StoreError> {
            unimplemented!("not exercised by status service tests")
        }

        async fn next_user_ordinal(
            &self,
            _session_id: &str,
            _kind: Kind,
        ) -> Result<i32, super::super::store::StoreError> {
            unimplemented!()
        }

        async fn list_by_session(
            &self,
            session_id: &str,
            _kind: Option<Kind>,
            _limit: i64,
        ) -> Result<Vec<Job>, super::super::store::StoreError> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|j| j.session_id == session_id && j.state == State::Completed)
                .cloned()
                .collect())
        }

        async fn reconcile_stuck_jobs(
            &self,
            _older_than: chrono::DateTime<Utc>,
        ) -> Result<Vec<JobId>, super::super::store::StoreError> {
            unimplemented!()
        }
    }

    fn queued_job(session_id: &str) -> Job {
        Job {
            job_id: JobId::new(),
            session_id: session_id.to_string(),
            kind: Kind::Card,
            state: State::Queued,
            prompt: "a prompt".to_string(),
            artifact_key: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempt: 0,
            user_ordinal: 1,
        }
    }

    #[tokio::test]
    async fn queued_job_reports_state_only() {
        let job = queued_job("sess-1");
        let job_id = job.job_id;
        let store = Arc::new(FakeStore {
            jobs: Mutex::new(vec![job]),
        });
        let blob = Arc::new(InMemoryBlobStore::new());
        let service = StatusService::new(
            store,
            blob,
            Duration::from_secs(900),
            Duration::from_secs(604800),
            50,
        );

        let status = service.get_status(job_id).await.unwrap();
        assert_eq!(status.state, State::Queued);
        assert!(status.artifact_url.is_none());
    }

    #[tokio::test]
    async fn completed_job_mints_a_signed_url() {
        let mut job = queued_job("sess-1");
        job.state = State::Completed;
        job.artifact_key = Some("cards/sess-1_user_001_override0_1_20260101_000000.png".to_string());
        job.completed_at = Some(Utc::now());
        let job_id = job.job_id;

        let store = Arc::new(FakeStore {
            jobs: Mutex::new(vec![job]),
        });
        let blob = Arc::new(InMemoryBlobStore::new());
        let service = StatusService::new(
            store,
            blob,
            Duration::from_secs(900),
            Duration::from_secs(604800),
            50,
        );

        let status = service.get_status(job_id).await.unwrap();
        assert!(status.artifact_url.unwrap().contains("cards/sess-1"));
    }

    #[tokio::test]
    async fn failed_job_reports_error() {
        let mut job = queued_job("sess-1");
        job.state = State::Failed;
        job.error = Some(ErrorInfo {
            kind: "policy_blocked".to_string(),
            message: "nope".to_string(),
        });
        let job_id = job.job_id;

        let store = Arc::new(FakeStore {
            jobs: Mutex::new(vec![job]),
        });
        let blob = Arc::new(InMemoryBlobStore::new());
        let service = StatusService::new(
            store,
            blob,
            Duration::from_secs(900),
            Duration::from_secs(604800),
            50,
        );

        let status = service.get_status(job_id).await.unwrap();
        assert_eq!(status.error_kind.as_deref(), Some("policy_blocked"));
    }
}
