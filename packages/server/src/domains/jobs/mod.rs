//! Job orchestration: intake, queueing, quota enforcement, worker dispatch,
//! and the status/gallery read path.

pub mod backend;
pub mod blob;
pub mod intake;
pub mod models;
pub mod queue;
pub mod quota;
pub mod status;
pub mod store;
pub mod worker;

pub use backend::{BackendError, GenerationBackend, HttpGenerationBackend};
pub use blob::{BlobError, BlobStore, S3BlobStore};
pub use intake::{IntakeService, SubmitResponse};
pub use models::{ErrorInfo, Job, Kind, QueueMessage, Remaining, State};
pub use queue::{DeadLetter, PostgresWorkQueue, QueueError, ReceiptHandle, ReceivedMessage, WorkQueue};
pub use quota::{effective_budget, PostgresQuotaLedger, QuotaError, QuotaLedger};
pub use status::{ArtifactSummary, StatusResponse, StatusService};
pub use store::{JobStore, PostgresJobStore, StateUpdate, StoreError};
pub use worker::WorkerPool;
