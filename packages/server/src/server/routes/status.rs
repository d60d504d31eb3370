use axum::extract::{Path, State};
use axum::Json;

use crate::common::{AppError, JobId};
use crate::domains::jobs::StatusResponse;
use crate::server::app::AppState;

pub async fn status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = state.status.get_status(job_id).await?;
    Ok(Json(status))
}
