use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::common::{AppError, JobId};
use crate::domains::jobs::{Kind, Remaining};
use crate::server::app::AppState;
use crate::server::middleware::AuthUser;

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub kind: String,
    pub prompt: String,
}

#[derive(Serialize)]
pub struct SubmitResponseBody {
    pub job_id: JobId,
    pub user_ordinal: i32,
    pub remaining: Remaining,
}

pub async fn submit_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<SubmitResponseBody>, AppError> {
    let kind = Kind::from_str(&body.kind)
        .map_err(|_| AppError::InvalidInput(format!("unknown kind: {}", body.kind)))?;

    let result = state
        .intake
        .submit(&user.session_id, kind, body.prompt)
        .await?;

    Ok(Json(SubmitResponseBody {
        job_id: result.job_id,
        user_ordinal: result.user_ordinal,
        remaining: result.remaining,
    }))
}
