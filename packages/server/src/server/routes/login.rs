use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::common::AppError;
use crate::domains::auth::LoginResponse;
use crate::server::app::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = state.login.login(&body.username, &body.password).await?;
    Ok(Json(response))
}
