use axum::extract::State;
use axum::{Extension, Json};
use serde::Serialize;

use crate::common::AppError;
use crate::domains::jobs::ArtifactSummary;
use crate::server::app::AppState;
use crate::server::middleware::AuthUser;

#[derive(Serialize)]
pub struct GalleryResponse {
    pub items: Vec<ArtifactSummary>,
}

pub async fn gallery_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<GalleryResponse>, AppError> {
    let items = state.status.load_gallery(&user.session_id).await?;
    Ok(Json(GalleryResponse { items }))
}
