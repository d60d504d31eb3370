//! Bearer-token authentication middleware. Every endpoint except `/login`
//! and `/health` runs behind this: missing or malformed headers and invalid
//! tokens are rejected as `unauthenticated`, stale ones as `token_expired`,
//! distinctly (spec §7).

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::common::AppError;
use crate::server::app::AppState;

/// The session identity extracted from a verified bearer token. Handlers
/// that require auth should grab this out of the request extensions.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub session_id: String,
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthenticated)?;

    let claims = state.jwt.verify_token(token)?;

    request.extensions_mut().insert(AuthUser {
        session_id: claims.session_id,
    });

    Ok(next.run(request).await)
}
