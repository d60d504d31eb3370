use thiserror::Error;

/// Bearer-token authentication errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token")]
    InvalidToken,

    #[error("invalid credentials")]
    InvalidCredentials,
}
