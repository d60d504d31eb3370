//! Static single-tenant credential check plus session/token issuance. The
//! credential set and the identity flow that produces it are out of scope;
//! this is the minimal stand-in needed to hand every other endpoint a
//! `session_id` to key quota and job records on.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::auth::JwtService;
use crate::common::AppError;
use crate::config::Credential;
use crate::domains::jobs::{Kind, QuotaLedger, Remaining};

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub session_id: String,
    pub remaining: Remaining,
}

pub struct LoginService {
    credentials: Vec<Credential>,
    jwt: Arc<JwtService>,
    quota: Arc<dyn QuotaLedger>,
    quota_base: HashMap<Kind, i64>,
}

impl LoginService {
    pub fn new(
        credentials: Vec<Credential>,
        jwt: Arc<JwtService>,
        quota: Arc<dyn QuotaLedger>,
        quota_base: HashMap<Kind, i64>,
    ) -> Self {
        Self {
            credentials,
            jwt,
            quota,
            quota_base,
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AppError> {
        let matched = self
            .credentials
            .iter()
            .any(|c| c.username == username && c.password == password);

        if !matched {
            return Err(AppError::Unauthenticated);
        }

        // There is no persistent account model, so the session id is derived
        // deterministically from the credential rather than minted fresh: the
        // same username must resolve to the same session across logins, or
        // its quota counter and gallery would never accumulate (GLOSSARY,
        // "Session" — the unit of quota and gallery isolation).
        let session_id = session_id_for_username(username);
        let (token, expires_in) = self.jwt.create_token(&session_id)?;
        let remaining = self.quota.remaining(&session_id, &self.quota_base).await?;

        Ok(LoginResponse {
            token,
            expires_in,
            session_id,
            remaining,
        })
    }
}

/// Deterministic session id for a username, namespaced so it can never
/// collide with an id derived from some other kind of identifier.
fn session_id_for_username(username: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"session:");
    hasher.update(username.as_bytes());
    format!("{:x}", hasher.finalize())
}
