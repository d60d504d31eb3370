use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::domains::jobs::models::Kind;

/// Static username/password pairs accepted by `/login` (single-tenant auth).
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Inclusive prompt length bounds for a generation kind.
#[derive(Debug, Clone, Copy)]
pub struct PromptBounds {
    pub min_len: usize,
    pub max_len: usize,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,

    // Auth
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_ttl: Duration,
    pub auth_credentials: Vec<Credential>,

    // Generation backend
    pub backend_base_url: String,
    pub backend_api_key: String,
    pub backend_max_concurrency: usize,

    // Work queue
    pub queue_visibility: Duration,
    pub queue_max_redeliveries: i32,

    // Quota
    pub quota_base: HashMap<Kind, i64>,

    // Blob store / artifacts
    pub artifact_bucket: String,
    pub artifact_region: String,
    pub signed_url_ttl_short: Duration,
    pub signed_url_ttl_gallery: Duration,

    // Prompt validation
    pub prompt_bounds: HashMap<Kind, PromptBounds>,
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults spelled out in the spec's configuration table where the
    /// corresponding variable is unset.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development).
        let _ = dotenv();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("PORT must be a valid number")?;

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "job-pipeline".to_string());
        let jwt_ttl = Duration::from_secs(env_u64("JWT_TTL_SECONDS", 24 * 3600)?);

        let auth_credentials = parse_credentials(
            &env::var("AUTH_CREDENTIALS").unwrap_or_else(|_| "demo:demo".to_string()),
        )?;

        let backend_base_url = env::var("BACKEND_BASE_URL")
            .unwrap_or_else(|_| "https://generation-backend.invalid".to_string());
        let backend_api_key = env::var("BACKEND_API_KEY").unwrap_or_default();
        let backend_max_concurrency = env_u64("BACKEND_MAX_CONCURRENCY", 2)? as usize;

        let queue_visibility = Duration::from_secs(env_u64("QUEUE_VISIBILITY_SECONDS", 90)?);
        let queue_max_redeliveries = env_u64("QUEUE_MAX_REDELIVERIES", 3)? as i32;

        let mut quota_base = HashMap::new();
        quota_base.insert(Kind::Card, env_i64("QUOTA_BASE_CARD", 5)?);
        quota_base.insert(Kind::Video, env_i64("QUOTA_BASE_VIDEO", 3)?);
        quota_base.insert(Kind::Print, env_i64("QUOTA_BASE_PRINT", 1)?);

        let artifact_bucket =
            env::var("ARTIFACT_BUCKET").unwrap_or_else(|_| "job-pipeline-artifacts".to_string());
        let artifact_region = env::var("ARTIFACT_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let signed_url_ttl_short =
            Duration::from_secs(env_u64("ARTIFACT_SIGNED_URL_TTL_SHORT_SECONDS", 15 * 60)?);
        let signed_url_ttl_gallery =
            Duration::from_secs(env_u64("ARTIFACT_SIGNED_URL_TTL_GALLERY_SECONDS", 7 * 24 * 3600)?);

        let mut prompt_bounds = HashMap::new();
        prompt_bounds.insert(
            Kind::Card,
            PromptBounds {
                min_len: env_u64("PROMPT_CARD_MIN_LEN", 10)? as usize,
                max_len: env_u64("PROMPT_CARD_MAX_LEN", 1024)? as usize,
            },
        );
        prompt_bounds.insert(
            Kind::Video,
            PromptBounds {
                min_len: env_u64("PROMPT_VIDEO_MIN_LEN", 5)? as usize,
                max_len: env_u64("PROMPT_VIDEO_MAX_LEN", 512)? as usize,
            },
        );

        Ok(Self {
            database_url,
            port,
            jwt_secret,
            jwt_issuer,
            jwt_ttl,
            auth_credentials,
            backend_base_url,
            backend_api_key,
            backend_max_concurrency,
            queue_visibility,
            queue_max_redeliveries,
            quota_base,
            artifact_bucket,
            artifact_region,
            signed_url_ttl_short,
            signed_url_ttl_gallery,
            prompt_bounds,
        })
    }

    pub fn base_limit(&self, kind: Kind) -> i64 {
        self.quota_base.get(&kind).copied().unwrap_or(0)
    }

    pub fn prompt_bounds(&self, kind: Kind) -> PromptBounds {
        self.prompt_bounds
            .get(&kind)
            .copied()
            .unwrap_or(PromptBounds { min_len: 1, max_len: 4096 })
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} must be an integer")),
        Err(_) => Ok(default),
    }
}

fn parse_credentials(raw: &str) -> Result<Vec<Credential>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|pair| {
            let (user, pass) = pair
                .split_once(':')
                .with_context(|| format!("AUTH_CREDENTIALS entry '{pair}' must be user:pass"))?;
            Ok(Credential {
                username: user.trim().to_string(),
                password: pass.trim().to_string(),
            })
        })
        .collect()
}
