//! Application setup: wires the domain services to a Postgres pool and
//! assembles the Axum router.

use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, header::CONTENT_TYPE, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::common::auth::JwtService;
use crate::config::Config;
use crate::domains::auth::LoginService;
use crate::domains::jobs::{
    HttpGenerationBackend, IntakeService, PostgresJobStore, PostgresQuotaLedger,
    PostgresWorkQueue, S3BlobStore, StatusService, WorkerPool,
};
use crate::server::middleware::require_auth;
use crate::server::routes::{gallery_handler, health_handler, login_handler, status_handler, submit_handler};

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<IntakeService>,
    pub status: Arc<StatusService>,
    pub login: Arc<LoginService>,
    pub jwt: Arc<JwtService>,
}

/// Builds the router and spawns the worker pool as a background task.
/// Returns the router only; the worker pool runs for the lifetime of the
/// process once spawned and is not otherwise observable from here.
pub async fn build_app(pool: PgPool, config: Config) -> Router {
    let store = Arc::new(PostgresJobStore::new(pool.clone()));
    let queue = Arc::new(PostgresWorkQueue::new(
        pool.clone(),
        config.queue_visibility,
        config.queue_max_redeliveries,
    ));
    let quota = Arc::new(PostgresQuotaLedger::new(pool.clone()));
    let blob = Arc::new(S3BlobStore::from_config(config.artifact_bucket.clone(), config.artifact_region.clone()).await);
    let backend = Arc::new(HttpGenerationBackend::new(
        config.backend_base_url.clone(),
        config.backend_api_key.clone(),
    ));
    let jwt = Arc::new(JwtService::new(&config.jwt_secret, config.jwt_issuer.clone(), config.jwt_ttl));
    let config = Arc::new(config);

    let intake = Arc::new(IntakeService::new(
        store.clone(),
        queue.clone(),
        quota.clone(),
        config.clone(),
    ));
    let status = Arc::new(StatusService::new(
        store.clone(),
        blob.clone(),
        config.signed_url_ttl_short,
        config.signed_url_ttl_gallery,
        50,
    ));
    let login = Arc::new(LoginService::new(
        config.auth_credentials.clone(),
        jwt.clone(),
        quota.clone(),
        config.quota_base.clone(),
    ));

    let worker_pool = Arc::new(WorkerPool::new(
        store,
        queue,
        quota,
        blob,
        backend,
        config.backend_max_concurrency,
    ));
    tokio::spawn(worker_pool.run());

    let app_state = AppState {
        intake,
        status,
        login,
        jwt,
    };

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let authenticated = Router::new()
        .route("/submit", post(submit_handler))
        .route("/status/{job_id}", get(status_handler))
        .route("/gallery", get(gallery_handler))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_auth));

    Router::new()
        .route("/health", get(health_handler))
        .route("/login", post(login_handler))
        .merge(authenticated)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
