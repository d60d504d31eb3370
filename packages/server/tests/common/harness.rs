//! Test harness with testcontainers: a shared Postgres container, migrated
//! once, reused across all integration tests in this crate.

use anyhow::{Context, Result};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct SharedInfra {
    db_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedInfra> = OnceCell::const_new();

impl SharedInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .start()
            .await
            .context("failed to start postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("failed to connect to postgres for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        pool.close().await;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async { Self::init().await.expect("shared test infra init failed") })
            .await
    }
}

/// Per-test harness. Shares the container/migrations across the test binary
/// but gives each test its own connection pool.
pub struct TestHarness {
    pub db_pool: PgPool,
}

impl TestHarness {
    pub async fn new() -> Self {
        let infra = SharedInfra::get().await;
        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .expect("failed to connect to shared postgres container");
        Self { db_pool }
    }

    /// Unique session id per test so parallel tests never collide on quota
    /// counters or the gallery index.
    pub fn fresh_session_id() -> String {
        format!("sess-{}", uuid::Uuid::new_v4())
    }
}

#[async_trait::async_trait]
impl test_context::AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        TestHarness::new().await
    }
}
