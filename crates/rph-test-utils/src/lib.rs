//! Throwaway PostgreSQL databases and shared fixtures for rph tests.
//!
//! One server is shared by every test in a binary; each test gets its own
//! freshly migrated database on it.
//!
//! - **`RPH_TEST_PG_URL`** set: use that server directly (CI service
//!   container, local postgres). The URL must not include a database name.
//! - **No env var**: start a `postgres:17` container through
//!   testcontainers on first use.

pub mod fixtures;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use rph_db::pool;

pub const PG_URL_VAR: &str = "RPH_TEST_PG_URL";

/// The server all test databases live on.
struct TestServer {
    base_url: String,
    /// Dropping the container stops it; `None` for an external server.
    _container: Option<ContainerAsync<Postgres>>,
}

impl TestServer {
    async fn start() -> Self {
        if let Ok(url) = std::env::var(PG_URL_VAR) {
            return Self {
                base_url: url.trim_end_matches('/').to_string(),
                _container: None,
            };
        }

        let container = Postgres::default()
            .with_tag("17")
            .start()
            .await
            .expect("failed to start PostgreSQL container");
        let host = container.get_host().await.expect("container host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("container port 5432");

        Self {
            base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
            _container: Some(container),
        }
    }

    fn url(&self, database: &str) -> String {
        format!("{}/{database}", self.base_url)
    }
}

static SERVER: OnceCell<TestServer> = OnceCell::const_new();

async fn server() -> &'static TestServer {
    SERVER.get_or_init(TestServer::start).await
}

async fn connect(url: &str, max_connections: u32) -> PgPool {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to {url}: {e}"))
}

/// Base URL (no database name) of the shared test server.
pub async fn pg_url() -> &'static str {
    &server().await.base_url
}

/// Create a migrated `rph_test_<uuid>` database.
///
/// Returns `(pool, db_name)`; pass `db_name` to [`drop_test_db`] when done.
pub async fn create_test_db() -> (PgPool, String) {
    let server = server().await;
    let db_name = format!("rph_test_{}", Uuid::new_v4().simple());

    let admin = connect(&server.url("postgres"), 1).await;
    admin
        .execute(format!("CREATE DATABASE {db_name}").as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create {db_name}: {e}"));
    admin.close().await;

    let pool = connect(&server.url(&db_name), 5).await;
    pool::run_migrations(&pool)
        .await
        .expect("rph migrations apply to an empty database");
    (pool, db_name)
}

/// Drop a test database, disconnecting anything still attached to it.
pub async fn drop_test_db(db_name: &str) {
    let admin = connect(&server().await.url("postgres"), 1).await;
    let _ = admin
        .execute(format!("DROP DATABASE IF EXISTS {db_name} WITH (FORCE)").as_str())
        .await;
    admin.close().await;
}
