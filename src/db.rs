use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Builds the shared connection pool and runs pending migrations. Both
/// binaries call this at startup so schema drift can never separate the
/// API server from the worker.
pub async fn connect_and_migrate(database_url: &str) -> PgPool {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .expect("failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run database migrations");

    pool
}
