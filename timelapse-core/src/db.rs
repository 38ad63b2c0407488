use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Create the capture table and its query indexes if missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS captured_exchanges (
            seq          BIGSERIAL,
            id           UUID PRIMARY KEY,
            endpoint_key TEXT NOT NULL,
            started_at   BIGINT NOT NULL,
            payload      JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS captured_exchanges_endpoint_key_idx ON captured_exchanges (endpoint_key)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS captured_exchanges_started_at_idx ON captured_exchanges (started_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
