use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create build_jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_jobs (
            id UUID PRIMARY KEY,
            tenant_id VARCHAR(255) NOT NULL,
            namespace VARCHAR(255) NOT NULL,
            function_name VARCHAR(255) NOT NULL,
            runtime VARCHAR(50) NOT NULL,
            source JSONB NOT NULL,
            image_ref TEXT,
            status VARCHAR(50) NOT NULL,
            image TEXT,
            error TEXT,
            logs TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create functions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS functions (
            id UUID PRIMARY KEY,
            tenant_id VARCHAR(255) NOT NULL,
            namespace VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            image TEXT NOT NULL,
            command TEXT[],
            args TEXT[],
            env JSONB NOT NULL DEFAULT '{}',
            replicas INTEGER,
            resources JSONB,
            status JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            deleted_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_build_jobs_status ON build_jobs(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_build_jobs_created_at ON build_jobs(created_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_build_jobs_function ON build_jobs(tenant_id, namespace, function_name)",
    )
    .execute(pool)
    .await?;

    // Identity is unique only among live records
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_functions_identity ON functions(tenant_id, namespace, name) WHERE deleted_at IS NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_functions_location ON functions(namespace, name)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
