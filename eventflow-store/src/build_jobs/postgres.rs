//! Postgres-backed build job repository
//!
//! Handles all database operations related to build jobs. Concurrency
//! control is a conditional update on the status column: the claim and every
//! transition are single statements whose row count tells the caller whether
//! it won.

use std::sync::Arc;

use async_trait::async_trait;
use eventflow_bus::MessageBus;
use eventflow_core::domain::build::{BuildJob, BuildStatus, Runtime, SourceSpec};
use sqlx::PgPool;
use uuid::Uuid;

use super::{publish_build_created, BuildJobStore, NewBuildJob, StatusUpdate};
use crate::error::StoreError;

const JOB_COLUMNS: &str = r#"id, tenant_id, namespace, function_name, runtime, source, image_ref,
       status, image, error, logs, created_at, updated_at, started_at, completed_at"#;

/// Build job repository backed by Postgres.
#[derive(Clone)]
pub struct PostgresBuildJobStore {
    pool: PgPool,
    publisher: Option<Arc<dyn MessageBus>>,
}

impl PostgresBuildJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            publisher: None,
        }
    }

    pub fn with_publisher(pool: PgPool, publisher: Arc<dyn MessageBus>) -> Self {
        Self {
            pool,
            publisher: Some(publisher),
        }
    }
}

#[async_trait]
impl BuildJobStore for PostgresBuildJobStore {
    async fn create(&self, new: NewBuildJob) -> Result<BuildJob, StoreError> {
        let now = chrono::Utc::now();
        let job = BuildJob {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            namespace: new.namespace,
            function_name: new.function_name,
            runtime: new.runtime,
            source: new.source,
            image_ref: new.image_ref,
            status: BuildStatus::Pending,
            image: None,
            error: None,
            logs: String::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO build_jobs (id, tenant_id, namespace, function_name, runtime,
                                    source, image_ref, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id)
        .bind(&job.tenant_id)
        .bind(&job.namespace)
        .bind(&job.function_name)
        .bind(job.runtime.as_str())
        .bind(sqlx::types::Json(&job.source))
        .bind(&job.image_ref)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        if let Some(publisher) = &self.publisher {
            publish_build_created(publisher.as_ref(), &job).await;
        }

        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<BuildJob, StoreError> {
        let row = sqlx::query_as::<_, BuildJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM build_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BuildJob::from)
            .ok_or_else(|| StoreError::NotFound(format!("build job {}", id)))
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<BuildJob>, StoreError> {
        let rows = sqlx::query_as::<_, BuildJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM build_jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BuildJob::from).collect())
    }

    async fn list_by_function(
        &self,
        tenant_id: &str,
        namespace: &str,
        function_name: &str,
        limit: i64,
    ) -> Result<Vec<BuildJob>, StoreError> {
        let rows = sqlx::query_as::<_, BuildJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM build_jobs
            WHERE tenant_id = $1 AND namespace = $2 AND function_name = $3
            ORDER BY created_at DESC
            LIMIT $4
            "#
        ))
        .bind(tenant_id)
        .bind(namespace)
        .bind(function_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BuildJob::from).collect())
    }

    async fn claim(&self, id: Uuid, log_line: &str) -> Result<BuildJob, StoreError> {
        let row = sqlx::query_as::<_, BuildJobRow>(&format!(
            r#"
            UPDATE build_jobs
            SET status = 'building', started_at = NOW(), updated_at = NOW(),
                logs = logs || $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(log_line)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            // Zero rows: either the job is gone or another worker took it.
            None => {
                let current = self.get(id).await?;
                Err(StoreError::Conflict(format!(
                    "build job {} is {}, not pending",
                    id, current.status
                )))
            }
        }
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<BuildJob, StoreError> {
        update.validate()?;

        let allowed: Vec<String> = update
            .status
            .allowed_from()
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();

        let row = sqlx::query_as::<_, BuildJobRow>(&format!(
            r#"
            UPDATE build_jobs
            SET status = $2,
                image = COALESCE($3, image),
                error = COALESCE($4, error),
                logs = logs || $5,
                updated_at = NOW(),
                started_at = CASE WHEN $2 = 'building' THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $2 = ANY(ARRAY['success', 'failed'])
                               THEN NOW() ELSE completed_at END
            WHERE id = $1 AND status = ANY($6)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.status.as_str())
        .bind(&update.image)
        .bind(&update.error)
        .bind(update.log_delta.as_deref().unwrap_or(""))
        .bind(&allowed)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => {
                let current = self.get(id).await?;
                match update.status.validate_transition(current.status) {
                    Err(err) => Err(err.into()),
                    // The transition was legal against what we read back, so
                    // the conditional update lost a race.
                    Ok(()) => Err(StoreError::Conflict(format!(
                        "build job {} changed concurrently",
                        id
                    ))),
                }
            }
        }
    }

    async fn set_image_ref(&self, id: Uuid, image_ref: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE build_jobs SET image_ref = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(image_ref)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("build job {}", id)));
        }
        Ok(())
    }

    async fn append_logs(&self, id: Uuid, delta: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE build_jobs SET logs = logs || $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(delta)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("build job {}", id)));
        }
        Ok(())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct BuildJobRow {
    id: Uuid,
    tenant_id: String,
    namespace: String,
    function_name: String,
    runtime: String,
    source: sqlx::types::Json<SourceSpec>,
    image_ref: Option<String>,
    status: String,
    image: Option<String>,
    error: Option<String>,
    logs: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn string_to_status(s: &str) -> BuildStatus {
    match s {
        "pending" => BuildStatus::Pending,
        "queued" => BuildStatus::Queued,
        "building" => BuildStatus::Building,
        "pushing" => BuildStatus::Pushing,
        "success" => BuildStatus::Success,
        "failed" => BuildStatus::Failed,
        _ => BuildStatus::Pending,
    }
}

impl From<BuildJobRow> for BuildJob {
    fn from(row: BuildJobRow) -> Self {
        BuildJob {
            id: row.id,
            tenant_id: row.tenant_id,
            namespace: row.namespace,
            function_name: row.function_name,
            runtime: Runtime::parse(&row.runtime),
            source: row.source.0,
            image_ref: row.image_ref,
            status: string_to_status(&row.status),
            image: row.image,
            error: row.error,
            logs: row.logs,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}
