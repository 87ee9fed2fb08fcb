//! Postgres-backed function record repository

use std::collections::HashMap;

use async_trait::async_trait;
use eventflow_core::domain::function::{FunctionRecord, FunctionStatus, ResourceRequirements};
use sqlx::PgPool;
use uuid::Uuid;

use super::{validate_replicas, FunctionStore, NewFunction};
use crate::error::StoreError;

const FUNCTION_COLUMNS: &str = r#"id, tenant_id, namespace, name, image, command, args, env,
       replicas, resources, status, created_at, updated_at, deleted_at"#;

/// Function record repository backed by Postgres.
#[derive(Clone)]
pub struct PostgresFunctionStore {
    pool: PgPool,
}

impl PostgresFunctionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FunctionStore for PostgresFunctionStore {
    async fn create(&self, new: NewFunction) -> Result<FunctionRecord, StoreError> {
        validate_replicas(new.replicas)?;

        let existing = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM functions
            WHERE tenant_id = $1 AND namespace = $2 AND name = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(&new.tenant_id)
        .bind(&new.namespace)
        .bind(&new.name)
        .fetch_one(&self.pool)
        .await?;

        if existing > 0 {
            return Err(StoreError::Conflict(format!(
                "function {}/{} already exists",
                new.namespace, new.name
            )));
        }

        let now = chrono::Utc::now();
        let record = FunctionRecord {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            namespace: new.namespace,
            name: new.name,
            image: new.image,
            command: new.command,
            args: new.args,
            env: new.env,
            replicas: new.replicas,
            resources: new.resources,
            status: FunctionStatus::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO functions (id, tenant_id, namespace, name, image, command, args,
                                   env, replicas, resources, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id)
        .bind(&record.tenant_id)
        .bind(&record.namespace)
        .bind(&record.name)
        .bind(&record.image)
        .bind(&record.command)
        .bind(&record.args)
        .bind(sqlx::types::Json(&record.env))
        .bind(record.replicas)
        .bind(record.resources.as_ref().map(sqlx::types::Json))
        .bind(sqlx::types::Json(&record.status))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<FunctionRecord, StoreError> {
        let row = sqlx::query_as::<_, FunctionRow>(&format!(
            r#"
            SELECT {FUNCTION_COLUMNS}
            FROM functions
            WHERE tenant_id = $1 AND namespace = $2 AND name = $3 AND deleted_at IS NULL
            "#
        ))
        .bind(tenant_id)
        .bind(namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FunctionRecord::from)
            .ok_or_else(|| StoreError::NotFound(format!("function {}/{}", namespace, name)))
    }

    async fn get_by_location(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<FunctionRecord, StoreError> {
        let row = sqlx::query_as::<_, FunctionRow>(&format!(
            r#"
            SELECT {FUNCTION_COLUMNS}
            FROM functions
            WHERE namespace = $1 AND name = $2 AND deleted_at IS NULL
            "#
        ))
        .bind(namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FunctionRecord::from)
            .ok_or_else(|| StoreError::NotFound(format!("function {}/{}", namespace, name)))
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<FunctionRecord>, StoreError> {
        let rows = sqlx::query_as::<_, FunctionRow>(&format!(
            r#"
            SELECT {FUNCTION_COLUMNS}
            FROM functions
            WHERE tenant_id = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC
            "#
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FunctionRecord::from).collect())
    }

    async fn list_all(&self) -> Result<Vec<FunctionRecord>, StoreError> {
        let rows = sqlx::query_as::<_, FunctionRow>(&format!(
            r#"
            SELECT {FUNCTION_COLUMNS}
            FROM functions
            WHERE deleted_at IS NULL
            ORDER BY created_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FunctionRecord::from).collect())
    }

    async fn update_replicas(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), StoreError> {
        validate_replicas(Some(replicas))?;

        let result = sqlx::query(
            r#"
            UPDATE functions
            SET replicas = $4, updated_at = NOW()
            WHERE tenant_id = $1 AND namespace = $2 AND name = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(namespace)
        .bind(name)
        .bind(replicas)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "function {}/{}",
                namespace, name
            )));
        }
        Ok(())
    }

    async fn update_image(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
        image: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE functions
            SET image = $4, updated_at = NOW()
            WHERE tenant_id = $1 AND namespace = $2 AND name = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(namespace)
        .bind(name)
        .bind(image)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "function {}/{}",
                namespace, name
            )));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: FunctionStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE functions
            SET status = $3
            WHERE namespace = $1 AND name = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(namespace)
        .bind(name)
        .bind(sqlx::types::Json(&status))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "function {}/{}",
                namespace, name
            )));
        }
        Ok(())
    }

    async fn soft_delete(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<FunctionRecord, StoreError> {
        let row = sqlx::query_as::<_, FunctionRow>(&format!(
            r#"
            UPDATE functions
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE tenant_id = $1 AND namespace = $2 AND name = $3 AND deleted_at IS NULL
            RETURNING {FUNCTION_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FunctionRecord::from)
            .ok_or_else(|| StoreError::NotFound(format!("function {}/{}", namespace, name)))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct FunctionRow {
    id: Uuid,
    tenant_id: String,
    namespace: String,
    name: String,
    image: String,
    command: Option<Vec<String>>,
    args: Option<Vec<String>>,
    env: sqlx::types::Json<HashMap<String, String>>,
    replicas: Option<i32>,
    resources: Option<sqlx::types::Json<ResourceRequirements>>,
    status: sqlx::types::Json<FunctionStatus>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<FunctionRow> for FunctionRecord {
    fn from(row: FunctionRow) -> Self {
        FunctionRecord {
            id: row.id,
            tenant_id: row.tenant_id,
            namespace: row.namespace,
            name: row.name,
            image: row.image,
            command: row.command,
            args: row.args,
            env: row.env.0,
            replicas: row.replicas,
            resources: row.resources.map(|json| json.0),
            status: row.status.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}
