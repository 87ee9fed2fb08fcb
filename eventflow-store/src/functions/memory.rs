//! In-memory function record repository

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use eventflow_core::domain::function::{FunctionRecord, FunctionStatus};
use uuid::Uuid;

use super::{validate_replicas, FunctionStore, NewFunction};
use crate::error::StoreError;

/// Function record repository held entirely in memory.
pub struct InMemoryFunctionStore {
    functions: Mutex<HashMap<Uuid, FunctionRecord>>,
}

impl InMemoryFunctionStore {
    pub fn new() -> Self {
        Self {
            functions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryFunctionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(namespace: &str, name: &str) -> StoreError {
    StoreError::NotFound(format!("function {}/{}", namespace, name))
}

impl InMemoryFunctionStore {
    fn live_mut<'a>(
        functions: &'a mut HashMap<Uuid, FunctionRecord>,
        namespace: &str,
        name: &str,
    ) -> Option<&'a mut FunctionRecord> {
        functions.values_mut().find(|record| {
            record.namespace == namespace && record.name == name && record.deleted_at.is_none()
        })
    }
}

#[async_trait]
impl FunctionStore for InMemoryFunctionStore {
    async fn create(&self, new: NewFunction) -> Result<FunctionRecord, StoreError> {
        validate_replicas(new.replicas)?;

        let mut functions = self.functions.lock().unwrap();
        let duplicate = functions.values().any(|record| {
            record.tenant_id == new.tenant_id
                && record.namespace == new.namespace
                && record.name == new.name
                && record.deleted_at.is_none()
        });
        if duplicate {
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
        functions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<FunctionRecord, StoreError> {
        let functions = self.functions.lock().unwrap();
        functions
            .values()
            .find(|record| {
                record.tenant_id == tenant_id
                    && record.namespace == namespace
                    && record.name == name
                    && record.deleted_at.is_none()
            })
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn get_by_location(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<FunctionRecord, StoreError> {
        let functions = self.functions.lock().unwrap();
        functions
            .values()
            .find(|record| {
                record.namespace == namespace
                    && record.name == name
                    && record.deleted_at.is_none()
            })
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<FunctionRecord>, StoreError> {
        let functions = self.functions.lock().unwrap();
        let mut records: Vec<FunctionRecord> = functions
            .values()
            .filter(|record| record.tenant_id == tenant_id && record.deleted_at.is_none())
            .cloned()
            .collect();
        records.sort_by_key(|record| std::cmp::Reverse(record.created_at));
        Ok(records)
    }

    async fn list_all(&self) -> Result<Vec<FunctionRecord>, StoreError> {
        let functions = self.functions.lock().unwrap();
        let mut records: Vec<FunctionRecord> = functions
            .values()
            .filter(|record| record.deleted_at.is_none())
            .cloned()
            .collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    async fn update_replicas(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), StoreError> {
        validate_replicas(Some(replicas))?;

        let mut functions = self.functions.lock().unwrap();
        let record = Self::live_mut(&mut functions, namespace, name)
            .filter(|record| record.tenant_id == tenant_id)
            .ok_or_else(|| not_found(namespace, name))?;
        record.replicas = Some(replicas);
        record.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn update_image(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
        image: &str,
    ) -> Result<(), StoreError> {
        let mut functions = self.functions.lock().unwrap();
        let record = Self::live_mut(&mut functions, namespace, name)
            .filter(|record| record.tenant_id == tenant_id)
            .ok_or_else(|| not_found(namespace, name))?;
        record.image = image.to_string();
        record.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: FunctionStatus,
    ) -> Result<(), StoreError> {
        let mut functions = self.functions.lock().unwrap();
        let record = Self::live_mut(&mut functions, namespace, name)
            .ok_or_else(|| not_found(namespace, name))?;
        record.status = status;
        Ok(())
    }

    async fn soft_delete(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<FunctionRecord, StoreError> {
        let mut functions = self.functions.lock().unwrap();
        let record = Self::live_mut(&mut functions, namespace, name)
            .filter(|record| record.tenant_id == tenant_id)
            .ok_or_else(|| not_found(namespace, name))?;
        record.deleted_at = Some(chrono::Utc::now());
        record.updated_at = chrono::Utc::now();
        Ok(record.clone())
    }
}
