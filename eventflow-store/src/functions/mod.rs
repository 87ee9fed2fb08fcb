//! Function record repository
//!
//! Desired-state records for deployable workloads. Identity is
//! `(tenant_id, namespace, name)`, unique among live records; deletion is a
//! soft delete that hides the record from every read here. The reconciler
//! looks records up by location and writes only the status.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryFunctionStore;
pub use postgres::PostgresFunctionStore;

use std::collections::HashMap;

use async_trait::async_trait;
use eventflow_core::domain::function::{
    FunctionRecord, FunctionStatus, ResourceRequirements, MAX_REPLICAS, MIN_REPLICAS,
};

use crate::error::StoreError;

/// Request to register a function.
#[derive(Debug, Clone)]
pub struct NewFunction {
    pub tenant_id: String,
    pub namespace: String,
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub env: HashMap<String, String>,
    pub replicas: Option<i32>,
    pub resources: Option<ResourceRequirements>,
}

/// Replica bounds are a collaborator-side contract: out-of-range values are
/// rejected here, before a record can ever reach the reconciler.
pub(crate) fn validate_replicas(replicas: Option<i32>) -> Result<(), StoreError> {
    if let Some(replicas) = replicas {
        if !(MIN_REPLICAS..=MAX_REPLICAS).contains(&replicas) {
            return Err(StoreError::InvalidArgument(format!(
                "replicas must be within [{}, {}], got {}",
                MIN_REPLICAS, MAX_REPLICAS, replicas
            )));
        }
    }
    Ok(())
}

/// Durable function record repository.
#[async_trait]
pub trait FunctionStore: Send + Sync {
    /// Persists a new function record. Rejects out-of-range replicas and
    /// duplicate live identities.
    async fn create(&self, new: NewFunction) -> Result<FunctionRecord, StoreError>;

    /// Tenant-scoped lookup; soft-deleted records are absent.
    async fn get(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<FunctionRecord, StoreError>;

    /// Location lookup for the reconciler; soft-deleted records are absent.
    async fn get_by_location(&self, namespace: &str, name: &str)
        -> Result<FunctionRecord, StoreError>;

    /// Live records for a tenant, newest first.
    async fn list(&self, tenant_id: &str) -> Result<Vec<FunctionRecord>, StoreError>;

    /// All live records; the reconciler's resync path.
    async fn list_all(&self) -> Result<Vec<FunctionRecord>, StoreError>;

    /// Updates the desired replica count.
    async fn update_replicas(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), StoreError>;

    /// Updates the desired image (e.g. after a successful build).
    async fn update_image(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
        image: &str,
    ) -> Result<(), StoreError>;

    /// Writes the status subresource. Never touches the spec.
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: FunctionStatus,
    ) -> Result<(), StoreError>;

    /// Soft delete. Returns the deleted record so the caller can hand its id
    /// to the orchestrator's owner-reference garbage collection.
    async fn soft_delete(
        &self,
        tenant_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<FunctionRecord, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_bounds() {
        assert!(validate_replicas(None).is_ok());
        assert!(validate_replicas(Some(1)).is_ok());
        assert!(validate_replicas(Some(10)).is_ok());
        assert!(validate_replicas(Some(0)).is_err());
        assert!(validate_replicas(Some(11)).is_err());
        assert!(validate_replicas(Some(-1)).is_err());
    }
}
