//! Access to the Kubernetes API for the two objects every instance owns: a
//! workload (Deployment) and an exposure (ClusterIP Service).
//!
//! The orchestrator and reclaimer only see the [`ClusterApi`] trait so that a
//! client can be injected. [`KubeCluster`] is the production implementation.

use crate::{
    error::Result,
    resources::{ResourceSpec, WorkloadStatus},
};
use async_trait::async_trait;
use std::collections::BTreeMap;

mod client;

pub use client::KubeCluster;

/// HTTP status and body returned by a create call
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Namespace instances are created in
    fn namespace(&self) -> &str;

    /// Make sure a usable client exists. Fails with `Error::ClientInit` when the
    /// credential or CA material is missing.
    async fn connect(&self) -> Result<()>;

    async fn create_workload(
        &self,
        name: &str,
        image: &str,
        port: i32,
        resources: &ResourceSpec,
        labels: &BTreeMap<String, String>,
    ) -> Result<ApiResponse>;

    async fn create_exposure(
        &self,
        name: &str,
        selector: &BTreeMap<String, String>,
        port: i32,
        target_port: i32,
        labels: &BTreeMap<String, String>,
    ) -> Result<ApiResponse>;

    /// A missing workload is reported with `exists = false`, not as an error
    async fn workload_status(&self, name: &str) -> Result<WorkloadStatus>;

    /// Deletes cascade to owned objects; a missing object counts as deleted
    async fn delete_workload(&self, name: &str) -> Result<()>;

    async fn delete_exposure(&self, name: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod fake;
