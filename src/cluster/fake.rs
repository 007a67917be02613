//! In-memory cluster used by the orchestrator and reclaimer tests

use super::{ApiResponse, ClusterApi};
use crate::{
    error::{Error, Result},
    resources::{ResourceSpec, WorkloadStatus},
};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateWorkload(String),
    CreateExposure(String),
    WorkloadStatus(String),
    DeleteWorkload(String),
    DeleteExposure(String),
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    workloads: BTreeSet<String>,
    exposures: BTreeSet<String>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    pub ready: Mutex<bool>,
    pub fail_create_exposure: Mutex<bool>,
    /// The workload lands but the call reports a missed deadline
    pub timeout_create_workload: Mutex<bool>,
    pub fail_deletes: Mutex<bool>,
    pub fail_status: Mutex<bool>,
    pub init_error: Mutex<bool>,
}

fn server_error(what: &str) -> Error {
    Error::ClusterApi {
        status: 500,
        message: format!("{what} failed"),
        payload: serde_json::json!({"reason": "InternalError"}),
    }
}

impl FakeCluster {
    pub fn ready() -> Self {
        let cluster = Self::default();
        *cluster.ready.lock().unwrap() = true;
        cluster
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    pub fn workloads(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().workloads.clone()
    }

    pub fn exposures(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().exposures.clone()
    }

    fn record(&self, call: Call) -> Result<()> {
        if *self.init_error.lock().unwrap() {
            return Err(Error::ClientInit("missing token".to_string()));
        }
        self.state.lock().unwrap().calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    fn namespace(&self) -> &str {
        "ctf-challenges"
    }

    async fn connect(&self) -> Result<()> {
        if *self.init_error.lock().unwrap() {
            return Err(Error::ClientInit("missing token".to_string()));
        }
        Ok(())
    }

    async fn create_workload(
        &self,
        name: &str,
        _image: &str,
        _port: i32,
        _resources: &ResourceSpec,
        _labels: &BTreeMap<String, String>,
    ) -> Result<ApiResponse> {
        self.record(Call::CreateWorkload(name.to_string()))?;
        let inserted = self.state.lock().unwrap().workloads.insert(name.to_string());
        if *self.timeout_create_workload.lock().unwrap() {
            return Err(Error::Timeout {
                operation: "create deployment",
                after: std::time::Duration::from_secs(5),
            });
        }
        Ok(ApiResponse {
            status: if inserted { 201 } else { 409 },
            payload: serde_json::json!({"metadata": {"name": name}}),
        })
    }

    async fn create_exposure(
        &self,
        name: &str,
        _selector: &BTreeMap<String, String>,
        _port: i32,
        _target_port: i32,
        _labels: &BTreeMap<String, String>,
    ) -> Result<ApiResponse> {
        self.record(Call::CreateExposure(name.to_string()))?;
        if *self.fail_create_exposure.lock().unwrap() {
            return Err(server_error("create service"));
        }
        let inserted = self.state.lock().unwrap().exposures.insert(name.to_string());
        Ok(ApiResponse {
            status: if inserted { 201 } else { 409 },
            payload: serde_json::json!({"metadata": {"name": name}}),
        })
    }

    async fn workload_status(&self, name: &str) -> Result<WorkloadStatus> {
        self.record(Call::WorkloadStatus(name.to_string()))?;
        if *self.fail_status.lock().unwrap() {
            return Err(server_error("get deployment"));
        }
        if !self.state.lock().unwrap().workloads.contains(name) {
            return Ok(WorkloadStatus::missing());
        }
        let ready = *self.ready.lock().unwrap();
        Ok(WorkloadStatus {
            exists: true,
            ready,
            available_replicas: i32::from(ready),
            ready_replicas: i32::from(ready),
            conditions: BTreeMap::new(),
        })
    }

    async fn delete_workload(&self, name: &str) -> Result<()> {
        self.record(Call::DeleteWorkload(name.to_string()))?;
        if *self.fail_deletes.lock().unwrap() {
            return Err(server_error("delete deployment"));
        }
        self.state.lock().unwrap().workloads.remove(name);
        Ok(())
    }

    async fn delete_exposure(&self, name: &str) -> Result<()> {
        self.record(Call::DeleteExposure(name.to_string()))?;
        if *self.fail_deletes.lock().unwrap() {
            return Err(server_error("delete service"));
        }
        self.state.lock().unwrap().exposures.remove(name);
        Ok(())
    }
}
