use crate::model::ChallengeWorkloadConfig;
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Capabilities, Container, ContainerPort, PodSecurityContext, PodSpec, PodTemplateSpec,
            ResourceRequirements, SeccompProfile, SecurityContext,
        },
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::LabelSelector},
};
use serde::Serialize;
use std::collections::BTreeMap;

pub const CONTAINER_NAME: &str = "challenge";

/// Requests and limits passed through to the container unchanged
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceSpec {
    pub cpu_request: String,
    pub cpu_limit: String,
    pub mem_request: String,
    pub mem_limit: String,
}

impl From<&ChallengeWorkloadConfig> for ResourceSpec {
    fn from(config: &ChallengeWorkloadConfig) -> Self {
        Self {
            cpu_request: config.cpu_request.clone(),
            cpu_limit: config.cpu_limit.clone(),
            mem_request: config.mem_request.clone(),
            mem_limit: config.mem_limit.clone(),
        }
    }
}

/// Readiness of a workload as observed on the cluster
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub exists: bool,
    pub ready: bool,
    pub available_replicas: i32,
    pub ready_replicas: i32,
    pub conditions: BTreeMap<String, String>,
}

impl WorkloadStatus {
    pub fn missing() -> Self {
        Self::default()
    }
}

pub fn build_deployment(
    name: &str,
    namespace: &str,
    image: &str,
    port: i32,
    resources: &ResourceSpec,
    labels: &BTreeMap<String, String>,
) -> Deployment {
    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![ContainerPort {
            container_port: port,
            name: Some(CONTAINER_NAME.to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(build_resources(resources)),
        security_context: Some(build_security_context()),
        ..Default::default()
    };

    let pod_template = PodTemplateSpec {
        metadata: Some(kube::api::ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            automount_service_account_token: Some(false),
            host_network: Some(false),
            host_pid: Some(false),
            host_ipc: Some(false),
            enable_service_links: Some(false),
            dns_policy: Some("ClusterFirst".to_string()),
            restart_policy: Some("Always".to_string()),
            termination_grace_period_seconds: Some(10),
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(true),
                seccomp_profile: Some(runtime_default_seccomp()),
                ..Default::default()
            }),
            ..Default::default()
        }),
    };

    Deployment {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: pod_template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_resources(spec: &ResourceSpec) -> ResourceRequirements {
    let mut limits = BTreeMap::new();
    let mut requests = BTreeMap::new();

    limits.insert("cpu".to_string(), Quantity(spec.cpu_limit.clone()));
    requests.insert("cpu".to_string(), Quantity(spec.cpu_request.clone()));
    limits.insert("memory".to_string(), Quantity(spec.mem_limit.clone()));
    requests.insert("memory".to_string(), Quantity(spec.mem_request.clone()));

    ResourceRequirements {
        limits: Some(limits),
        requests: Some(requests),
        ..Default::default()
    }
}

fn runtime_default_seccomp() -> SeccompProfile {
    SeccompProfile {
        type_: "RuntimeDefault".to_string(),
        ..Default::default()
    }
}

fn build_security_context() -> SecurityContext {
    SecurityContext {
        run_as_non_root: Some(true),
        privileged: Some(false),
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            add: None,
            drop: Some(vec!["ALL".to_string()]),
        }),
        seccomp_profile: Some(runtime_default_seccomp()),
        ..Default::default()
    }
}

/// Interpret a fetched Deployment. Ready means at least one available replica
/// or an `Available` condition reported as true.
pub fn workload_status(deployment: &Deployment) -> WorkloadStatus {
    let Some(status) = deployment.status.as_ref() else {
        return WorkloadStatus {
            exists: true,
            ..Default::default()
        };
    };

    let available_replicas = status.available_replicas.unwrap_or(0);
    let ready_replicas = status.ready_replicas.unwrap_or(0);
    let conditions: BTreeMap<String, String> = status
        .conditions
        .iter()
        .flatten()
        .map(|c| (c.type_.clone(), c.status.clone()))
        .collect();
    let ready = available_replicas > 0
        || conditions.get("Available").map(String::as_str) == Some("True");

    WorkloadStatus {
        exists: true,
        ready,
        available_replicas,
        ready_replicas,
        conditions,
    }
}
