use super::{ApiResponse, ClusterApi};
use crate::{
    config::Settings,
    error::{Error, Result},
    resources::{self, ResourceSpec, WorkloadStatus},
};
use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{
    api::{Api, DeleteParams, PostParams},
    Client,
};
use secrecy::SecretString;
use std::{collections::BTreeMap, future::Future, path::Path, time::Duration};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Kubernetes client authenticated with a mounted service account token.
///
/// The underlying `kube::Client` is built on first use and cached. If the
/// token or CA material is missing, that call fails with `Error::ClientInit`
/// and the next call tries again.
pub struct KubeCluster {
    api_url: String,
    namespace: String,
    token_path: String,
    ca_path: String,
    allow_insecure_tls: bool,
    timeout: Duration,
    client: OnceCell<Client>,
}

impl KubeCluster {
    pub fn new(settings: &Settings) -> Self {
        Self {
            api_url: settings.api_url.clone(),
            namespace: settings.namespace.clone(),
            token_path: settings.token_path.clone(),
            ca_path: settings.ca_path.clone(),
            allow_insecure_tls: settings.allow_insecure_tls,
            timeout: settings.api_timeout(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async { self.build_client() })
            .await
    }

    fn build_client(&self) -> Result<Client> {
        let token = read_token(Path::new(&self.token_path))?;
        let cluster_url: axum::http::Uri = self
            .api_url
            .parse()
            .map_err(|e| Error::ClientInit(format!("invalid api_url {}: {}", self.api_url, e)))?;

        let mut config = kube::Config::new(cluster_url);
        config.default_namespace = self.namespace.clone();
        config.connect_timeout = Some(self.timeout);
        config.read_timeout = Some(self.timeout);
        config.write_timeout = Some(self.timeout);
        config.auth_info.token = Some(SecretString::from(token));

        match read_ca_bundle(Path::new(&self.ca_path))? {
            Some(certs) => config.root_cert = Some(certs),
            None if self.allow_insecure_tls => {
                warn!(
                    "No CA bundle at {}, TLS certificate verification is DISABLED",
                    self.ca_path
                );
                config.accept_invalid_certs = true;
            }
            None => {
                return Err(Error::ClientInit(format!(
                    "missing CA bundle {} (set allow_insecure_tls to skip verification)",
                    self.ca_path
                )))
            }
        }

        let client = Client::try_from(config).map_err(|e| Error::ClientInit(e.to_string()))?;
        info!("Kubernetes client initialized for {}", self.api_url);
        Ok(client)
    }

    async fn deployments(&self) -> Result<Api<Deployment>> {
        Ok(Api::namespaced(self.client().await?.clone(), &self.namespace))
    }

    async fn services(&self) -> Result<Api<Service>> {
        Ok(Api::namespaced(self.client().await?.clone(), &self.namespace))
    }

    /// Bound a single API call by the configured deadline
    async fn deadline<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = kube::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }
}

/// Created objects answer 201; an existing object under the same
/// deterministic name answers 409 and is accepted as the same object.
fn created<K: serde::Serialize>(kind: &str, name: &str, result: Result<K>) -> Result<ApiResponse> {
    match result {
        Ok(object) => {
            info!("Created {} {}", kind, name);
            Ok(ApiResponse {
                status: 201,
                payload: serde_json::to_value(&object)?,
            })
        }
        Err(Error::ClusterApi {
            status: 409,
            payload,
            ..
        }) => {
            info!("{} {} already exists", kind, name);
            Ok(ApiResponse {
                status: 409,
                payload,
            })
        }
        Err(e) => Err(e),
    }
}

fn deleted(kind: &str, name: &str, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            info!("Deleted {} {}", kind, name);
            Ok(())
        }
        Err(Error::ClusterApi { status: 404, .. }) => {
            debug!("{} {} already deleted", kind, name);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn connect(&self) -> Result<()> {
        self.client().await.map(|_| ())
    }

    async fn create_workload(
        &self,
        name: &str,
        image: &str,
        port: i32,
        resources: &ResourceSpec,
        labels: &BTreeMap<String, String>,
    ) -> Result<ApiResponse> {
        let api = self.deployments().await?;
        let deployment =
            resources::deployment::build_deployment(name, &self.namespace, image, port, resources, labels);
        let result = self
            .deadline("create deployment", api.create(&PostParams::default(), &deployment))
            .await;
        created("Deployment", name, result)
    }

    async fn create_exposure(
        &self,
        name: &str,
        selector: &BTreeMap<String, String>,
        port: i32,
        target_port: i32,
        labels: &BTreeMap<String, String>,
    ) -> Result<ApiResponse> {
        let api = self.services().await?;
        let service =
            resources::service::build_service(name, &self.namespace, selector, port, target_port, labels);
        let result = self
            .deadline("create service", api.create(&PostParams::default(), &service))
            .await;
        created("Service", name, result)
    }

    async fn workload_status(&self, name: &str) -> Result<WorkloadStatus> {
        let api = self.deployments().await?;
        match self.deadline("get deployment", api.get(name)).await {
            Ok(deployment) => Ok(resources::deployment::workload_status(&deployment)),
            Err(Error::ClusterApi { status: 404, .. }) => Ok(WorkloadStatus::missing()),
            Err(e) => Err(e),
        }
    }

    async fn delete_workload(&self, name: &str) -> Result<()> {
        let api = self.deployments().await?;
        let result = self
            .deadline("delete deployment", api.delete(name, &DeleteParams::background()))
            .await
            .map(|_| ());
        deleted("Deployment", name, result)
    }

    async fn delete_exposure(&self, name: &str) -> Result<()> {
        let api = self.services().await?;
        let result = self
            .deadline("delete service", api.delete(name, &DeleteParams::background()))
            .await
            .map(|_| ());
        deleted("Service", name, result)
    }
}

fn read_token(path: &Path) -> Result<String> {
    let token = std::fs::read_to_string(path)
        .map_err(|e| Error::ClientInit(format!("missing token {}: {}", path.display(), e)))?;
    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(Error::ClientInit(format!("empty token {}", path.display())));
    }
    Ok(token)
}

/// DER certificates from a PEM bundle, `None` when no bundle is mounted
fn read_ca_bundle(path: &Path) -> Result<Option<Vec<Vec<u8>>>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read(path)
        .map_err(|e| Error::ClientInit(format!("unreadable CA bundle {}: {}", path.display(), e)))?;
    let certs: Vec<Vec<u8>> = pem::parse_many(&raw)
        .map_err(|e| Error::ClientInit(format!("invalid CA bundle {}: {}", path.display(), e)))?
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .map(|p| p.into_contents())
        .collect();
    if certs.is_empty() {
        return Err(Error::ClientInit(format!(
            "no certificates in CA bundle {}",
            path.display()
        )));
    }
    Ok(Some(certs))
}
