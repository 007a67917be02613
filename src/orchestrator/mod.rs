use crate::{
    cluster::ClusterApi,
    config::Settings,
    error::{Error, Result},
    model::{Instance, Status},
    registry::Registry,
    telemetry::Metrics,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub mod spawn;
pub mod stop;

pub use stop::teardown;

/// Drives the instance lifecycle for user requests.
///
/// Every operation reads the latest persisted instance of the (challenge,
/// user) pair, so state survives restarts and is shared with the reclaimer.
#[derive(Clone)]
pub struct Orchestrator {
    pub registry: Registry,
    pub cluster: Arc<dyn ClusterApi>,
    pub settings: Arc<Settings>,
    pub metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        registry: Registry,
        cluster: Arc<dyn ClusterApi>,
        settings: Arc<Settings>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            cluster,
            settings,
            metrics,
        }
    }

    /// Return the active instance or create one
    pub async fn spawn(&self, challenge_id: i64, user_id: i64) -> Result<Instance> {
        self.spawn_at(challenge_id, user_id, Utc::now()).await
    }

    /// Tear down the active instance
    pub async fn stop(&self, challenge_id: i64, user_id: i64) -> Result<Instance> {
        self.stop_at(challenge_id, user_id, Utc::now()).await
    }

    /// Latest instance in any status, refreshed from the cluster while non-terminal
    pub async fn status(&self, challenge_id: i64, user_id: i64) -> Result<Instance> {
        self.status_at(challenge_id, user_id, Utc::now()).await
    }

    #[instrument(skip(self, now))]
    pub(crate) async fn status_at(
        &self,
        challenge_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Instance> {
        let mut instance = self
            .latest_instance(challenge_id, user_id, now)
            .await?
            .ok_or_else(|| Error::NotFound("No instance".to_string()))?;

        // terminal instances own nothing on the cluster anymore
        if instance.status.is_terminal() {
            return Ok(instance);
        }

        let from = instance.status;
        match self.cluster.workload_status(&instance.workload_name).await {
            Ok(workload) => {
                let next = if workload.ready {
                    Status::Ready
                } else {
                    Status::Pending
                };
                if next == from {
                    return Ok(instance);
                }
                info!("Instance {} moved from {} to {}", instance.id, from, next);
                instance.status = next;
            }
            Err(e) => {
                warn!("Status poll for instance {} failed: {}", instance.id, e);
                instance.last_error = Some(e.to_string());
            }
        }

        self.save_or_reload(instance, from)
    }

    /// Persist a transition out of `from`. If another writer moved the row
    /// while a cluster call was in flight, the stored row wins.
    pub(crate) fn save_or_reload(&self, instance: Instance, from: Status) -> Result<Instance> {
        if self.registry.update_instance(&instance, from)? {
            return Ok(instance);
        }
        info!(
            "Instance {} changed concurrently, keeping the stored state",
            instance.id
        );
        self.registry
            .get_instance(&instance.id)?
            .ok_or_else(|| Error::NotFound(format!("instance {} not found", instance.id)))
    }

    /// Latest instance of the pair. A non-terminal instance whose TTL has
    /// elapsed is torn down and marked EXPIRED on the way.
    pub(crate) async fn latest_instance(
        &self,
        challenge_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Instance>> {
        let Some(mut instance) = self.registry.latest_instance(challenge_id, user_id)? else {
            return Ok(None);
        };

        if !instance.status.is_terminal() && instance.is_expired(now) {
            info!("Instance {} has expired, terminating", instance.id);
            let from = instance.status;
            for e in teardown(self.cluster.as_ref(), &instance).await {
                instance.record_error(e);
            }
            instance.status = Status::Expired;
            instance = self.save_or_reload(instance, from)?;
        }

        Ok(Some(instance))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        cluster::fake::{Call, FakeCluster},
        model::{ChallengeWorkloadConfig, WorkloadConfigInput},
    };
    use chrono::Duration;

    pub fn workload_config(challenge_id: i64, ttl_seconds: i64) -> ChallengeWorkloadConfig {
        WorkloadConfigInput {
            image: "registry.ctf.local/web:1".to_string(),
            container_port: 8080,
            cpu_request: "100m".to_string(),
            cpu_limit: "500m".to_string(),
            mem_request: "64Mi".to_string(),
            mem_limit: "256Mi".to_string(),
            ttl_seconds,
            protocol: Some("http".to_string()),
            allowlist_prefix: None,
            enabled: true,
        }
        .into_config(challenge_id, Utc::now())
    }

    pub fn orchestrator(cluster: Arc<FakeCluster>) -> Orchestrator {
        let registry = Registry::open_in_memory().unwrap();
        registry.upsert_config(&workload_config(1, 30)).unwrap();
        Orchestrator::new(
            registry,
            cluster,
            Arc::new(Settings::default()),
            Arc::new(Metrics::default()),
        )
    }

    #[tokio::test]
    async fn test_status_without_instance() {
        let orch = orchestrator(Arc::new(FakeCluster::ready()));
        assert!(matches!(orch.status(1, 7).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_status_polls_pending_to_ready() {
        let cluster = Arc::new(FakeCluster::default());
        let orch = orchestrator(cluster.clone());
        let now = Utc::now();

        let spawned = orch.spawn_at(1, 7, now).await.unwrap();
        assert_eq!(spawned.status, Status::Pending);

        *cluster.ready.lock().unwrap() = true;
        let polled = orch.status_at(1, 7, now + Duration::seconds(1)).await.unwrap();
        assert_eq!(polled.id, spawned.id);
        assert_eq!(polled.status, Status::Ready);
        assert_eq!(
            orch.registry.get_instance(&spawned.id).unwrap().unwrap().status,
            Status::Ready
        );

        // the polling cycle goes both ways
        *cluster.ready.lock().unwrap() = false;
        let polled = orch.status_at(1, 7, now + Duration::seconds(2)).await.unwrap();
        assert_eq!(polled.status, Status::Pending);
    }

    #[tokio::test]
    async fn test_status_poll_failure_keeps_status() {
        let cluster = Arc::new(FakeCluster::ready());
        let orch = orchestrator(cluster.clone());
        let now = Utc::now();
        orch.spawn_at(1, 7, now).await.unwrap();

        *cluster.fail_status.lock().unwrap() = true;
        let polled = orch.status_at(1, 7, now + Duration::seconds(1)).await.unwrap();
        assert_eq!(polled.status, Status::Ready);
        assert!(polled.last_error.unwrap().contains("get deployment failed"));
    }

    #[tokio::test]
    async fn test_status_expires_lazily() {
        let cluster = Arc::new(FakeCluster::ready());
        let orch = orchestrator(cluster.clone());
        let now = Utc::now();
        let spawned = orch.spawn_at(1, 7, now).await.unwrap();

        let later = now + Duration::seconds(31);
        let expired = orch.status_at(1, 7, later).await.unwrap();
        assert_eq!(expired.id, spawned.id);
        assert_eq!(expired.status, Status::Expired);
        assert_eq!(expired.expires_at, spawned.expires_at);
        assert!(cluster.workloads().is_empty());
        assert!(cluster.exposures().is_empty());

        // expired instances are never polled again
        let polls = cluster.count(|c| matches!(c, Call::WorkloadStatus(_)));
        orch.status_at(1, 7, later).await.unwrap();
        assert_eq!(cluster.count(|c| matches!(c, Call::WorkloadStatus(_))), polls);
    }
}
