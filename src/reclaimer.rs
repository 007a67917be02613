use crate::{
    cluster::ClusterApi,
    config::Settings,
    error::Result,
    model::Status,
    orchestrator::teardown,
    registry::Registry,
    telemetry::Metrics,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::oneshot, time::MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Outcome of one reclamation pass
#[derive(Serialize, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Ids of the instances marked EXPIRED
    pub reclaimed: Vec<String>,
    /// Teardown errors as (instance id, message); they never block expiry
    pub errors: Vec<(String, String)>,
}

/// Tear down up to `batch_size` instances past their expiry and mark them
/// EXPIRED in a single transaction. Rows beyond the batch wait for the next pass.
pub async fn reclaim_expired(
    registry: &Registry,
    cluster: &dyn ClusterApi,
    now: DateTime<Utc>,
    batch_size: usize,
) -> Result<TickReport> {
    // no client, no teardown: leave the rows for the next pass
    cluster.connect().await?;

    let batch = registry.expired_instances(now, batch_size)?;
    let mut report = TickReport::default();
    let mut updates = Vec::with_capacity(batch.len());

    for mut instance in batch {
        let from = instance.status;
        for e in teardown(cluster, &instance).await {
            warn!("Teardown of expired instance {} incomplete: {}", instance.id, e);
            report.errors.push((instance.id.clone(), e.to_string()));
            instance.record_error(e);
        }
        instance.status = Status::Expired;
        updates.push((from, instance));
    }

    if !updates.is_empty() {
        // rows a request moved meanwhile (e.g. stopped) keep their status
        report.reclaimed = registry.update_instances(&updates)?;
    }
    Ok(report)
}

/// Periodic background reclamation, independent of request traffic
pub struct Reclaimer {
    registry: Registry,
    cluster: Arc<dyn ClusterApi>,
    metrics: Arc<Metrics>,
    interval: Duration,
    batch_size: usize,
}

impl Reclaimer {
    pub fn new(
        registry: Registry,
        cluster: Arc<dyn ClusterApi>,
        settings: &Settings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            cluster,
            metrics,
            interval: settings.reclaim_interval(),
            batch_size: settings.reclaim_batch_size,
        }
    }

    /// Run a single pass. Also used by the admin cleanup trigger.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let result = reclaim_expired(&self.registry, self.cluster.as_ref(), now, self.batch_size).await;
        match &result {
            Ok(report) => {
                self.metrics.record_reclaimed(report.reclaimed.len());
                if report.reclaimed.is_empty() {
                    debug!("Nothing to reclaim");
                } else {
                    info!(
                        "Reclaimed {} instances ({} teardown errors)",
                        report.reclaimed.len(),
                        report.errors.len()
                    );
                }
            }
            Err(_) => self.metrics.record_tick_error(),
        }
        result
    }

    /// Tick every interval until `shutdown` fires. A failed tick is logged and
    /// retried at the next interval.
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        info!(
            "Reclaimer started (every {}s, batch {})",
            self.interval.as_secs(),
            self.batch_size
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Reclaimer stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("[!] Reclaimer tick failed: {}", e);
                    }
                }
            }
        }
    }
}
