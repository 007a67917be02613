use super::Orchestrator;
use crate::{
    cluster::ClusterApi,
    date_time,
    error::{Error, Result},
    model::{Instance, Status},
};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

/// Delete an instance's exposure, then its workload. Both deletions are
/// attempted; the errors are returned for the caller to record.
pub async fn teardown(cluster: &dyn ClusterApi, instance: &Instance) -> Vec<Error> {
    let mut errors = Vec::new();
    if let Err(e) = cluster.delete_exposure(&instance.exposure_name).await {
        errors.push(e);
    }
    if let Err(e) = cluster.delete_workload(&instance.workload_name).await {
        errors.push(e);
    }
    errors
}

impl Orchestrator {
    #[instrument(skip(self, now))]
    pub(crate) async fn stop_at(
        &self,
        challenge_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Instance> {
        let mut instance = match self.latest_instance(challenge_id, user_id, now).await? {
            Some(instance) if instance.is_active(now) => instance,
            _ => return Err(Error::NotFound("No active instance".to_string())),
        };

        let from = instance.status;
        let mut errors = teardown(self.cluster.as_ref(), &instance).await;

        // without a client nothing was deleted, so the instance stays active
        if let Some(pos) = errors.iter().position(|e| matches!(e, Error::ClientInit(_))) {
            let err = errors.swap_remove(pos);
            instance.last_error = Some(err.to_string());
            self.registry.update_instance(&instance, from)?;
            return Err(err);
        }

        for e in errors {
            warn!("Teardown of instance {} incomplete: {}", instance.id, e);
            instance.record_error(e);
        }
        instance.status = Status::Stopped;
        instance.expires_at = date_time::truncate(now);
        let instance = self.save_or_reload(instance, from)?;
        if instance.status == Status::Stopped {
            self.metrics.record_stop();
            info!("Stopped instance {}", instance.id);
        }

        Ok(instance)
    }
}
