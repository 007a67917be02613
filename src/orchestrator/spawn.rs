use super::{teardown, Orchestrator};
use crate::{
    date_time,
    error::{Error, Result},
    model::{ChallengeWorkloadConfig, Instance, Status},
    resources::{labels, ResourceSpec},
    utils,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument};

impl Orchestrator {
    #[instrument(skip(self, now))]
    pub(crate) async fn spawn_at(
        &self,
        challenge_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Instance> {
        let config = self
            .registry
            .get_config(challenge_id)?
            .ok_or_else(|| Error::Validation("Challenge not configured".to_string()))?;
        config
            .validate(self.settings.image_prefix.as_deref())
            .map_err(Error::Validation)?;

        if let Some(latest) = self.latest_instance(challenge_id, user_id, now).await? {
            if latest.is_active(now) {
                debug!("Returning active instance {}", latest.id);
                return Ok(latest);
            }
            self.enforce_rate_limit(&latest, now)?;
        }

        let now = date_time::truncate(now);
        let expires_at = Duration::try_seconds(config.ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| Error::Validation("TTL out of range".to_string()))?;
        let instance_id = uuid::Uuid::new_v4().to_string();
        let mut instance = Instance {
            workload_name: utils::generate_resource_name(
                utils::WORKLOAD_KIND,
                challenge_id,
                user_id,
                &instance_id,
            ),
            exposure_name: utils::generate_resource_name(
                utils::EXPOSURE_KIND,
                challenge_id,
                user_id,
                &instance_id,
            ),
            id: instance_id,
            challenge_id,
            user_id,
            namespace: self.cluster.namespace().to_string(),
            hostname: None,
            created_at: now,
            expires_at,
            status: Status::Pending,
            endpoint: None,
            last_error: None,
        };

        // the row must exist before the cluster sees anything
        self.registry.insert_instance(&instance)?;
        self.metrics.record_spawn();
        info!(
            "Spawning instance {} for challenge {} user {}",
            instance.id, challenge_id, user_id
        );

        if let Err(e) = self.provision(&mut instance, &config).await {
            error!("Failed to spawn instance {}: {}", instance.id, e);
            self.metrics.record_spawn_failure();

            instance.status = Status::Failed;
            instance.last_error = Some(e.to_string());
            match self.registry.update_instance(&instance, Status::Pending) {
                Ok(true) => {}
                Ok(false) => debug!("Instance {} was terminalized concurrently", instance.id),
                Err(persist) => error!("Could not mark instance {} failed: {}", instance.id, persist),
            }

            // deletes are idempotent, so also cover objects whose create timed out
            for cleanup in teardown(self.cluster.as_ref(), &instance).await {
                debug!("Rollback of instance {}: {}", instance.id, cleanup);
            }
            return Err(e);
        }

        Ok(instance)
    }

    /// Attempts are measured from the latest instance's creation, whatever its outcome
    fn enforce_rate_limit(&self, latest: &Instance, now: DateTime<Utc>) -> Result<()> {
        let window = Duration::seconds(self.settings.rate_limit_seconds);
        let elapsed = now - latest.created_at;
        if elapsed < window {
            let remaining = window - elapsed;
            let retry_after = (remaining.num_milliseconds() as u64).div_ceil(1000).max(1);
            return Err(Error::RateLimited { retry_after });
        }
        Ok(())
    }

    async fn provision(&self, instance: &mut Instance, config: &ChallengeWorkloadConfig) -> Result<()> {
        let labels = labels::instance_labels(instance.challenge_id, instance.user_id, &instance.id);

        self.cluster
            .create_workload(
                &instance.workload_name,
                &config.image,
                config.container_port,
                &ResourceSpec::from(config),
                &labels,
            )
            .await?;
        self.cluster
            .create_exposure(
                &instance.exposure_name,
                &labels,
                config.container_port,
                config.container_port,
                &labels,
            )
            .await?;

        let workload = self.cluster.workload_status(&instance.workload_name).await?;
        instance.status = if workload.ready {
            Status::Ready
        } else {
            Status::Pending
        };
        instance.endpoint = Some(utils::generate_endpoint(
            &config.protocol,
            &instance.exposure_name,
            &instance.namespace,
            config.container_port,
        ));
        *instance = self.save_or_reload(instance.clone(), Status::Pending)?;

        Ok(())
    }
}
