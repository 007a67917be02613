use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Lifecycle status of an instance
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pending,
    Ready,
    Stopped,
    Expired,
    Failed,
}

impl Status {
    /// Statuses that may still own cluster resources and accept transitions
    pub const ACTIVE: [Status; 2] = [Status::Pending, Status::Ready];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Ready => "READY",
            Status::Stopped => "STOPPED",
            Status::Expired => "EXPIRED",
            Status::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !Self::ACTIVE.contains(self)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Status::Pending),
            "READY" => Ok(Status::Ready),
            "STOPPED" => Ok(Status::Stopped),
            "EXPIRED" => Ok(Status::Expired),
            "FAILED" => Ok(Status::Failed),
            other => Err(format!("unknown instance status: {other}")),
        }
    }
}

/// One provisioning of a challenge for a user. Rows are never deleted, only
/// moved to a terminal status.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub id: String,
    pub challenge_id: i64,
    pub user_id: i64,
    pub namespace: String,
    pub workload_name: String,
    pub exposure_name: String,
    pub hostname: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: Status,
    pub endpoint: Option<String>,
    pub last_error: Option<String>,
}

impl Instance {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Non-terminal and still within its TTL
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && !self.is_expired(now)
    }

    /// Append an error to `last_error` without losing an earlier one
    pub fn record_error(&mut self, error: impl fmt::Display) {
        let error = error.to_string();
        self.last_error = Some(match self.last_error.take() {
            Some(previous) if !previous.is_empty() => format!("{previous}; {error}"),
            _ => error,
        });
    }
}

/// Instance as presented to API consumers
#[derive(Serialize, Clone, Debug)]
pub struct InstanceView {
    pub instance_id: String,
    pub status: Status,
    pub endpoint: Option<String>,
    #[serde(serialize_with = "crate::date_time::serialize")]
    pub expires_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl From<&Instance> for InstanceView {
    fn from(instance: &Instance) -> Self {
        Self {
            instance_id: instance.id.clone(),
            status: instance.status,
            endpoint: instance.endpoint.clone(),
            expires_at: instance.expires_at,
            last_error: instance.last_error.clone(),
        }
    }
}
