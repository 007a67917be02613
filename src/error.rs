use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("Too many requests, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("{0}")]
    NotFound(String),

    #[error("An instance for this challenge is already being created")]
    Conflict,

    #[error("Cluster API returned {status}: {message}")]
    ClusterApi {
        status: u16,
        message: String,
        payload: serde_json::Value,
    },

    #[error("Kubernetes transport error: {0}")]
    Kube(kube::Error),

    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Cluster client initialization failed: {0}")]
    ClientInit(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] config::ConfigError),
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) => Error::ClusterApi {
                status: ae.code,
                message: ae.message.clone(),
                payload: serde_json::to_value(&ae).unwrap_or_default(),
            },
            e => Error::Kube(e),
        }
    }
}

impl Error {
    /// Determine if the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Conflict | Error::Kube(_) | Error::Timeout { .. } | Error::RateLimited { .. }
        )
    }

    /// HTTP status code carried by a cluster API error, if any
    pub fn api_status(&self) -> Option<u16> {
        match self {
            Error::ClusterApi { status, .. } => Some(*status),
            _ => None,
        }
    }
}
