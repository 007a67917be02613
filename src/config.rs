use crate::error::Result;
use serde::Deserialize;
use std::{net::SocketAddr, time::Duration};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Address the HTTP API binds to
    pub listen_addr: SocketAddr,

    /// SQLite database holding workload configs and instances
    pub database_path: String,

    /// Namespace all instance workloads are created in
    pub namespace: String,

    /// Base URL of the Kubernetes API server
    pub api_url: String,

    /// Mounted service account token
    pub token_path: String,

    /// Mounted cluster CA bundle (PEM)
    pub ca_path: String,

    /// Skip TLS verification when no CA bundle is mounted
    pub allow_insecure_tls: bool,

    /// Deadline for a single cluster API call
    pub api_timeout_secs: u64,

    /// Minimum interval between spawn attempts per user and challenge
    pub rate_limit_seconds: i64,

    pub reclaim_interval_secs: u64,
    pub reclaim_batch_size: usize,

    /// Global image prefix allowlist, overridable per challenge
    pub image_prefix: Option<String>,

    /// Bearer token guarding the admin routes
    pub admin_token: Option<String>,
}

impl Settings {
    /// Load defaults, then an optional `spawner.{toml,yaml,json}` file, then `SPAWNER_*` env vars
    pub fn load() -> Result<Self> {
        Self::load_from("spawner")
    }

    pub fn load_from(file: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .set_default("listen_addr", "0.0.0.0:8080")?
            .set_default("database_path", "spawner.db")?
            .set_default("namespace", "ctf-challenges")?
            .set_default("api_url", "https://kubernetes.default.svc")?
            .set_default("token_path", format!("{SERVICE_ACCOUNT_DIR}/token"))?
            .set_default("ca_path", format!("{SERVICE_ACCOUNT_DIR}/ca.crt"))?
            .set_default("allow_insecure_tls", false)?
            .set_default("api_timeout_secs", 5)?
            .set_default("rate_limit_seconds", 10)?
            .set_default("reclaim_interval_secs", 60)?
            .set_default("reclaim_batch_size", 50)?
            .add_source(::config::File::with_name(file).required(false))
            .add_source(::config::Environment::with_prefix("SPAWNER").try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}

#[cfg(test)]
impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], 0).into(),
            database_path: ":memory:".to_string(),
            namespace: "ctf-challenges".to_string(),
            api_url: "https://kubernetes.default.svc".to_string(),
            token_path: format!("{SERVICE_ACCOUNT_DIR}/token"),
            ca_path: format!("{SERVICE_ACCOUNT_DIR}/ca.crt"),
            allow_insecure_tls: false,
            api_timeout_secs: 5,
            rate_limit_seconds: 10,
            reclaim_interval_secs: 60,
            reclaim_batch_size: 50,
            image_prefix: None,
            admin_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::load_from("does-not-exist").unwrap();
        assert_eq!(settings.namespace, "ctf-challenges");
        assert_eq!(settings.rate_limit_seconds, 10);
        assert_eq!(settings.reclaim_batch_size, 50);
        assert_eq!(settings.api_timeout(), Duration::from_secs(5));
        assert!(!settings.allow_insecure_tls);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spawner.toml");
        std::fs::write(
            &path,
            "namespace = \"ctf-test\"\nreclaim_batch_size = 5\nimage_prefix = \"registry.ctf.local/\"\n",
        )
        .unwrap();

        let settings = Settings::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.namespace, "ctf-test");
        assert_eq!(settings.reclaim_batch_size, 5);
        assert_eq!(settings.image_prefix.as_deref(), Some("registry.ctf.local/"));
    }
}
