use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exposure protocols an endpoint can be advertised with
pub const PROTOCOLS: [&str; 2] = ["http", "https"];

/// Longest lifetime an instance may be configured with (one week)
pub const MAX_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Desired workload for a challenge
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChallengeWorkloadConfig {
    pub challenge_id: i64,
    pub image: String,
    pub container_port: i32,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub mem_request: String,
    pub mem_limit: String,
    pub ttl_seconds: i64,
    pub protocol: String,
    pub allowlist_prefix: Option<String>,
    pub enabled: bool,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Admin form payload for creating or replacing a config
#[derive(Deserialize, Clone, Debug, Default)]
pub struct WorkloadConfigInput {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub container_port: i32,
    #[serde(default)]
    pub cpu_request: String,
    #[serde(default)]
    pub cpu_limit: String,
    #[serde(default)]
    pub mem_request: String,
    #[serde(default)]
    pub mem_limit: String,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: i64,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub allowlist_prefix: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

fn default_ttl() -> i64 {
    1800
}

impl WorkloadConfigInput {
    /// Normalize into a config row. Validation happens at spawn time, so an
    /// incomplete config can be saved while disabled.
    pub fn into_config(self, challenge_id: i64, now: DateTime<Utc>) -> ChallengeWorkloadConfig {
        ChallengeWorkloadConfig {
            challenge_id,
            image: self.image.trim().to_string(),
            container_port: self.container_port,
            cpu_request: self.cpu_request.trim().to_string(),
            cpu_limit: self.cpu_limit.trim().to_string(),
            mem_request: self.mem_request.trim().to_string(),
            mem_limit: self.mem_limit.trim().to_string(),
            ttl_seconds: self.ttl_seconds,
            protocol: self
                .protocol
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "http".to_string()),
            allowlist_prefix: self
                .allowlist_prefix
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            enabled: self.enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

impl ChallengeWorkloadConfig {
    /// Check that the config can be instantiated. `global_prefix` applies when
    /// the challenge has no allowlist override of its own.
    pub fn validate(&self, global_prefix: Option<&str>) -> Result<(), String> {
        if !self.enabled {
            return Err("Challenge not enabled for Kubernetes".to_string());
        }

        let required = [
            &self.image,
            &self.cpu_request,
            &self.cpu_limit,
            &self.mem_request,
            &self.mem_limit,
        ];
        if required.iter().any(|v| v.trim().is_empty()) {
            return Err("Configuration incomplete".to_string());
        }

        if self.container_port <= 0 || self.container_port > 65535 || self.ttl_seconds <= 0 {
            return Err("Port and TTL must be greater than zero".to_string());
        }
        if self.ttl_seconds > MAX_TTL_SECONDS {
            return Err(format!("TTL must not exceed {MAX_TTL_SECONDS} seconds"));
        }

        if !PROTOCOLS.contains(&self.protocol.to_lowercase().as_str()) {
            return Err("Protocol must be http or https".to_string());
        }

        let prefix = self.allowlist_prefix.as_deref().or(global_prefix);
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            if !self.image.starts_with(prefix) {
                return Err("Image not allowed by allowlist prefix".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChallengeWorkloadConfig {
        WorkloadConfigInput {
            image: "registry.ctf.local/web:1".to_string(),
            container_port: 8080,
            cpu_request: "100m".to_string(),
            cpu_limit: "500m".to_string(),
            mem_request: "64Mi".to_string(),
            mem_limit: "256Mi".to_string(),
            ttl_seconds: 1800,
            protocol: Some("HTTP".to_string()),
            allowlist_prefix: None,
            enabled: true,
        }
        .into_config(1, Utc::now())
    }

    #[test]
    fn test_valid_config() {
        assert_eq!(config().validate(None), Ok(()));
        assert_eq!(config().protocol, "http");
    }

    #[test]
    fn test_disabled_rejected() {
        let mut cfg = config();
        cfg.enabled = false;
        assert_eq!(
            cfg.validate(None).unwrap_err(),
            "Challenge not enabled for Kubernetes"
        );
    }

    #[test]
    fn test_incomplete_rejected() {
        let mut cfg = config();
        cfg.mem_limit = " ".to_string();
        assert_eq!(cfg.validate(None).unwrap_err(), "Configuration incomplete");
    }

    #[test]
    fn test_non_positive_numbers_rejected() {
        let mut cfg = config();
        cfg.ttl_seconds = 0;
        assert!(cfg.validate(None).is_err());

        let mut cfg = config();
        cfg.container_port = -1;
        assert!(cfg.validate(None).is_err());
    }

    #[test]
    fn test_ttl_upper_bound() {
        let mut cfg = config();
        cfg.ttl_seconds = MAX_TTL_SECONDS;
        assert!(cfg.validate(None).is_ok());

        for ttl in [MAX_TTL_SECONDS + 1, 8000 * 365 * 24 * 3600, i64::MAX] {
            cfg.ttl_seconds = ttl;
            assert!(cfg.validate(None).unwrap_err().contains("must not exceed"));
        }
    }

    #[test]
    fn test_protocol_rejected() {
        let mut cfg = config();
        cfg.protocol = "tcp".to_string();
        assert_eq!(
            cfg.validate(None).unwrap_err(),
            "Protocol must be http or https"
        );
    }

    #[test]
    fn test_allowlist_prefix() {
        let cfg = config();
        assert!(cfg.validate(Some("registry.ctf.local/")).is_ok());
        assert!(cfg.validate(Some("docker.io/")).is_err());

        let mut cfg = config();
        cfg.allowlist_prefix = Some("registry.ctf.local/web".to_string());
        // override wins over the global prefix
        assert!(cfg.validate(Some("docker.io/")).is_ok());
    }

    #[test]
    fn test_input_defaults() {
        let input: WorkloadConfigInput = serde_json::from_str(r#"{"image":" nginx "}"#).unwrap();
        let cfg = input.into_config(3, Utc::now());
        assert_eq!(cfg.image, "nginx");
        assert_eq!(cfg.ttl_seconds, 1800);
        assert_eq!(cfg.protocol, "http");
        assert!(!cfg.enabled);
    }
}
