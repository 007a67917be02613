pub mod instance;
pub mod workload_config;

pub use instance::{Instance, InstanceView, Status};
pub use workload_config::{ChallengeWorkloadConfig, WorkloadConfigInput, MAX_TTL_SECONDS, PROTOCOLS};
