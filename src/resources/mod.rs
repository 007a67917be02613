pub mod deployment;
pub mod labels;
pub mod service;

pub use deployment::{ResourceSpec, WorkloadStatus};
