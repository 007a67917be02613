pub mod api;
pub mod cluster;
pub mod config;
pub mod date_time;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod reclaimer;
pub mod registry;
pub mod resources;
pub mod telemetry;
pub mod utils;
