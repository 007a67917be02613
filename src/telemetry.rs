use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub spawns: AtomicU64,
    pub spawn_failures: AtomicU64,
    pub stops: AtomicU64,
    pub reclaimed: AtomicU64,
    pub tick_errors: AtomicU64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub spawns: u64,
    pub spawn_failures: u64,
    pub stops: u64,
    pub reclaimed: u64,
    pub tick_errors: u64,
}

impl Metrics {
    pub fn record_spawn(&self) {
        self.spawns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spawn_failure(&self) {
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reclaimed(&self, count: usize) {
        self.reclaimed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_tick_error(&self) {
        self.tick_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            spawns: self.spawns.load(Ordering::Relaxed),
            spawn_failures: self.spawn_failures.load(Ordering::Relaxed),
            stops: self.stops.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            tick_errors: self.tick_errors.load(Ordering::Relaxed),
        }
    }
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("challenge_spawner=info".parse().unwrap())
        .add_directive("kube=warn".parse().unwrap())
}

#[cfg(not(debug_assertions))]
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .init();
}

#[cfg(debug_assertions)]
pub fn init() {
    tracing_subscriber::fmt()
        .pretty()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(env_filter())
        .init();
}
