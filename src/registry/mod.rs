//! Durable state: workload configs and the instance table, in SQLite.

use crate::{date_time, error::Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection};
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::info;

mod configs;
mod instances;

const SCHEMA_VERSION: i64 = 1;

/// Shared handle to the registry database. Cloning is cheap; all clones use
/// the same connection, so writes are serialized.
#[derive(Clone)]
pub struct Registry {
    conn: Arc<Mutex<Connection>>,
}

impl Registry {
    pub fn open(path: &str) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        registry.ensure_schema()?;
        Ok(registry)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panic while holding the lock leaves the connection itself usable
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
              version INTEGER PRIMARY KEY,
              name TEXT NOT NULL,
              applied_at TEXT NOT NULL
            );
            "#,
        )?;
        let current: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |r| r.get(0),
        )?;
        if current < 1 {
            apply_migration_v1(&conn)?;
            record_migration(&conn, 1, "baseline_configs_and_instances")?;
            info!("Registry schema migrated to version {}", SCHEMA_VERSION);
        }
        Ok(())
    }
}

fn record_migration(conn: &Connection, version: i64, name: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at) VALUES (?1, ?2, ?3)",
        params![version, name, date_time::encode(&Utc::now())],
    )?;
    Ok(())
}

fn apply_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS workload_configs (
          challenge_id INTEGER PRIMARY KEY,
          image TEXT NOT NULL,
          container_port INTEGER NOT NULL,
          cpu_request TEXT NOT NULL,
          cpu_limit TEXT NOT NULL,
          mem_request TEXT NOT NULL,
          mem_limit TEXT NOT NULL,
          ttl_seconds INTEGER NOT NULL DEFAULT 1800,
          protocol TEXT NOT NULL DEFAULT 'http',
          allowlist_prefix TEXT NULL,
          enabled INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS instances (
          id TEXT PRIMARY KEY,
          challenge_id INTEGER NOT NULL,
          user_id INTEGER NOT NULL,
          namespace TEXT NOT NULL,
          workload_name TEXT NOT NULL,
          exposure_name TEXT NOT NULL,
          hostname TEXT NULL,
          created_at TEXT NOT NULL,
          expires_at TEXT NOT NULL,
          status TEXT NOT NULL,
          endpoint TEXT NULL,
          last_error TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_instances_user_challenge
          ON instances(user_id, challenge_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_instances_expires_at
          ON instances(expires_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_instances_one_active
          ON instances(challenge_id, user_id)
          WHERE status IN ('PENDING', 'READY');
        "#,
    )?;
    Ok(())
}

/// Read an encoded timestamp column
fn timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    date_time::decode(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
