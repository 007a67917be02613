use super::{timestamp, Registry};
use crate::{date_time, error::Result, model::ChallengeWorkloadConfig};
use rusqlite::{params, OptionalExtension};

const COLUMNS: &str = "challenge_id, image, container_port, cpu_request, cpu_limit, mem_request, mem_limit, \
                       ttl_seconds, protocol, allowlist_prefix, enabled, created_at, updated_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChallengeWorkloadConfig> {
    Ok(ChallengeWorkloadConfig {
        challenge_id: row.get(0)?,
        image: row.get(1)?,
        container_port: row.get(2)?,
        cpu_request: row.get(3)?,
        cpu_limit: row.get(4)?,
        mem_request: row.get(5)?,
        mem_limit: row.get(6)?,
        ttl_seconds: row.get(7)?,
        protocol: row.get(8)?,
        allowlist_prefix: row.get(9)?,
        enabled: row.get(10)?,
        created_at: timestamp(row, 11)?,
        updated_at: timestamp(row, 12)?,
    })
}

impl Registry {
    pub fn get_config(&self, challenge_id: i64) -> Result<Option<ChallengeWorkloadConfig>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM workload_configs WHERE challenge_id = ?1"),
                params![challenge_id],
                from_row,
            )
            .optional()?)
    }

    pub fn list_configs(&self) -> Result<Vec<ChallengeWorkloadConfig>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM workload_configs ORDER BY challenge_id"
        ))?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Insert or replace a config, keeping the original `created_at`
    pub fn upsert_config(&self, config: &ChallengeWorkloadConfig) -> Result<ChallengeWorkloadConfig> {
        self.conn().execute(
            &format!(
                "INSERT INTO workload_configs ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(challenge_id) DO UPDATE SET
                   image = excluded.image,
                   container_port = excluded.container_port,
                   cpu_request = excluded.cpu_request,
                   cpu_limit = excluded.cpu_limit,
                   mem_request = excluded.mem_request,
                   mem_limit = excluded.mem_limit,
                   ttl_seconds = excluded.ttl_seconds,
                   protocol = excluded.protocol,
                   allowlist_prefix = excluded.allowlist_prefix,
                   enabled = excluded.enabled,
                   updated_at = excluded.updated_at"
            ),
            params![
                config.challenge_id,
                config.image,
                config.container_port,
                config.cpu_request,
                config.cpu_limit,
                config.mem_request,
                config.mem_limit,
                config.ttl_seconds,
                config.protocol,
                config.allowlist_prefix,
                config.enabled,
                date_time::encode(&config.created_at),
                date_time::encode(&config.updated_at),
            ],
        )?;
        self.get_config(config.challenge_id)?.ok_or_else(|| {
            crate::error::Error::NotFound(format!("config {} vanished after write", config.challenge_id))
        })
    }

    /// Returns whether a config existed
    pub fn delete_config(&self, challenge_id: i64) -> Result<bool> {
        let deleted = self.conn().execute(
            "DELETE FROM workload_configs WHERE challenge_id = ?1",
            params![challenge_id],
        )?;
        Ok(deleted > 0)
    }
}
