use super::{timestamp, Registry};
use crate::{
    date_time,
    error::{Error, Result},
    model::{Instance, Status},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, ErrorCode, OptionalExtension};

const COLUMNS: &str = "id, challenge_id, user_id, namespace, workload_name, exposure_name, hostname, \
                       created_at, expires_at, status, endpoint, last_error";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Instance> {
    let status: String = row.get(9)?;
    Ok(Instance {
        id: row.get(0)?,
        challenge_id: row.get(1)?,
        user_id: row.get(2)?,
        namespace: row.get(3)?,
        workload_name: row.get(4)?,
        exposure_name: row.get(5)?,
        hostname: row.get(6)?,
        created_at: timestamp(row, 7)?,
        expires_at: timestamp(row, 8)?,
        status: status
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, e.into()))?,
        endpoint: row.get(10)?,
        last_error: row.get(11)?,
    })
}

/// Compare-and-set on the stored status, so a writer holding a stale copy
/// cannot move a row another writer has already transitioned
fn update(conn: &Connection, instance: &Instance, from: Status) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE instances
         SET hostname = ?2, expires_at = ?3, status = ?4, endpoint = ?5, last_error = ?6
         WHERE id = ?1 AND status = ?7",
        params![
            instance.id,
            instance.hostname,
            date_time::encode(&instance.expires_at),
            instance.status.as_str(),
            instance.endpoint,
            instance.last_error,
            from.as_str(),
        ],
    )
}

impl Registry {
    /// Persist a new instance row. Fails with `Error::Conflict` if the pair
    /// already has a PENDING or READY row.
    pub fn insert_instance(&self, instance: &Instance) -> Result<()> {
        let result = self.conn().execute(
            &format!("INSERT INTO instances ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
            params![
                instance.id,
                instance.challenge_id,
                instance.user_id,
                instance.namespace,
                instance.workload_name,
                instance.exposure_name,
                instance.hostname,
                date_time::encode(&instance.created_at),
                date_time::encode(&instance.expires_at),
                instance.status.as_str(),
                instance.endpoint,
                instance.last_error,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(Error::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write back the mutable columns of an instance read in status `from`.
    /// Returns `false` when the row has since left `from`; the caller should
    /// re-read it instead of retrying.
    pub fn update_instance(&self, instance: &Instance, from: Status) -> Result<bool> {
        let changed = update(&self.conn(), instance, from)?;
        if changed == 0 {
            return match self.get_instance(&instance.id)? {
                Some(_) => Ok(false),
                None => Err(Error::NotFound(format!("instance {} not found", instance.id))),
            };
        }
        Ok(true)
    }

    /// Write back a batch in one transaction, each row guarded by the status
    /// it was read in. Returns the ids that were applied.
    pub fn update_instances(&self, updates: &[(Status, Instance)]) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut applied = Vec::with_capacity(updates.len());
        for (from, instance) in updates {
            if update(&tx, instance, *from)? > 0 {
                applied.push(instance.id.clone());
            }
        }
        tx.commit()?;
        Ok(applied)
    }

    pub fn get_instance(&self, id: &str) -> Result<Option<Instance>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM instances WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()?)
    }

    /// Most recently created instance of a user for a challenge, in any status
    pub fn latest_instance(&self, challenge_id: i64, user_id: i64) -> Result<Option<Instance>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM instances
                     WHERE challenge_id = ?1 AND user_id = ?2
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1"
                ),
                params![challenge_id, user_id],
                from_row,
            )
            .optional()?)
    }

    /// Instances past expiry that may still own cluster resources, oldest expiry first
    pub fn expired_instances(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Instance>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM instances
             WHERE expires_at <= ?1 AND status NOT IN ('STOPPED', 'EXPIRED')
             ORDER BY expires_at ASC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![date_time::encode(&now), limit as i64], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn instance(challenge_id: i64, user_id: i64, created_at: DateTime<Utc>, status: Status) -> Instance {
        let id = uuid::Uuid::new_v4().to_string();
        Instance {
            workload_name: format!("deploy-{id}"),
            exposure_name: format!("svc-{id}"),
            id,
            challenge_id,
            user_id,
            namespace: "ctf-challenges".to_string(),
            hostname: None,
            created_at: date_time::truncate(created_at),
            expires_at: date_time::truncate(created_at + Duration::seconds(30)),
            status,
            endpoint: None,
            last_error: None,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let registry = Registry::open_in_memory().unwrap();
        let inst = instance(1, 7, Utc::now(), Status::Pending);
        registry.insert_instance(&inst).unwrap();
        assert_eq!(registry.get_instance(&inst.id).unwrap(), Some(inst));
        assert_eq!(registry.get_instance("missing").unwrap(), None);
    }

    #[test]
    fn test_latest_instance_any_status() {
        let registry = Registry::open_in_memory().unwrap();
        let now = Utc::now();
        let old = instance(1, 7, now - Duration::minutes(5), Status::Stopped);
        let new = instance(1, 7, now, Status::Failed);
        let other_user = instance(1, 8, now + Duration::minutes(1), Status::Ready);
        registry.insert_instance(&new).unwrap();
        registry.insert_instance(&old).unwrap();
        registry.insert_instance(&other_user).unwrap();

        assert_eq!(registry.latest_instance(1, 7).unwrap().unwrap().id, new.id);
        assert!(registry.latest_instance(2, 7).unwrap().is_none());
    }

    #[test]
    fn test_second_active_instance_conflicts() {
        let registry = Registry::open_in_memory().unwrap();
        let now = Utc::now();
        registry.insert_instance(&instance(1, 7, now, Status::Pending)).unwrap();

        let err = registry
            .insert_instance(&instance(1, 7, now, Status::Pending))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict));

        // terminal rows do not count against the pair
        registry.insert_instance(&instance(1, 7, now, Status::Failed)).unwrap();
        registry.insert_instance(&instance(2, 7, now, Status::Ready)).unwrap();
    }

    #[test]
    fn test_update_instance() {
        let registry = Registry::open_in_memory().unwrap();
        let mut inst = instance(1, 7, Utc::now(), Status::Pending);
        registry.insert_instance(&inst).unwrap();

        inst.status = Status::Ready;
        inst.endpoint = Some("http://svc.ctf-challenges:80".to_string());
        assert!(registry.update_instance(&inst, Status::Pending).unwrap());
        assert_eq!(registry.get_instance(&inst.id).unwrap().unwrap(), inst);

        let ghost = instance(1, 9, Utc::now(), Status::Pending);
        assert!(matches!(
            registry.update_instance(&ghost, Status::Pending),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_stale_copy_cannot_revive_terminal_row() {
        let registry = Registry::open_in_memory().unwrap();
        let inst = instance(1, 7, Utc::now(), Status::Pending);
        registry.insert_instance(&inst).unwrap();

        let mut expired = inst.clone();
        expired.status = Status::Expired;
        assert!(registry.update_instance(&expired, Status::Pending).unwrap());

        // a writer still holding the PENDING copy
        let mut stale = inst.clone();
        stale.status = Status::Ready;
        stale.endpoint = Some("http://svc.ctf-challenges:80".to_string());
        assert!(!registry.update_instance(&stale, Status::Pending).unwrap());

        let row = registry.get_instance(&inst.id).unwrap().unwrap();
        assert_eq!(row.status, Status::Expired);
        assert!(row.endpoint.is_none());
    }

    #[test]
    fn test_expired_instances_filter_and_limit() {
        let registry = Registry::open_in_memory().unwrap();
        let now = Utc::now();
        let past = now - Duration::minutes(10);

        let pending = instance(1, 1, past, Status::Pending);
        let ready = instance(2, 1, past - Duration::minutes(1), Status::Ready);
        let failed = instance(3, 1, past, Status::Failed);
        let stopped = instance(4, 1, past, Status::Stopped);
        let expired = instance(5, 1, past, Status::Expired);
        let live = instance(6, 1, now, Status::Ready);
        for inst in [&pending, &ready, &failed, &stopped, &expired, &live] {
            registry.insert_instance(inst).unwrap();
        }

        let due = registry.expired_instances(now, 50).unwrap();
        let ids: Vec<&str> = due.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], ready.id);
        assert!(ids.contains(&pending.id.as_str()));
        assert!(ids.contains(&failed.id.as_str()));

        assert_eq!(registry.expired_instances(now, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_update_instances_batch() {
        let registry = Registry::open_in_memory().unwrap();
        let pending = instance(1, 1, Utc::now(), Status::Pending);
        let ready = instance(2, 1, Utc::now(), Status::Ready);
        let stopped = instance(3, 1, Utc::now(), Status::Stopped);
        let mut batch = Vec::new();
        for inst in [&pending, &ready, &stopped] {
            registry.insert_instance(inst).unwrap();
            // the STOPPED row is offered with a stale PENDING read
            let from = if inst.status == Status::Stopped { Status::Pending } else { inst.status };
            let mut next = inst.clone();
            next.status = Status::Expired;
            batch.push((from, next));
        }

        let applied = registry.update_instances(&batch).unwrap();
        assert_eq!(applied, vec![pending.id.clone(), ready.id.clone()]);
        for inst in [&pending, &ready] {
            assert_eq!(
                registry.get_instance(&inst.id).unwrap().unwrap().status,
                Status::Expired
            );
        }
        assert_eq!(
            registry.get_instance(&stopped.id).unwrap().unwrap().status,
            Status::Stopped
        );
    }
}
