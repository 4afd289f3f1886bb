use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{Connection, params, OptionalExtension};
use shared::types::{ProbeOutcome, StatusSnapshot, Target, TargetFields, TargetStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

const TARGET_COLUMNS: &str =
    "id, name, dns_record, target_host, target_port, poll_host, external_key, created_at, updated_at";

const STATUS_COLUMNS: &str =
    "id, target_id, online, player_count, max_players, motd, version, checked_at";

pub struct StoreDb {
    conn: Connection,
}

impl StoreDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("Failed to configure database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS targets (
                id           TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                dns_record   TEXT NOT NULL,
                target_host  TEXT NOT NULL,
                target_port  INTEGER NOT NULL,
                poll_host    TEXT,
                external_key TEXT UNIQUE,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS statuses (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                target_id    TEXT NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
                online       INTEGER NOT NULL,
                player_count INTEGER NOT NULL,
                max_players  INTEGER NOT NULL,
                motd         TEXT,
                version      TEXT,
                checked_at   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_statuses_target ON statuses(target_id, id);
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// All targets in creation order
    pub fn list_targets(&self) -> Result<Vec<Target>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TARGET_COLUMNS} FROM targets ORDER BY rowid"))
            .context("Failed to prepare query")?;

        let targets = stmt
            .query_map([], Self::row_to_target)
            .context("Failed to query targets")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect targets")?;

        Ok(targets)
    }

    pub fn get_target(&self, id: Uuid) -> Result<Option<Target>> {
        self.conn
            .query_row(
                &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE id = ?1"),
                params![id.to_string()],
                Self::row_to_target,
            )
            .optional()
            .context("Failed to query target")
    }

    pub fn find_by_external_key(&self, key: &str) -> Result<Option<Target>> {
        self.conn
            .query_row(
                &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE external_key = ?1"),
                params![key],
                Self::row_to_target,
            )
            .optional()
            .context("Failed to query target by external key")
    }

    pub fn create_target(&self, fields: &TargetFields, external_key: Option<&str>) -> Result<Target> {
        let now = Utc::now();
        let target = Target {
            id: Uuid::new_v4(),
            name: fields.name.clone(),
            dns_record: fields.dns_record.clone(),
            target_host: fields.target_host.clone(),
            target_port: fields.target_port,
            poll_host: fields.poll_host.clone(),
            external_key: external_key.map(str::to_string),
            created_at: now,
            updated_at: now,
        };

        self.conn.execute(
            &format!("INSERT INTO targets ({TARGET_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                target.id.to_string(),
                &target.name,
                &target.dns_record,
                &target.target_host,
                target.target_port,
                &target.poll_host,
                &target.external_key,
                target.created_at.to_rfc3339(),
                target.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert target")?;

        Ok(target)
    }

    /// Replace the editable fields of a target. The external key is kept.
    pub fn update_target(&self, id: Uuid, fields: &TargetFields) -> Result<Option<Target>> {
        let Some(mut target) = self.get_target(id)? else {
            return Ok(None);
        };

        target.name = fields.name.clone();
        target.dns_record = fields.dns_record.clone();
        target.target_host = fields.target_host.clone();
        target.target_port = fields.target_port;
        target.poll_host = fields.poll_host.clone();
        target.updated_at = Utc::now();

        self.conn.execute(
            "UPDATE targets
             SET name = ?1, dns_record = ?2, target_host = ?3, target_port = ?4, poll_host = ?5,
                 updated_at = ?6
             WHERE id = ?7",
            params![
                &target.name,
                &target.dns_record,
                &target.target_host,
                target.target_port,
                &target.poll_host,
                target.updated_at.to_rfc3339(),
                id.to_string(),
            ],
        )
        .context("Failed to update target")?;

        Ok(Some(target))
    }

    /// Point a target at a new destination. Returns true if data changed;
    /// identical values leave the row (including updated_at) untouched.
    /// The poll host is local configuration and is left alone.
    pub fn update_destination(&self, id: Uuid, host: &str, port: u16) -> Result<bool> {
        let count = self.conn.execute(
            "UPDATE targets SET target_host = ?1, target_port = ?2, updated_at = ?3
             WHERE id = ?4 AND (target_host != ?1 OR target_port != ?2)",
            params![host, port, Utc::now().to_rfc3339(), id.to_string()],
        )
        .context("Failed to update target destination")?;

        Ok(count > 0)
    }

    /// Delete a target and its status history. Returns false if it did not exist.
    pub fn delete_target(&self, id: Uuid) -> Result<bool> {
        let count = self.conn.execute(
            "DELETE FROM targets WHERE id = ?1",
            params![id.to_string()],
        )
        .context("Failed to delete target")?;

        Ok(count > 0)
    }

    /// Append one status snapshot. The check time is taken here, not from the caller.
    pub fn insert_status(&self, target_id: Uuid, outcome: &ProbeOutcome) -> Result<StatusSnapshot> {
        let checked_at = Utc::now();
        let (online, player_count, max_players, motd, version) = match outcome {
            ProbeOutcome::Online { player_count, max_players, motd, version } => {
                (true, *player_count, *max_players, motd.clone(), version.clone())
            }
            ProbeOutcome::Offline => (false, 0, 0, None, None),
        };

        self.conn.execute(
            "INSERT INTO statuses (target_id, online, player_count, max_players, motd, version, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                target_id.to_string(),
                online as i32,
                player_count,
                max_players,
                &motd,
                &version,
                checked_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert status")?;

        Ok(StatusSnapshot {
            id: self.conn.last_insert_rowid(),
            target_id,
            online,
            player_count,
            max_players,
            motd,
            version,
            checked_at,
        })
    }

    /// Status history of one target, newest first
    pub fn status_history(&self, target_id: Uuid, limit: u32) -> Result<Vec<StatusSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {STATUS_COLUMNS} FROM statuses WHERE target_id = ?1 ORDER BY id DESC LIMIT ?2"
            ))
            .context("Failed to prepare query")?;

        let statuses = stmt
            .query_map(params![target_id.to_string(), limit], Self::row_to_status)
            .context("Failed to query statuses")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect statuses")?;

        Ok(statuses)
    }

    /// Every target paired with its most recent snapshot, if any
    pub fn latest_statuses(&self) -> Result<Vec<TargetStatus>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {STATUS_COLUMNS} FROM statuses
                 WHERE id IN (SELECT MAX(id) FROM statuses GROUP BY target_id)"
            ))
            .context("Failed to prepare query")?;

        let mut latest = stmt
            .query_map([], Self::row_to_status)
            .context("Failed to query latest statuses")?
            .map(|row| row.map(|s| (s.target_id, s)))
            .collect::<Result<std::collections::HashMap<_, _>, _>>()
            .context("Failed to collect latest statuses")?;

        Ok(self
            .list_targets()?
            .into_iter()
            .map(|target| {
                let latest = latest.remove(&target.id);
                TargetStatus { target, latest }
            })
            .collect())
    }

    fn row_to_target(row: &rusqlite::Row) -> Result<Target, rusqlite::Error> {
        let id_str: String = row.get(0)?;

        Ok(Target {
            id: parse_uuid(0, &id_str)?,
            name: row.get(1)?,
            dns_record: row.get(2)?,
            target_host: row.get(3)?,
            target_port: row.get::<_, u16>(4)?,
            poll_host: row.get(5)?,
            external_key: row.get(6)?,
            created_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
            updated_at: parse_timestamp(8, &row.get::<_, String>(8)?)?,
        })
    }

    fn row_to_status(row: &rusqlite::Row) -> Result<StatusSnapshot, rusqlite::Error> {
        let target_id_str: String = row.get(1)?;
        let online_int: i32 = row.get(2)?;

        Ok(StatusSnapshot {
            id: row.get(0)?,
            target_id: parse_uuid(1, &target_id_str)?,
            online: online_int != 0,
            player_count: row.get::<_, u32>(3)?,
            max_players: row.get::<_, u32>(4)?,
            motd: row.get(5)?,
            version: row.get(6)?,
            checked_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
        })
    }
}

fn parse_uuid(idx: usize, value: &str) -> Result<Uuid, rusqlite::Error> {
    Uuid::parse_str(value).map_err(|e| rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(e),
    ))
}

fn parse_timestamp(idx: usize, value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fields() -> TargetFields {
        TargetFields {
            name: "Survival".to_string(),
            dns_record: "mc1.example.com".to_string(),
            target_host: "10.0.0.1".to_string(),
            target_port: 25565,
            poll_host: None,
        }
    }

    fn online(players: u32) -> ProbeOutcome {
        ProbeOutcome::Online {
            player_count: players,
            max_players: 20,
            motd: Some("A Minecraft Server".to_string()),
            version: Some("1.20.4".to_string()),
        }
    }

    #[test]
    fn test_create_and_query() {
        let db = StoreDb::open(":memory:").unwrap();
        let created = db.create_target(&test_fields(), Some("r1")).unwrap();

        let fetched = db.get_target(created.id).unwrap().unwrap();
        assert_eq!(fetched, created);

        let by_key = db.find_by_external_key("r1").unwrap().unwrap();
        assert_eq!(by_key.id, created.id);
        assert!(db.find_by_external_key("r2").unwrap().is_none());
    }

    #[test]
    fn test_update_target_keeps_identity() {
        let db = StoreDb::open(":memory:").unwrap();
        let created = db.create_target(&test_fields(), Some("r1")).unwrap();

        let mut fields = test_fields();
        fields.name = "Creative".to_string();
        fields.target_port = 25566;
        let updated = db.update_target(created.id, &fields).unwrap().unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.external_key.as_deref(), Some("r1"));
        assert_eq!(updated.name, "Creative");
        assert_eq!(db.get_target(created.id).unwrap().unwrap().target_port, 25566);

        assert!(db.update_target(Uuid::new_v4(), &fields).unwrap().is_none());
    }

    #[test]
    fn test_update_destination_detects_changes() {
        let db = StoreDb::open(":memory:").unwrap();
        let created = db.create_target(&test_fields(), Some("r1")).unwrap();

        let changed = db.update_destination(created.id, "10.0.0.1", 25565).unwrap();
        assert!(!changed, "Identical destination should not report change");
        assert_eq!(db.get_target(created.id).unwrap().unwrap(), created);

        let changed = db.update_destination(created.id, "10.0.0.1", 25566).unwrap();
        assert!(changed, "Modified port should report change");
        assert_eq!(db.get_target(created.id).unwrap().unwrap().target_port, 25566);
    }

    #[test]
    fn test_poll_host_survives_destination_change() {
        let db = StoreDb::open(":memory:").unwrap();
        let mut fields = test_fields();
        fields.target_host = "play.example.net".to_string();
        fields.poll_host = Some("192.168.1.20".to_string());
        let created = db.create_target(&fields, Some("r1")).unwrap();
        assert_eq!(created.poll_address(), "192.168.1.20");

        assert!(db.update_destination(created.id, "play2.example.net", 25565).unwrap());
        let moved = db.get_target(created.id).unwrap().unwrap();
        assert_eq!(moved.target_host, "play2.example.net");
        assert_eq!(moved.poll_host.as_deref(), Some("192.168.1.20"));

        fields.poll_host = None;
        let cleared = db.update_target(created.id, &fields).unwrap().unwrap();
        assert_eq!(cleared.poll_address(), "play.example.net");
        assert_eq!(db.get_target(created.id).unwrap().unwrap(), cleared);
    }

    #[test]
    fn test_delete_removes_history() {
        let db = StoreDb::open(":memory:").unwrap();
        let created = db.create_target(&test_fields(), None).unwrap();
        db.insert_status(created.id, &online(3)).unwrap();

        assert!(db.delete_target(created.id).unwrap());
        assert!(!db.delete_target(created.id).unwrap());
        assert!(db.status_history(created.id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_offline_status_has_no_details() {
        let db = StoreDb::open(":memory:").unwrap();
        let created = db.create_target(&test_fields(), None).unwrap();

        let snapshot = db.insert_status(created.id, &ProbeOutcome::Offline).unwrap();
        assert!(!snapshot.online);
        assert_eq!(snapshot.player_count, 0);
        assert_eq!(snapshot.max_players, 0);
        assert!(snapshot.motd.is_none());
        assert!(snapshot.version.is_none());

        let stored = db.status_history(created.id, 1).unwrap();
        assert_eq!(stored, vec![snapshot]);
    }

    #[test]
    fn test_history_is_newest_first() {
        let db = StoreDb::open(":memory:").unwrap();
        let created = db.create_target(&test_fields(), None).unwrap();

        for players in 1..=3 {
            db.insert_status(created.id, &online(players)).unwrap();
        }

        let history = db.status_history(created.id, 2).unwrap();
        let counts: Vec<u32> = history.iter().map(|s| s.player_count).collect();
        assert_eq!(counts, vec![3, 2]);
        assert!(history[0].checked_at >= history[1].checked_at);
    }

    #[test]
    fn test_latest_statuses() {
        let db = StoreDb::open(":memory:").unwrap();
        let polled = db.create_target(&test_fields(), None).unwrap();
        let mut fields = test_fields();
        fields.dns_record = "mc2.example.com".to_string();
        let fresh = db.create_target(&fields, None).unwrap();

        db.insert_status(polled.id, &online(1)).unwrap();
        db.insert_status(polled.id, &ProbeOutcome::Offline).unwrap();

        let latest = db.latest_statuses().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].target.id, polled.id);
        assert!(!latest[0].latest.as_ref().unwrap().online);
        assert_eq!(latest[1].target.id, fresh.id);
        assert!(latest[1].latest.is_none());
    }
}
