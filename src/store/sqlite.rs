//! SQLite-backed remote store.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, instrument};

use super::{RemoteStore, StoreError, VmRowId};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hosts (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname TEXT NOT NULL UNIQUE,
    cpu_mhz  INTEGER NOT NULL,
    ram      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS vms (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS vm_resource_usage (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    vm_id     INTEGER NOT NULL REFERENCES vms(id),
    timestamp INTEGER NOT NULL,
    cpu_mhz   INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vm_resource_usage_vm
    ON vm_resource_usage (vm_id, id);
"#;

/// Remote store on a SQLite database.
pub struct SqliteStore {
    conn: Connection,
}

fn to_sql_int(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange(value))
}

impl SqliteStore {
    /// Opens `connection`: a file path, `sqlite://<path>` or `:memory:`.
    pub fn open(connection: &str) -> Result<Self, StoreError> {
        let target = connection
            .strip_prefix("sqlite://")
            .unwrap_or(connection)
            .trim();

        let conn = if target == ":memory:" || target.is_empty() {
            Connection::open_in_memory()
        } else {
            Connection::open(target)
        }
        .map_err(|source| StoreError::Open {
            connection: connection.to_string(),
            source,
        })?;

        conn.execute_batch(SCHEMA)
            .map_err(|source| StoreError::Open {
                connection: connection.to_string(),
                source,
            })?;

        info!("Opened usage store: {}", connection);
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    /// Registered capacity of a host, if known.
    pub fn host(&self, hostname: &str) -> Result<Option<(u64, u64)>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT cpu_mhz, ram FROM hosts WHERE hostname = ?1",
                params![hostname],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(mhz, ram)| (mhz.max(0) as u64, ram.max(0) as u64)))
    }
}

impl RemoteStore for SqliteStore {
    #[instrument(skip(self))]
    fn register_host(
        &self,
        hostname: &str,
        total_capacity_mhz: u64,
        ram_mb: u64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO hosts (hostname, cpu_mhz, ram) VALUES (?1, ?2, ?3)
             ON CONFLICT(hostname) DO UPDATE SET cpu_mhz = excluded.cpu_mhz, ram = excluded.ram",
            params![
                hostname,
                to_sql_int(total_capacity_mhz)?,
                to_sql_int(ram_mb)?
            ],
        )?;
        debug!("Registered host {}", hostname);
        Ok(())
    }

    fn resolve_or_create_vm_row(&self, vm_id: &str) -> Result<VmRowId, StoreError> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM vms WHERE uuid = ?1",
                params![vm_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        self.conn
            .execute("INSERT INTO vms (uuid) VALUES (?1)", params![vm_id])?;
        let id = self.conn.last_insert_rowid();
        debug!("Created store row {} for VM {}", id, vm_id);
        Ok(id)
    }

    fn append_usage(&self, row_id: VmRowId, cpu_mhz: u64) -> Result<(), StoreError> {
        let timestamp = chrono::Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO vm_resource_usage (vm_id, timestamp, cpu_mhz) VALUES (?1, ?2, ?3)",
            params![row_id, timestamp, to_sql_int(cpu_mhz)?],
        )?;
        Ok(())
    }

    fn recent_usage(&self, vm_id: &str, limit: usize) -> Result<Vec<u64>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare_cached(
            "SELECT u.cpu_mhz FROM vm_resource_usage u
             JOIN vms v ON v.id = u.vm_id
             WHERE v.uuid = ?1
             ORDER BY u.id DESC
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![vm_id, limit], |row| row.get::<_, i64>(0))?;

        let mut values = rows
            .map(|r| r.map(|v| v.max(0) as u64))
            .collect::<Result<Vec<u64>, _>>()?;
        values.reverse();
        Ok(values)
    }
}
