use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::backend::{DiffStore, StateStore};
use super::models::{InstanceState, ResourceState};
use super::schema;
use crate::planner::diff::InstanceDiff;

/// SQLite-backed state and diff store for local, single-user workflows.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the SQLite state database.
    pub fn open(db_path: &str) -> Result<Self> {
        let parent = Path::new(db_path).parent();
        if let Some(dir) = parent {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open state database at {}", db_path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create tables and record the schema version.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(schema::CREATE_TABLES_SQL)?;
        conn.execute_batch(schema::CREATE_INDEXES_SQL)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
            params![schema::SCHEMA_VERSION, Self::now(), "Initial schema"],
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("state database connection poisoned"))
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}

#[async_trait]
impl StateStore for SqliteBackend {
    async fn get_resource(&self, id: &str) -> Result<Option<ResourceState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT resource_type, provider, dependencies_json, primary_json, deposed_json
                 FROM resources WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|r| resource_from_columns(id, r)).transpose()
    }

    async fn put_resource(&self, id: &str, resource: &ResourceState) -> Result<()> {
        let conn = self.conn()?;
        if resource.is_vacant() {
            conn.execute("DELETE FROM resources WHERE id = ?1", params![id])?;
            return Ok(());
        }

        let primary_json = resource
            .primary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO resources (id, resource_type, provider, dependencies_json,
                primary_json, deposed_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                resource_type = excluded.resource_type,
                provider = excluded.provider,
                dependencies_json = excluded.dependencies_json,
                primary_json = excluded.primary_json,
                deposed_json = excluded.deposed_json,
                updated_at = excluded.updated_at",
            params![
                id,
                resource.resource_type,
                resource.provider,
                serde_json::to_string(&resource.dependencies)?,
                primary_json,
                serde_json::to_string(&resource.deposed)?,
                Self::now(),
            ],
        )?;
        Ok(())
    }

    async fn list_states(&self) -> Result<Vec<(String, ResourceState)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, resource_type, provider, dependencies_json, primary_json, deposed_json
             FROM resources ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    (
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, cols)| {
                let resource = resource_from_columns(&id, cols)?;
                Ok::<_, anyhow::Error>((id, resource))
            })
            .collect()
    }
}

#[async_trait]
impl DiffStore for SqliteBackend {
    async fn read_diff(&self, id: &str) -> Result<Option<InstanceDiff>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT diff_json FROM diffs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| {
            serde_json::from_str(&j).with_context(|| format!("Corrupt diff stored for {}", id))
        })
        .transpose()
    }

    async fn write_diff(&self, id: &str, diff: Option<&InstanceDiff>) -> Result<()> {
        let conn = self.conn()?;
        match diff {
            Some(diff) => {
                conn.execute(
                    "INSERT INTO diffs (id, diff_json, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET
                        diff_json = excluded.diff_json,
                        updated_at = excluded.updated_at",
                    params![id, serde_json::to_string(diff)?, Self::now()],
                )?;
            }
            None => {
                conn.execute("DELETE FROM diffs WHERE id = ?1", params![id])?;
            }
        }
        Ok(())
    }

    async fn list_diffs(&self) -> Result<Vec<(String, InstanceDiff)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, diff_json FROM diffs ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, json)| {
                let diff = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt diff stored for {}", id))?;
                Ok::<_, anyhow::Error>((id, diff))
            })
            .collect()
    }
}

type ResourceColumns = (String, String, String, Option<String>, String);

fn resource_from_columns(id: &str, cols: ResourceColumns) -> Result<ResourceState> {
    let (resource_type, provider, deps_json, primary_json, deposed_json) = cols;
    let primary: Option<InstanceState> = primary_json
        .map(|j| serde_json::from_str(&j))
        .transpose()
        .with_context(|| format!("Corrupt primary instance stored for {}", id))?;
    let deposed: Vec<InstanceState> = serde_json::from_str(&deposed_json)
        .with_context(|| format!("Corrupt deposed instances stored for {}", id))?;
    let dependencies: Vec<String> = serde_json::from_str(&deps_json)
        .with_context(|| format!("Corrupt dependency list stored for {}", id))?;

    Ok(ResourceState {
        resource_type,
        provider,
        dependencies,
        primary,
        deposed,
    })
}
