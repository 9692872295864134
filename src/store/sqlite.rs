//! SQLite configuration store: `system_config` table in a WAL-mode database.
//!
//! A single connection is shared behind a mutex; writes that span several keys
//! run inside one transaction so partial batches never become visible.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Weak;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};

use crate::core::errors::{FapError, Result};
use crate::store::{ConfigEntry, ConfigStore, ObserverList, StoreObserver};

/// Durable settings store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    observers: ObserverList,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FapError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            observers: ObserverList::new(),
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS system_config (
            key         TEXT PRIMARY KEY NOT NULL,
            value       TEXT NOT NULL,
            description TEXT,
            updated_by  TEXT,
            updated_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<ConfigEntry> {
    let raw_ts: String = row.get(4)?;
    let updated_at = DateTime::parse_from_rfc3339(&raw_ts)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(ConfigEntry {
        key: row.get(0)?,
        value: row.get(1)?,
        description: row.get(2)?,
        updated_by: row.get(3)?,
        updated_at,
    })
}

const SELECT_ONE: &str = "SELECT key, value, description, updated_by, updated_at
     FROM system_config WHERE key = ?1";

fn upsert_on(
    conn: &Connection,
    key: &str,
    value: &str,
    description: Option<&str>,
    updated_by: &str,
) -> Result<ConfigEntry> {
    conn.prepare_cached(
        "INSERT INTO system_config (key, value, description, updated_by, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             description = COALESCE(excluded.description, system_config.description),
             updated_by = excluded.updated_by,
             updated_at = excluded.updated_at",
    )?
    .execute(params![key, value, description, updated_by, format_ts(Utc::now())])?;

    conn.prepare_cached(SELECT_ONE)?
        .query_row(params![key], row_to_entry)
        .map_err(FapError::from)
}

impl ConfigStore for SqliteStore {
    fn get_all(&self) -> Result<Vec<ConfigEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT key, value, description, updated_by, updated_at
             FROM system_config ORDER BY key",
        )?;
        let rows = stmt
            .query_map([], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn get(&self, key: &str) -> Result<Option<ConfigEntry>> {
        let conn = self.conn.lock();
        let entry = conn
            .prepare_cached(SELECT_ONE)?
            .query_row(params![key], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    fn upsert(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        updated_by: &str,
    ) -> Result<ConfigEntry> {
        let entry = {
            let conn = self.conn.lock();
            upsert_on(&conn, key, value, description, updated_by)?
        };
        self.observers.notify(std::slice::from_ref(&entry));
        Ok(entry)
    }

    fn update(&self, key: &str, value: &str, updated_by: &str) -> Result<Option<ConfigEntry>> {
        let entry = {
            let conn = self.conn.lock();
            let changed = conn
                .prepare_cached(
                    "UPDATE system_config
                     SET value = ?2, updated_by = ?3, updated_at = ?4
                     WHERE key = ?1",
                )?
                .execute(params![key, value, updated_by, format_ts(Utc::now())])?;
            if changed == 0 {
                return Ok(None);
            }
            conn.prepare_cached(SELECT_ONE)?
                .query_row(params![key], row_to_entry)?
        };
        self.observers.notify(std::slice::from_ref(&entry));
        Ok(Some(entry))
    }

    fn upsert_many(&self, pairs: &[(&str, &str)], updated_by: &str) -> Result<Vec<ConfigEntry>> {
        let written = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let mut written = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                written.push(upsert_on(&tx, key, value, None, updated_by)?);
            }
            tx.commit()?;
            written
        };
        self.observers.notify(&written);
        Ok(written)
    }

    fn subscribe(&self, observer: Weak<dyn StoreObserver>) {
        self.observers.add(observer);
    }
}
