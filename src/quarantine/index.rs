//! Quarantine index using SQLite.
//!
//! Tracks every quarantine entry with its original path, detection info,
//! wrapped payload key and lifecycle state. At most one Active entry may
//! exist per original path; a partial unique index enforces it.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::core::error::{Error, Result};
use crate::core::types::Verdict;

const ENTRY_COLUMNS: &str = "id, uuid, original_path, payload_file, sha256, size, threat_name,
     verdict, score, state, quarantined_at, updated_at";

/// Lifecycle state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Active,
    Restored,
    Deleted,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Active => "active",
            EntryState::Restored => "restored",
            EntryState::Deleted => "deleted",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EntryState::Active),
            "restored" => Some(EntryState::Restored),
            "deleted" => Some(EntryState::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One quarantined file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    /// Monotonic entry id
    pub id: u64,
    pub uuid: String,
    /// Canonical path the file was taken from
    pub original_path: PathBuf,
    /// Payload filename inside the items directory
    pub payload_file: String,
    /// SHA-256 of the original content
    pub sha256: String,
    pub size: u64,
    pub threat_name: String,
    pub verdict: Verdict,
    pub score: u8,
    pub state: EntryState,
    pub quarantined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row data for a new Active entry.
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub uuid: &'a str,
    pub original_path: &'a Path,
    pub payload_file: &'a str,
    pub sha256: &'a str,
    pub size: u64,
    pub threat_name: &'a str,
    pub verdict: Verdict,
    pub score: u8,
    pub wrapped_key: &'a [u8],
}

/// Result of a check-and-insert.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(QuarantineEntry),
    /// An Active entry already existed for the path; nothing was written
    Existing(QuarantineEntry),
}

/// Entry counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineStats {
    pub active: u64,
    pub restored: u64,
    pub deleted: u64,
    /// Original bytes held by Active entries
    pub active_bytes: u64,
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(message),
    )
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<QuarantineEntry> {
    let verdict: String = row.get(7)?;
    let state: String = row.get(9)?;

    Ok(QuarantineEntry {
        id: row.get::<_, i64>(0)? as u64,
        uuid: row.get(1)?,
        original_path: PathBuf::from(row.get::<_, String>(2)?),
        payload_file: row.get(3)?,
        sha256: row.get(4)?,
        size: row.get::<_, i64>(5)? as u64,
        threat_name: row.get(6)?,
        verdict: Verdict::from_str(&verdict)
            .ok_or_else(|| conversion_error(7, format!("unknown verdict '{}'", verdict)))?,
        score: row.get::<_, i64>(8)?.clamp(0, 100) as u8,
        state: EntryState::from_str(&state)
            .ok_or_else(|| conversion_error(9, format!("unknown state '{}'", state)))?,
        quarantined_at: parse_timestamp(&row.get::<_, String>(10)?),
        updated_at: parse_timestamp(&row.get::<_, String>(11)?),
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Quarantine index database. The connection sits behind a mutex so that
/// check-and-insert is a single critical section.
pub struct QuarantineIndex {
    conn: Mutex<Connection>,
}

impl QuarantineIndex {
    /// Create or open the index database.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::DirectoryAccess {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let index = Self {
            conn: Mutex::new(conn),
        };
        index.initialize()?;
        Ok(index)
    }

    /// Create an in-memory database (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let index = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        index.initialize()?;
        Ok(index)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::lock_poisoned("quarantine index"))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                original_path TEXT NOT NULL,
                payload_file TEXT NOT NULL,
                sha256 TEXT NOT NULL,
                size INTEGER NOT NULL,
                threat_name TEXT NOT NULL,
                verdict TEXT NOT NULL,
                score INTEGER NOT NULL,
                wrapped_key BLOB NOT NULL,
                state TEXT NOT NULL DEFAULT 'active',
                quarantined_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_active_path
                ON entries(original_path) WHERE state = 'active';
            CREATE INDEX IF NOT EXISTS idx_entries_state ON entries(state);
            CREATE INDEX IF NOT EXISTS idx_entries_time ON entries(quarantined_at);",
        )?;
        Ok(())
    }

    /// The Active entry for a path, if any.
    pub fn find_active(&self, path: &Path) -> Result<Option<QuarantineEntry>> {
        let conn = self.conn()?;
        Self::find_active_in(&conn, path)
    }

    fn find_active_in(conn: &Connection, path: &Path) -> Result<Option<QuarantineEntry>> {
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {} FROM entries WHERE original_path = ?1 AND state = 'active'",
                    ENTRY_COLUMNS
                ),
                [path.to_string_lossy()],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn get_in(conn: &Connection, id: u64) -> Result<Option<QuarantineEntry>> {
        let entry = conn
            .query_row(
                &format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS),
                [id as i64],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Insert an Active entry unless one already exists for the path.
    pub fn insert_active(&self, new: &NewEntry<'_>) -> Result<InsertOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if let Some(existing) = Self::find_active_in(&tx, new.original_path)? {
            return Ok(InsertOutcome::Existing(existing));
        }

        let now = timestamp(Utc::now());
        let inserted = tx.execute(
            "INSERT INTO entries
             (uuid, original_path, payload_file, sha256, size, threat_name,
              verdict, score, wrapped_key, state, quarantined_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'active', ?10, ?10)",
            params![
                new.uuid,
                new.original_path.to_string_lossy(),
                new.payload_file,
                new.sha256,
                new.size as i64,
                new.threat_name,
                new.verdict.as_str(),
                new.score as i64,
                new.wrapped_key,
                now,
            ],
        );

        match inserted {
            Ok(_) => {}
            // Another process holding the same database won the race.
            Err(e) if is_constraint_violation(&e) => {
                drop(tx);
                return match Self::find_active_in(&conn, new.original_path)? {
                    Some(existing) => Ok(InsertOutcome::Existing(existing)),
                    None => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        }

        let id = tx.last_insert_rowid() as u64;
        let entry = Self::get_in(&tx, id)?
            .ok_or_else(|| Error::Internal(format!("inserted entry {} not readable", id)))?;
        tx.commit()?;
        Ok(InsertOutcome::Inserted(entry))
    }

    pub fn get(&self, id: u64) -> Result<Option<QuarantineEntry>> {
        let conn = self.conn()?;
        Self::get_in(&conn, id)
    }

    /// The wrapped payload key for an entry.
    pub fn wrapped_key(&self, id: u64) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let key = conn
            .query_row(
                "SELECT wrapped_key FROM entries WHERE id = ?1",
                [id as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key)
    }

    /// Move an entry from `from` to `to`. Returns false if the entry was not
    /// in state `from`.
    pub fn set_state(&self, id: u64, from: EntryState, to: EntryState) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE entries SET state = ?1, updated_at = ?2 WHERE id = ?3 AND state = ?4",
            params![to.as_str(), timestamp(Utc::now()), id as i64, from.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// Drop a row entirely. Only used to roll back a failed isolate.
    pub fn remove(&self, id: u64) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM entries WHERE id = ?1", [id as i64])?;
        Ok(rows > 0)
    }

    /// List entries, newest first, optionally restricted to one state.
    pub fn list(&self, state: Option<EntryState>) -> Result<Vec<QuarantineEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM entries WHERE (?1 IS NULL OR state = ?1) ORDER BY id DESC",
            ENTRY_COLUMNS
        ))?;

        let entries = stmt
            .query_map([state.map(|s| s.as_str())], entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Active entries quarantined at or before `cutoff`.
    pub fn active_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<QuarantineEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM entries WHERE state = 'active' AND quarantined_at <= ?1
             ORDER BY id",
            ENTRY_COLUMNS
        ))?;

        let entries = stmt
            .query_map([timestamp(cutoff)], entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn stats(&self) -> Result<QuarantineStats> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT state, COUNT(*), COALESCE(SUM(size), 0) FROM entries GROUP BY state",
        )?;

        let mut stats = QuarantineStats::default();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? as u64,
                row.get::<_, i64>(2)? as u64,
            ))
        })?;

        for row in rows {
            let (state, count, bytes) = row?;
            match EntryState::from_str(&state) {
                Some(EntryState::Active) => {
                    stats.active = count;
                    stats.active_bytes = bytes;
                }
                Some(EntryState::Restored) => stats.restored = count,
                Some(EntryState::Deleted) => stats.deleted = count,
                None => log::warn!("Quarantine index has {} rows in unknown state '{}'", count, state),
            }
        }

        Ok(stats)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, id: u64, when: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE entries SET quarantined_at = ?1 WHERE id = ?2",
            params![timestamp(when), id as i64],
        )?;
        Ok(())
    }
}
