//! SQLite-based journey storage.
//!
//! A journey is written once, at the point the user leaves the debrief
//! screen or, for journeys without a debrief, as soon as it ends.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use super::{data_dir, migrations};
use crate::error::{CoreError, DatabaseError, RecorderError};
use crate::journey::{DebriefLog, EndReason, Journey, JourneySummary, StateLog};

/// Sink for finished journeys.
pub trait JourneyRecorder: Send + Sync {
    /// Store a finished journey.
    ///
    /// # Errors
    /// `AlreadyRecorded` if a journey with the same id exists; storage
    /// failures otherwise.
    fn persist(&self, journey: &Journey) -> Result<(), RecorderError>;
}

/// Journey store backed by `~/.config/fieldcue/fieldcue.db`.
pub struct SqliteJourneyStore {
    conn: Mutex<Connection>,
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn read_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn read_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn read_reason(row: &Row<'_>, idx: usize) -> rusqlite::Result<EndReason> {
    let raw: String = row.get(idx)?;
    EndReason::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown end reason '{raw}'").into(),
        )
    })
}

impl SqliteJourneyStore {
    /// Open the store in the data directory.
    ///
    /// # Errors
    /// Returns an error if the data directory or database cannot be
    /// opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("fieldcue.db");
        Ok(Self::open_at(&path)?)
    }

    /// Open the store at an explicit path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init(conn)
    }

    /// Open an in-memory store.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Locked)
    }

    /// Load one journey with its state logs and debrief answers.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored row is malformed.
    pub fn get(&self, id: Uuid) -> Result<Option<Journey>, RecorderError> {
        let conn = self.lock()?;
        let key = id.to_string();

        let head = conn
            .query_row(
                "SELECT scene_name, start_time, end_time, duration_ms, end_reason, debrief_json
                 FROM journeys WHERE id = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        read_time(row, 1)?,
                        read_time(row, 2)?,
                        row.get::<_, i64>(3)?,
                        read_reason(row, 4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((scene_name, start_time, end_time, duration_ms, end_reason, debrief_json)) = head
        else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT state_name, start_time, end_time, duration_ms
             FROM state_logs WHERE journey_id = ?1 ORDER BY seq",
        )?;
        let state_logs = stmt
            .query_map(params![key], |row| {
                Ok(StateLog {
                    state_name: row.get(0)?,
                    start_time: read_time(row, 1)?,
                    end_time: read_time(row, 2)?,
                    duration_ms: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let debrief_log = debrief_json
            .map(|json| serde_json::from_str::<DebriefLog>(&json))
            .transpose()?;

        Ok(Some(Journey {
            id,
            scene_name,
            start_time,
            end_time,
            duration_ms,
            end_reason,
            state_logs,
            debrief_log,
        }))
    }

    /// Most recent journeys first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn list(&self, limit: usize) -> Result<Vec<JourneySummary>, RecorderError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT j.id, j.scene_name, j.start_time, j.duration_ms, j.end_reason,
                    j.debrief_json IS NOT NULL,
                    (SELECT COUNT(*) FROM state_logs s WHERE s.journey_id = j.id)
             FROM journeys j
             ORDER BY j.start_time DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(JourneySummary {
                    id: read_uuid(row, 0)?,
                    scene_name: row.get(1)?,
                    start_time: read_time(row, 2)?,
                    duration_ms: row.get(3)?,
                    end_reason: read_reason(row, 4)?,
                    has_debrief: row.get(5)?,
                    state_count: row.get::<_, i64>(6)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Remove a journey. Returns whether it existed.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub fn delete(&self, id: Uuid) -> Result<bool, RecorderError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let key = id.to_string();
        tx.execute("DELETE FROM state_logs WHERE journey_id = ?1", params![key])?;
        let removed = tx.execute("DELETE FROM journeys WHERE id = ?1", params![key])?;
        tx.commit()?;
        Ok(removed > 0)
    }
}

impl JourneyRecorder for SqliteJourneyStore {
    fn persist(&self, journey: &Journey) -> Result<(), RecorderError> {
        let debrief_json = journey
            .debrief_log
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let key = journey.id.to_string();

        let exists = tx
            .query_row("SELECT 1 FROM journeys WHERE id = ?1", params![key], |_| {
                Ok(())
            })
            .optional()?
            .is_some();
        if exists {
            return Err(RecorderError::AlreadyRecorded(key));
        }

        tx.execute(
            "INSERT INTO journeys
                (id, scene_name, start_time, end_time, duration_ms, end_reason, debrief_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key,
                journey.scene_name,
                timestamp(&journey.start_time),
                timestamp(&journey.end_time),
                journey.duration_ms,
                journey.end_reason.as_str(),
                debrief_json,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO state_logs
                    (journey_id, seq, state_name, start_time, end_time, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (seq, log) in journey.state_logs.iter().enumerate() {
                stmt.execute(params![
                    key,
                    seq as i64,
                    log.state_name,
                    timestamp(&log.start_time),
                    timestamp(&log.end_time),
                    log.duration_ms,
                ])?;
            }
        }
        tx.commit()?;

        info!(
            journey_id = %journey.id,
            scene = %journey.scene_name,
            states = journey.state_logs.len(),
            reason = journey.end_reason.as_str(),
            "journey recorded"
        );
        Ok(())
    }
}
