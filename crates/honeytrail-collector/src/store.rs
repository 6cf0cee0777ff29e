use chrono::{DateTime, SecondsFormat, Utc};
use honeytrail_core::{Event, StoreError};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS events (
        id           TEXT PRIMARY KEY,
        timestamp    TEXT NOT NULL,
        session_id   TEXT,
        src_ip       TEXT NOT NULL,
        src_port     INTEGER,
        dest_service TEXT,
        username     TEXT,
        command      TEXT,
        metadata     TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp);
";

/// Fixed-width UTC form, so string order in SQLite is chronological order
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// SQLite-backed event storage.
///
/// The connection is opened once and shared; clones refer to the same database.
#[derive(Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
}

impl EventStore {
    /// Open (or create) the database file at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_error)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "Event store opened");
        Ok(store)
    }

    /// Private database that disappears with the store
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(db_error)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(db_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Persist one event
    pub fn insert(&self, event: &Event) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events
                (id, timestamp, session_id, src_ip, src_port, dest_service, username, command, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id,
                format_timestamp(&event.timestamp),
                event.session_id,
                event.src_ip,
                event.src_port,
                event.dest_service,
                event.username,
                event.command,
                event.metadata,
            ],
        )
        .map_err(db_error)?;
        Ok(())
    }

    /// Up to `limit` events, newest timestamp first; ties go to the later insert
    pub fn recent(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, session_id, src_ip, src_port, dest_service, username, command, metadata
                 FROM events
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT ?1",
            )
            .map_err(db_error)?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], read_row)
            .map_err(db_error)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(db_error)??);
        }
        Ok(events)
    }

    /// Number of stored events
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }
}

fn db_error(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Column decoding errors surface as SQLite errors; value checks as corrupt rows
fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<Event, StoreError>> {
    let id: String = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let src_port: Option<i64> = row.get(4)?;

    let timestamp = match DateTime::parse_from_rfc3339(&timestamp) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(e) => {
            return Ok(Err(StoreError::CorruptRow {
                id,
                message: format!("bad timestamp '{}': {}", timestamp, e),
            }))
        }
    };
    let src_port = match src_port.map(u16::try_from).transpose() {
        Ok(port) => port,
        Err(e) => {
            return Ok(Err(StoreError::CorruptRow {
                id,
                message: format!("bad src_port: {}", e),
            }))
        }
    };

    Ok(Ok(Event {
        id,
        timestamp,
        session_id: row.get(2)?,
        src_ip: row.get(3)?,
        src_port,
        dest_service: row.get(5)?,
        username: row.get(6)?,
        command: row.get(7)?,
        metadata: row.get(8)?,
    }))
}
