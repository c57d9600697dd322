//! ==============================================================================
//! store.rs - persistence sink for accepted readings
//! ==============================================================================
//!
//! purpose:
//!     keyed insert + "since" range query. delivery into the sink is
//!     at-most-once: a failed insert is logged by the caller and the reading
//!     is gone.
//!
//! implementations:
//!     - MemoryStore: process-local, used when no db_file is configured
//!     - SqliteStore: rusqlite, one connection behind a mutex
//!
//! both are blocking; async callers go through spawn_blocking.
//!
//! ==============================================================================

use crate::domain::AtmosphericReading;
use crate::error::StorageError;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub trait ReadingSink: Send + Sync {
    fn record_reading(&self, reading: &AtmosphericReading, device_id: u8) -> Result<(), StorageError>;

    /// readings with timestamp within `since` of now, newest first
    fn recent_readings(&self, since: Duration) -> Result<Vec<AtmosphericReading>, StorageError>;
}

fn cutoff(since: Duration) -> i64 {
    chrono::Utc::now().timestamp() - since.as_secs() as i64
}

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<(u8, AtmosphericReading)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<(u8, AtmosphericReading)>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn by_device(&self, device_id: u8) -> Vec<AtmosphericReading> {
        self.rows().iter().filter(|(id, _)| *id == device_id).map(|(_, r)| *r).collect()
    }
}

impl ReadingSink for MemoryStore {
    fn record_reading(&self, reading: &AtmosphericReading, device_id: u8) -> Result<(), StorageError> {
        self.rows().push((device_id, *reading));
        Ok(())
    }

    fn recent_readings(&self, since: Duration) -> Result<Vec<AtmosphericReading>, StorageError> {
        let from = cutoff(since);
        let mut out: Vec<AtmosphericReading> =
            self.rows().iter().map(|(_, r)| *r).filter(|r| r.timestamp >= from).collect();
        // stable sort keeps insertion order reversed for equal timestamps
        out.reverse();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StorageError::BlankPath);
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS readings (
                id          INTEGER NOT NULL PRIMARY KEY,
                ts          INTEGER NOT NULL,
                device_id   INTEGER NOT NULL,
                temperature REAL,
                humidity    REAL,
                pressure    REAL,
                altitude    REAL,
                voc_index   REAL
            );
            CREATE INDEX IF NOT EXISTS idx_readings_timestamp ON readings(ts);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReadingSink for SqliteStore {
    fn record_reading(&self, reading: &AtmosphericReading, device_id: u8) -> Result<(), StorageError> {
        tracing::debug!(?reading, device_id, "db: record atmospheric reading");
        self.conn()
            .prepare_cached(
                "INSERT INTO readings (ts, device_id, temperature, humidity, pressure, altitude, voc_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?
            .execute(params![
                reading.timestamp,
                device_id,
                reading.temperature,
                reading.humidity,
                reading.pressure,
                reading.altitude,
                reading.voc_index,
            ])?;
        Ok(())
    }

    fn recent_readings(&self, since: Duration) -> Result<Vec<AtmosphericReading>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT ts, temperature, humidity, pressure, altitude, voc_index
             FROM readings WHERE ts >= ?1 ORDER BY ts DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![cutoff(since)], |row| {
            Ok(AtmosphericReading {
                timestamp: row.get(0)?,
                temperature: row.get::<_, Option<f32>>(1)?.unwrap_or_default(),
                humidity: row.get::<_, Option<f32>>(2)?.unwrap_or_default(),
                pressure: row.get::<_, Option<f32>>(3)?.unwrap_or_default(),
                altitude: row.get::<_, Option<f32>>(4)?.unwrap_or_default(),
                voc_index: row.get::<_, Option<f32>>(5)?.unwrap_or_default(),
            })
        })?;
        let readings = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(age_secs: i64, temperature: f32) -> AtmosphericReading {
        AtmosphericReading {
            timestamp: chrono::Utc::now().timestamp() - age_secs,
            temperature,
            humidity: 40.0,
            pressure: 1013.0,
            altitude: 120.0,
            voc_index: 90.0,
        }
    }

    fn exercise(sink: &dyn ReadingSink) {
        sink.record_reading(&reading(7200, 1.0), 1).unwrap();
        sink.record_reading(&reading(10, 2.0), 1).unwrap();
        sink.record_reading(&reading(60, 3.0), 2).unwrap();
        sink.record_reading(&reading(3 * 86_400, 4.0), 2).unwrap();

        let recent = sink.recent_readings(Duration::from_secs(86_400)).unwrap();
        let temps: Vec<f32> = recent.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![2.0, 3.0, 1.0]);

        assert!(sink.recent_readings(Duration::from_secs(1)).unwrap().is_empty());
    }

    #[test]
    fn memory_store_newest_first() {
        let store = MemoryStore::new();
        exercise(&store);
        assert_eq!(store.len(), 4);
        assert_eq!(store.by_device(2).len(), 2);
    }

    #[test]
    fn sqlite_store_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        exercise(&store);
    }

    #[test]
    fn sqlite_store_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.record_reading(&reading(5, 21.5), 3).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let back = store.recent_readings(Duration::from_secs(60)).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].temperature, 21.5);
    }

    #[test]
    fn blank_path_is_rejected() {
        assert!(matches!(SqliteStore::open(""), Err(StorageError::BlankPath)));
    }
}
