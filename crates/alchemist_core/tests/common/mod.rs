#![allow(dead_code)]

use alchemist_core::{
    timestamp_from_row, timestamp_to_value, ColumnDef, ColumnRef, Context, DatabaseSettings,
    DbError, DbResult, Entity, RepositoryBase, SchemaRegistry, Session, SessionFactory, Settings,
    SqlType,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use std::sync::Arc;
use tempfile::TempDir;

/// Row with an integer id and a timezone-aware timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl Stamp {
    pub const TIMESTAMP: ColumnRef = ColumnRef::new("stamps", "timestamp");

    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            timestamp,
        }
    }
}

impl Entity for Stamp {
    const TABLE: &'static str = "stamps";
    const PRIMARY_KEY: &'static str = "id";
    const COLUMNS: &'static [ColumnDef] = &[
        ColumnDef::primary_key("id"),
        ColumnDef::new("timestamp", SqlType::Timestamp),
    ];

    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn set_primary_key(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![("timestamp", timestamp_to_value(&self.timestamp))]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get("id")?),
            timestamp: timestamp_from_row(row, "timestamp")?,
        })
    }
}

/// Entity that is never registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ghost {
    pub id: Option<i64>,
}

impl Entity for Ghost {
    const TABLE: &'static str = "ghosts";
    const PRIMARY_KEY: &'static str = "id";
    const COLUMNS: &'static [ColumnDef] = &[ColumnDef::primary_key("id")];

    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn set_primary_key(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get("id")?),
        })
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()
}

pub fn t1() -> DateTime<Utc> {
    t0() + Duration::milliseconds(90_061_250)
}

fn registry() -> SchemaRegistry {
    SchemaRegistry::new().with::<Stamp>().unwrap()
}

/// In-memory context with the `stamps` table created.
pub fn memory_context() -> Context {
    let context = Context::new(Settings::default(), registry()).unwrap();
    context.create_tables().unwrap();
    context
}

/// WAL file context with the `stamps` table created; keep the dir alive.
pub fn file_context() -> (TempDir, Context) {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new(DatabaseSettings::sqlite_file(dir.path().join("stamps.db")));
    let context = Context::new(settings, registry()).unwrap();
    context.create_tables().unwrap();
    (dir, context)
}

/// Committed row count seen by a fresh connection.
pub fn committed_count(context: &Context) -> i64 {
    context
        .engine()
        .open_connection()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM stamps;", [], |row| row.get(0))
        .unwrap()
}

/// Adds `parents`/`children` tables whose foreign key is only checked at
/// commit time.
pub fn add_deferred_foreign_key_tables(context: &Context) {
    context
        .engine()
        .open_connection()
        .unwrap()
        .execute_batch(
            "CREATE TABLE parents (id INTEGER PRIMARY KEY);
             CREATE TABLE children (
                 id INTEGER PRIMARY KEY,
                 parent_id INTEGER NOT NULL
                     REFERENCES parents(id) DEFERRABLE INITIALLY DEFERRED
             );",
        )
        .unwrap();
}

/// Factory whose sessions can never be opened.
pub struct FailingFactory;

impl SessionFactory for FailingFactory {
    fn create_session(&self) -> DbResult<Session> {
        Err(DbError::InvalidData("connection refused".to_string()))
    }
}

/// Repository over `context`'s registry that cannot open sessions.
pub fn unreachable_repo(context: &Context) -> RepositoryBase {
    RepositoryBase::from_parts(context.registry().clone(), Arc::new(FailingFactory))
}
