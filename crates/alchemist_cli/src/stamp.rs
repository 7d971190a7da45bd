//! Timestamp records used by the smoke run.
//!
//! # Responsibility
//! - Map the `Stamp` domain value to its `stamps` table row.
//! - Expose create/get/update operations through a concrete repository.

use alchemist_core::{
    timestamp_from_row, timestamp_to_value, ColumnDef, ColumnRef, Context, Entity, Predicate,
    RepoResult, Repository, RepositoryBase, SqlType, SyncPolicy, UpdateValues,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use std::fmt::{Display, Formatter};

/// A recorded instant, optionally persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl Stamp {
    pub fn now() -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
        }
    }
}

impl Display for Stamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.timestamp.to_rfc3339())
    }
}

impl From<StampRow> for Stamp {
    fn from(row: StampRow) -> Self {
        Self {
            id: row.id,
            timestamp: row.timestamp,
        }
    }
}

/// Persisted form of `Stamp`.
#[derive(Debug, Clone)]
pub struct StampRow {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl StampRow {
    pub const TIMESTAMP: ColumnRef = ColumnRef::new("stamps", "timestamp");
}

impl From<&Stamp> for StampRow {
    fn from(stamp: &Stamp) -> Self {
        Self {
            id: stamp.id,
            timestamp: stamp.timestamp,
        }
    }
}

impl Entity for StampRow {
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

pub struct StampRepository {
    base: RepositoryBase,
}

impl Repository for StampRepository {
    fn instance(context: &Context) -> Self {
        Self {
            base: RepositoryBase::new(context).with_name("StampRepository"),
        }
    }

    fn base(&self) -> &RepositoryBase {
        &self.base
    }
}

impl StampRepository {
    /// Persists `stamp` in its own transaction and records the new id.
    pub fn create_stamp(&self, stamp: &mut Stamp) -> RepoResult<i64> {
        let mut row = StampRow::from(&*stamp);
        let id = self.base.create(&mut row, true)?;
        stamp.id = Some(id);
        Ok(id)
    }

    pub fn get_stamp_by_id(&self, id: i64) -> RepoResult<Option<Stamp>> {
        self.base.create_session()?;
        let query = self.base.read::<StampRow>()?;
        let loaded = query.with_session(&mut *self.base.session()?).get(id);
        self.base.close_session(true)?;
        Ok(loaded?.map(Stamp::from))
    }

    /// Moves the stamp `id` to `timestamp`; returns the number of rows changed.
    pub fn update_stamp_by_id(&self, id: i64, timestamp: DateTime<Utc>) -> RepoResult<usize> {
        self.base.create_session()?;
        let values = UpdateValues::new().set(StampRow::TIMESTAMP, timestamp_to_value(&timestamp));
        let query = self.base.update::<StampRow>(&values)?;
        let affected = query
            .filter(Predicate::equals(StampRow::PRIMARY_KEY, id))
            .with_session(&mut *self.base.session()?)
            .update(&values, SyncPolicy::Fetch);

        match affected {
            Ok(0) => {
                self.base.close_session(true)?;
                Ok(0)
            }
            Ok(count) => {
                self.base.commit_session()?;
                Ok(count)
            }
            Err(err) => {
                self.base.close_session(true)?;
                Err(err)
            }
        }
    }
}
