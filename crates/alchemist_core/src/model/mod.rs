//! Declarative entity contracts and static schema metadata.
//!
//! # Responsibility
//! - Define how a record type maps onto one table (`Entity`).
//! - Describe columns statically so validation never needs reflection.
//!
//! # Invariants
//! - Every entity has exactly one `INTEGER` primary key column.
//! - Identifiers placed into SQL come from this metadata and are quoted.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::Row;

mod registry;

pub use registry::{create_tables, RegistryError, SchemaRegistry, TableSchema};

/// Storage class of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Blob,
    /// Stored as `0`/`1`.
    Boolean,
    /// Stored as RFC 3339 text in UTC.
    Timestamp,
}

impl SqlType {
    /// Declared column type used in DDL.
    pub fn declared_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text | Self::Timestamp => "TEXT",
            Self::Blob => "BLOB",
        }
    }
}

/// Static metadata for one mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDef {
    /// Non-null data column.
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            nullable: false,
            primary_key: false,
        }
    }

    /// Integer primary key column (SQLite rowid alias).
    pub const fn primary_key(name: &'static str) -> Self {
        Self {
            name,
            sql_type: SqlType::Integer,
            nullable: false,
            primary_key: true,
        }
    }

    pub const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }
}

/// Typed reference to a column of one table.
///
/// Used as an update key or predicate target; resolved against the schema
/// registry before any SQL is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: &'static str,
    pub name: &'static str,
}

impl ColumnRef {
    pub const fn new(table: &'static str, name: &'static str) -> Self {
        Self { table, name }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}

/// A record type mapped onto one table.
///
/// Implementations describe their table statically; a type only becomes
/// usable through a repository after it is registered in a
/// `SchemaRegistry`.
pub trait Entity: Sized + 'static {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str;
    /// All columns, primary key included.
    const COLUMNS: &'static [ColumnDef];

    /// `None` until the row has been inserted.
    fn primary_key(&self) -> Option<i64>;
    fn set_primary_key(&mut self, id: i64);
    /// Data column values, primary key excluded.
    fn values(&self) -> Vec<(&'static str, Value)>;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Typed reference to one of this entity's columns.
    fn column(name: &'static str) -> ColumnRef {
        ColumnRef::new(Self::TABLE, name)
    }
}

/// Quotes an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Converts a timestamp into its stored representation.
pub fn timestamp_to_value(timestamp: &DateTime<Utc>) -> Value {
    Value::Text(timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Reads a `SqlType::Timestamp` column by name.
pub fn timestamp_from_row(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let index = row.as_ref().column_index(column)?;
    let text: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}
