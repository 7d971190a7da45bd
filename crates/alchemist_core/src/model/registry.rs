//! Static registry of declarative entities.
//!
//! # Responsibility
//! - Map entity types to validated table schemas.
//! - Materialize registered tables (`create_tables`).
//!
//! # Invariants
//! - Table and column identifiers match `[A-Za-z_][A-Za-z0-9_]*`.
//! - Table names are unique across the registry.
//! - Each schema has exactly one integer primary key, named by
//!   `Entity::PRIMARY_KEY`.

use super::{quote_ident, ColumnDef, Entity, SqlType};
use crate::db::DbResult;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;
use std::any::{type_name, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Schema registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidIdentifier(String),
    DuplicateTable(&'static str),
    DuplicateColumn {
        table: &'static str,
        column: &'static str,
    },
    /// `PRIMARY_KEY` does not name a column flagged as primary key.
    MissingPrimaryKey {
        table: &'static str,
        column: &'static str,
    },
    MultiplePrimaryKeys(&'static str),
    NonIntegerPrimaryKey {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier(name) => write!(f, "invalid SQL identifier `{name}`"),
            Self::DuplicateTable(table) => write!(f, "table `{table}` is already registered"),
            Self::DuplicateColumn { table, column } => {
                write!(f, "table `{table}` declares column `{column}` twice")
            }
            Self::MissingPrimaryKey { table, column } => write!(
                f,
                "table `{table}` has no primary key column named `{column}`"
            ),
            Self::MultiplePrimaryKeys(table) => {
                write!(f, "table `{table}` declares more than one primary key")
            }
            Self::NonIntegerPrimaryKey { table, column } => write!(
                f,
                "primary key `{column}` of table `{table}` must be INTEGER"
            ),
        }
    }
}

impl Error for RegistryError {}

/// Validated table metadata for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: &'static str,
    primary_key: &'static str,
    columns: &'static [ColumnDef],
    entity: &'static str,
}

impl TableSchema {
    /// Builds and validates the schema declared by `E`.
    pub fn of<E: Entity>() -> Result<Self, RegistryError> {
        ensure_identifier(E::TABLE)?;

        let mut seen = BTreeSet::new();
        let mut primary_keys = 0usize;
        for column in E::COLUMNS {
            ensure_identifier(column.name)?;
            if !seen.insert(column.name) {
                return Err(RegistryError::DuplicateColumn {
                    table: E::TABLE,
                    column: column.name,
                });
            }
            if column.primary_key {
                primary_keys += 1;
            }
        }
        if primary_keys > 1 {
            return Err(RegistryError::MultiplePrimaryKeys(E::TABLE));
        }

        let primary = E::COLUMNS
            .iter()
            .find(|column| column.primary_key && column.name == E::PRIMARY_KEY)
            .ok_or(RegistryError::MissingPrimaryKey {
                table: E::TABLE,
                column: E::PRIMARY_KEY,
            })?;
        if primary.sql_type != SqlType::Integer {
            return Err(RegistryError::NonIntegerPrimaryKey {
                table: E::TABLE,
                column: primary.name,
            });
        }

        Ok(Self {
            table: E::TABLE,
            primary_key: E::PRIMARY_KEY,
            columns: E::COLUMNS,
            entity: type_name::<E>(),
        })
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn primary_key(&self) -> &'static str {
        self.primary_key
    }

    pub fn columns(&self) -> &'static [ColumnDef] {
        self.columns
    }

    /// Rust type name of the mapped entity.
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn column(&self, name: &str) -> Option<&'static ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this schema.
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let mut definition =
                    format!("{} {}", quote_ident(column.name), column.sql_type.declared_type());
                if column.primary_key {
                    definition.push_str(" PRIMARY KEY");
                } else if !column.nullable {
                    definition.push_str(" NOT NULL");
                }
                definition
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({columns});",
            quote_ident(self.table)
        )
    }
}

/// Set of entity types a repository may operate on.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<TypeId, Arc<TableSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one entity type.
    pub fn register<E: Entity>(&mut self) -> Result<(), RegistryError> {
        let schema = TableSchema::of::<E>()?;
        let duplicate = self.schemas.contains_key(&TypeId::of::<E>())
            || self
                .schemas
                .values()
                .any(|existing| existing.table == schema.table);
        if duplicate {
            return Err(RegistryError::DuplicateTable(schema.table));
        }

        self.schemas.insert(TypeId::of::<E>(), Arc::new(schema));
        Ok(())
    }

    /// Chaining form of `register`.
    pub fn with<E: Entity>(mut self) -> Result<Self, RegistryError> {
        self.register::<E>()?;
        Ok(self)
    }

    pub fn contains<E: Entity>(&self) -> bool {
        self.schemas.contains_key(&TypeId::of::<E>())
    }

    pub fn schema_of<E: Entity>(&self) -> Option<Arc<TableSchema>> {
        self.schemas.get(&TypeId::of::<E>()).cloned()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Registered schemas ordered by table name.
    pub fn schemas(&self) -> Vec<Arc<TableSchema>> {
        let mut schemas: Vec<_> = self.schemas.values().cloned().collect();
        schemas.sort_by_key(|schema| schema.table);
        schemas
    }
}

/// Creates every registered table that does not exist yet, atomically.
pub fn create_tables(conn: &Connection, registry: &SchemaRegistry) -> DbResult<()> {
    let tx = conn.unchecked_transaction()?;
    for schema in registry.schemas() {
        tx.execute_batch(&schema.create_table_sql())?;
    }
    tx.commit()?;

    info!(
        "event=create_tables module=model status=ok tables={}",
        registry.len()
    );
    Ok(())
}

fn ensure_identifier(name: &str) -> Result<(), RegistryError> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(RegistryError::InvalidIdentifier(name.to_string()))
    }
}
