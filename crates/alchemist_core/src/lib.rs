//! Session lifecycle and transaction scoping over SQLite.
//!
//! A `Context` owns the engine and the registry of declarative entities; a
//! `RepositoryBase` mediates CRUD access to those entities through local,
//! scoped (per-thread) or transactional sessions.

pub mod config;
pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;

pub use config::{ConfigError, DatabaseSettings, EngineOptions, JournalMode, Settings};
pub use context::Context;
pub use db::{DbError, DbResult, Engine, RowKey, Session, SessionFactory, SessionId};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::{
    timestamp_from_row, timestamp_to_value, ColumnDef, ColumnRef, Entity, RegistryError,
    SchemaRegistry, SqlType, TableSchema,
};
pub use repo::{
    BoundQuery, ColumnKey, CompareOp, Predicate, Query, RepoError, RepoErrorKind, RepoResult,
    Repository, RepositoryBase, ScopedSession, ScopedSessionRegistry, SyncPolicy, UpdateValues,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
