//! Connection engine for configured SQLite targets.
//!
//! # Responsibility
//! - Open file or scratch SQLite connections from `Settings`.
//! - Apply per-connection pragmas before a connection is handed out.
//! - Act as the session factory for contexts and repositories.
//!
//! # Invariants
//! - Returned connections honor `EngineOptions` (foreign keys, busy timeout,
//!   journal mode).
//! - All connections of one in-memory engine see the same database, and no
//!   other engine sees it.
//! - Connections never use shared-cache mode, so concurrent sessions follow
//!   the journal's file locking and honor the busy timeout.

use super::session::{Session, SessionFactory};
use super::DbResult;
use crate::config::{EngineOptions, Settings};
use crate::logging::sanitize_error;
use log::{debug, error, info};
use rusqlite::Connection;
use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;

const SCRATCH_PREFIX: &str = "alchemist-";
const SCRATCH_DATABASE: &str = "memory.db";

/// Opens bootstrapped SQLite connections for one configured database.
pub struct Engine {
    settings: Settings,
    path: PathBuf,
    // Holds an in-memory engine's database; removed when the engine drops.
    scratch: Option<TempDir>,
}

impl Engine {
    /// Validates `settings` and prepares the engine.
    ///
    /// In-memory engines get a private database in a scratch directory that
    /// lives exactly as long as the engine. Open sessions keep working on
    /// their connection until they close.
    ///
    /// # Errors
    /// - `DbError::Config` for invalid settings.
    /// - `DbError::Io` when the scratch directory cannot be created.
    pub fn connect(settings: Settings) -> DbResult<Self> {
        settings.validate()?;

        let (path, scratch) = if settings.database.is_memory() {
            let dir = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir()?;
            (dir.path().join(SCRATCH_DATABASE), Some(dir))
        } else {
            (PathBuf::from(settings.database.database.trim()), None)
        };

        let engine = Self {
            settings,
            path,
            scratch,
        };
        info!(
            "event=engine_connect module=db status=ok mode={} url={}",
            engine.mode(),
            engine.url()
        );
        Ok(engine)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Database URL with the password masked.
    pub fn url(&self) -> String {
        self.settings.database.url()
    }

    pub fn is_memory(&self) -> bool {
        self.scratch.is_some()
    }

    /// On-disk location of the database, scratch file included.
    pub fn database_path(&self) -> &Path {
        &self.path
    }

    fn mode(&self) -> &'static str {
        if self.is_memory() {
            "memory"
        } else {
            "file"
        }
    }

    /// Opens and bootstraps a new connection.
    ///
    /// # Side effects
    /// - Emits `db_open` events with duration and status.
    pub fn open_connection(&self) -> DbResult<Connection> {
        let started_at = Instant::now();
        let mode = self.mode();
        debug!("event=db_open module=db status=start mode={mode}");

        let conn = match Connection::open(&self.path) {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                    mode,
                    started_at.elapsed().as_millis(),
                    sanitize_error(&err)
                );
                return Err(err.into());
            }
        };

        match bootstrap_connection(&conn, &self.settings.engine) {
            Ok(()) => {
                debug!(
                    "event=db_open module=db status=ok mode={} duration_ms={}",
                    mode,
                    started_at.elapsed().as_millis()
                );
                Ok(conn)
            }
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                    mode,
                    started_at.elapsed().as_millis(),
                    sanitize_error(&err)
                );
                Err(err)
            }
        }
    }
}

impl SessionFactory for Engine {
    fn create_session(&self) -> DbResult<Session> {
        Ok(Session::new(self.open_connection()?))
    }
}

impl Display for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Engine({})", self.url())
    }
}

impl Debug for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("url", &self.url())
            .field("mode", &self.mode())
            .field("path", &self.path)
            .field("engine", &self.settings.engine)
            .finish()
    }
}

fn bootstrap_connection(conn: &Connection, options: &EngineOptions) -> DbResult<()> {
    if options.foreign_keys {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    }
    conn.busy_timeout(options.busy_timeout())?;
    let applied: String = conn.pragma_update_and_check(
        None,
        "journal_mode",
        options.journal_mode.as_pragma(),
        |row| row.get(0),
    )?;
    debug!("event=db_pragma module=db status=ok journal_mode={applied}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Engine;
    use crate::config::{DatabaseSettings, JournalMode, Settings};
    use crate::db::{DbError, SessionFactory};

    #[test]
    fn file_engine_applies_journal_mode_and_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let engine =
            Engine::connect(Settings::new(DatabaseSettings::sqlite_file(dir.path().join("a.db"))))
                .unwrap();
        assert!(!engine.is_memory());

        let conn = engine.open_connection().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_ascii_uppercase(), JournalMode::Wal.as_pragma());
        let foreign_keys: i64 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn memory_engine_connections_share_one_database() {
        let engine = Engine::connect(Settings::default()).unwrap();
        assert!(engine.is_memory());

        let writer = engine.open_connection().unwrap();
        writer
            .execute_batch("CREATE TABLE probe (id INTEGER PRIMARY KEY); INSERT INTO probe DEFAULT VALUES;")
            .unwrap();

        let reader = engine.create_session().unwrap();
        assert!(reader.is_open());
        let other = engine.open_connection().unwrap();
        let count: i64 = other
            .query_row("SELECT COUNT(*) FROM probe;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn memory_engines_are_isolated_from_each_other() {
        let first = Engine::connect(Settings::default()).unwrap();
        let second = Engine::connect(Settings::default()).unwrap();

        first
            .open_connection()
            .unwrap()
            .execute_batch("CREATE TABLE only_here (id INTEGER PRIMARY KEY);")
            .unwrap();

        let err = second
            .open_connection()
            .unwrap()
            .execute_batch("SELECT * FROM only_here;")
            .unwrap_err();
        assert!(err.to_string().contains("only_here"));
    }

    #[test]
    fn memory_engine_readers_see_committed_state_during_a_write() {
        let engine = Engine::connect(Settings::default()).unwrap();
        let writer = engine.open_connection().unwrap();
        writer
            .execute_batch("CREATE TABLE probe (id INTEGER PRIMARY KEY);")
            .unwrap();
        let mode: String = writer
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_ascii_uppercase(), JournalMode::Wal.as_pragma());

        writer
            .execute_batch("BEGIN IMMEDIATE; INSERT INTO probe DEFAULT VALUES;")
            .unwrap();
        let reader = engine.open_connection().unwrap();
        let count: i64 = reader
            .query_row("SELECT COUNT(*) FROM probe;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        writer.execute_batch("COMMIT;").unwrap();
        let count: i64 = reader
            .query_row("SELECT COUNT(*) FROM probe;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn memory_engine_scratch_is_removed_on_drop() {
        let engine = Engine::connect(Settings::default()).unwrap();
        drop(engine.open_connection().unwrap());
        let path = engine.database_path().to_path_buf();
        assert!(path.exists());

        drop(engine);
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    #[test]
    fn connect_rejects_invalid_settings() {
        let mut settings = Settings::default();
        settings.database.drivername = "mysql".to_string();
        let err = Engine::connect(settings).unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }
}
