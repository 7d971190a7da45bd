//! Unit-of-work session handle.
//!
//! # Responsibility
//! - Own one SQLite connection and its lazily begun write transaction.
//! - Track which rows the open transaction has touched.
//!
//! # Invariants
//! - Reads never begin a transaction; the first write does.
//! - `commit`/`rollback` end the transaction and clear the dirty set.
//! - `close` rolls back any open transaction, releases the connection, and
//!   is idempotent. Dropping a session closes it.

use super::{DbError, DbResult};
use crate::logging::sanitize_error;
use crate::model::{quote_ident, Entity};
use log::{debug, warn};
use rusqlite::{params_from_iter, Connection, Params};
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use uuid::Uuid;

/// Random identity of one session handle.
pub type SessionId = Uuid;

/// Identity of one persisted row touched by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub table: &'static str,
    pub id: i64,
}

/// Produces new, independent sessions.
pub trait SessionFactory: Send + Sync {
    fn create_session(&self) -> DbResult<Session>;
}

/// One connection plus its pending unit of work.
pub struct Session {
    id: SessionId,
    conn: Option<Connection>,
    in_transaction: bool,
    dirty: BTreeSet<RowKey>,
}

impl Session {
    /// Wraps an already bootstrapped connection.
    pub fn new(conn: Connection) -> Self {
        let id = Uuid::new_v4();
        debug!("event=session_create module=db status=ok session_id={id}");
        Self {
            id,
            conn: Some(conn),
            in_transaction: false,
            dirty: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Returns whether a write transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Rows written by the open transaction.
    pub fn dirty(&self) -> &BTreeSet<RowKey> {
        &self.dirty
    }

    /// Inserts `entity` and writes the assigned primary key back into it.
    ///
    /// An entity that already carries a primary key is inserted with it.
    pub fn add<E: Entity>(&mut self, entity: &mut E) -> DbResult<i64> {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        if let Some(id) = entity.primary_key() {
            columns.push(quote_ident(E::PRIMARY_KEY));
            values.push(rusqlite::types::Value::Integer(id));
        }
        for (column, value) in entity.values() {
            columns.push(quote_ident(column));
            values.push(value);
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES;", quote_ident(E::TABLE))
        } else {
            let placeholders = vec!["?"; columns.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({placeholders});",
                quote_ident(E::TABLE),
                columns.join(", ")
            )
        };

        let conn = self.write_connection()?;
        conn.execute(&sql, params_from_iter(values.iter()))?;
        let id = entity.primary_key().unwrap_or_else(|| conn.last_insert_rowid());

        entity.set_primary_key(id);
        self.dirty.insert(RowKey { table: E::TABLE, id });
        Ok(id)
    }

    /// Executes one raw statement inside the session's transaction.
    pub fn execute<P: Params>(&mut self, sql: &str, params: P) -> DbResult<usize> {
        let conn = self.write_connection()?;
        Ok(conn.execute(sql, params)?)
    }

    /// Commits the open transaction, if any.
    pub fn commit(&mut self) -> DbResult<()> {
        let id = self.id;
        let conn = self.connection()?;
        if self.in_transaction {
            conn.execute_batch("COMMIT;")?;
            debug!(
                "event=session_commit module=db status=ok session_id={} rows={}",
                id,
                self.dirty.len()
            );
        }
        self.in_transaction = false;
        self.dirty.clear();
        Ok(())
    }

    /// Rolls back the open transaction, if any.
    pub fn rollback(&mut self) -> DbResult<()> {
        let conn = self.connection()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK;")?;
        }
        debug!(
            "event=session_rollback module=db status=ok session_id={} discarded_rows={}",
            self.id,
            self.dirty.len()
        );
        self.in_transaction = false;
        self.dirty.clear();
        Ok(())
    }

    /// Rolls back uncommitted work and releases the connection.
    pub fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("ROLLBACK;") {
                warn!(
                    "event=session_close module=db status=error session_id={} error_code=rollback_failed error={}",
                    self.id,
                    sanitize_error(&err)
                );
            }
        }
        if let Err((_, err)) = conn.close() {
            warn!(
                "event=session_close module=db status=error session_id={} error_code=close_failed error={}",
                self.id,
                sanitize_error(&err)
            );
        }
        self.in_transaction = false;
        self.dirty.clear();
        debug!("event=session_close module=db status=ok session_id={}", self.id);
    }

    pub(crate) fn connection(&self) -> DbResult<&Connection> {
        self.conn.as_ref().ok_or(DbError::SessionClosed(self.id))
    }

    /// Connection with a write transaction guaranteed open.
    pub(crate) fn write_connection(&mut self) -> DbResult<&Connection> {
        let conn = self.conn.as_ref().ok_or(DbError::SessionClosed(self.id))?;
        if !self.in_transaction {
            conn.execute_batch("BEGIN IMMEDIATE;")?;
            self.in_transaction = true;
        }
        Ok(conn)
    }

    pub(crate) fn mark_dirty(&mut self, keys: impl IntoIterator<Item = RowKey>) {
        self.dirty.extend(keys);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("in_transaction", &self.in_transaction)
            .field("dirty", &self.dirty.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use crate::db::DbError;
    use rusqlite::Connection;

    fn session_with_table() -> Session {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL);")
            .unwrap();
        Session::new(conn)
    }

    fn count(session: &Session) -> i64 {
        session
            .connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM items;", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn writes_begin_transaction_lazily_and_commit_ends_it() {
        let mut session = session_with_table();
        assert!(!session.in_transaction());

        session
            .execute("INSERT INTO items (label) VALUES (?1);", ["a"])
            .unwrap();
        assert!(session.in_transaction());

        session.commit().unwrap();
        assert!(!session.in_transaction());
        assert_eq!(count(&session), 1);
    }

    #[test]
    fn rollback_discards_uncommitted_rows() {
        let mut session = session_with_table();
        session
            .execute("INSERT INTO items (label) VALUES (?1);", ["a"])
            .unwrap();
        session.rollback().unwrap();

        assert!(!session.in_transaction());
        assert_eq!(count(&session), 0);
    }

    #[test]
    fn close_is_idempotent_and_rejects_later_work() {
        let mut session = session_with_table();
        session.close();
        session.close();

        assert!(!session.is_open());
        let err = session
            .execute("INSERT INTO items (label) VALUES (?1);", ["a"])
            .unwrap_err();
        assert!(matches!(err, DbError::SessionClosed(id) if id == session.id()));
        assert!(matches!(session.commit(), Err(DbError::SessionClosed(_))));
    }
}
