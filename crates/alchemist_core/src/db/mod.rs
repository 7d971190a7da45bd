//! SQLite engine and session handles.
//!
//! # Responsibility
//! - Open configured SQLite connections (`Engine`).
//! - Wrap one connection as a unit-of-work `Session`.
//!
//! # Invariants
//! - Every connection is bootstrapped with the engine options before use.
//! - A session owns its connection exclusively; closing it is idempotent.

use crate::config::ConfigError;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod engine;
mod session;

pub use engine::Engine;
pub use session::{RowKey, Session, SessionFactory, SessionId};

pub type DbResult<T> = Result<T, DbError>;

/// Database-level errors from engine and session operations.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Config(ConfigError),
    /// Scratch storage for an in-memory engine could not be prepared.
    Io(std::io::Error),
    /// Work was attempted on a session that has already been closed.
    SessionClosed(SessionId),
    /// Stored or supplied data cannot be used as requested.
    InvalidData(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "scratch database unavailable: {err}"),
            Self::SessionClosed(id) => write!(f, "session {id} is closed"),
            Self::InvalidData(message) => write!(f, "invalid data: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::SessionClosed(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<ConfigError> for DbError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
