//! Repository error taxonomy.

use crate::db::DbError;
use crate::model::ColumnRef;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors raised by session lifecycle, transaction scopes and CRUD mediation.
#[derive(Debug)]
pub enum RepoError {
    /// A local session was requested while one is already active.
    SessionAlreadyOpen { repo: String },
    /// No active session, or the factory could not produce one.
    NoOpenSession {
        repo: String,
        source: Option<DbError>,
    },
    /// Pending work was found where none is allowed. Reserved.
    PendingCommit { repo: String },
    /// Commit requested with nothing pending.
    NoPendingCommit { repo: String },
    /// The database rejected transactional work or its commit; the
    /// transaction was rolled back.
    TransactionFailed { repo: String, source: DbError },
    /// The entity type is not registered.
    UnknownModel { model: &'static str },
    /// A plain column name is not declared by the entity.
    UnknownColumn { table: &'static str, column: String },
    /// A typed column reference does not resolve on the entity.
    UnknownUpdateKey { table: &'static str, key: ColumnRef },
    Db(DbError),
}

/// Copyable classification of `RepoError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoErrorKind {
    SessionAlreadyOpen,
    NoOpenSession,
    PendingCommit,
    NoPendingCommit,
    TransactionFailed,
    UnknownModel,
    UnknownColumn,
    UnknownUpdateKey,
    Db,
}

impl RepoError {
    pub fn kind(&self) -> RepoErrorKind {
        match self {
            Self::SessionAlreadyOpen { .. } => RepoErrorKind::SessionAlreadyOpen,
            Self::NoOpenSession { .. } => RepoErrorKind::NoOpenSession,
            Self::PendingCommit { .. } => RepoErrorKind::PendingCommit,
            Self::NoPendingCommit { .. } => RepoErrorKind::NoPendingCommit,
            Self::TransactionFailed { .. } => RepoErrorKind::TransactionFailed,
            Self::UnknownModel { .. } => RepoErrorKind::UnknownModel,
            Self::UnknownColumn { .. } => RepoErrorKind::UnknownColumn,
            Self::UnknownUpdateKey { .. } => RepoErrorKind::UnknownUpdateKey,
            Self::Db(_) => RepoErrorKind::Db,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionAlreadyOpen { repo } => {
                write!(f, "repository {repo} currently has an open session")
            }
            Self::NoOpenSession { repo, source } => match source {
                Some(err) => write!(f, "repository {repo} could not open a session: {err}"),
                None => write!(f, "repository {repo} does not have an open session"),
            },
            Self::PendingCommit { repo } => {
                write!(f, "repository {repo} has uncommitted work")
            }
            Self::NoPendingCommit { repo } => {
                write!(f, "repository {repo} has nothing to commit")
            }
            Self::TransactionFailed { repo, source } => {
                write!(f, "repository {repo} rolled back a failed transaction: {source}")
            }
            Self::UnknownModel { model } => {
                write!(f, "entity {model} is not a registered declarative entity")
            }
            Self::UnknownColumn { table, column } => {
                write!(f, "entity table `{table}` does not have a column named `{column}`")
            }
            Self::UnknownUpdateKey { table, key } => {
                write!(f, "entity table `{table}` cannot perform an update on `{key}`")
            }
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NoOpenSession {
                source: Some(err), ..
            } => Some(err),
            Self::TransactionFailed { source, .. } => Some(source),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
