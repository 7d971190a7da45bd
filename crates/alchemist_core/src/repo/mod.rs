//! Repository layer: session lifecycle, transaction scopes and CRUD.
//!
//! # Responsibility
//! - Mediate entity access through explicitly scoped sessions.
//! - Classify lifecycle and commit failures into `RepoError`.
//!
//! # Invariants
//! - Entity types must be registered before any CRUD operation touches them.
//! - Failed commits are rolled back and reported once, never retried.

mod base;
mod crud;
mod error;
mod query;
mod scoped;

pub use base::{Repository, RepositoryBase};
pub use error::{RepoError, RepoErrorKind, RepoResult};
pub use query::{BoundQuery, ColumnKey, CompareOp, Predicate, Query, SyncPolicy, UpdateValues};
pub use scoped::{ScopedSession, ScopedSessionRegistry};
