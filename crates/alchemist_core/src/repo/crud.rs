//! CRUD mediation over registered entities.
//!
//! # Responsibility
//! - Validate entity types and update keys before any session is touched.
//! - Route creates through a transactional scope or the local session.
//! - Hand out unbound queries for reads, updates and deletes.
//!
//! # Invariants
//! - Validation failures leave repository and database state unchanged.
//! - Update and delete mark pending work only while a local session is
//!   active.

use super::base::RepositoryBase;
use super::error::{RepoError, RepoResult};
use super::query::{resolve_update_key, Query, UpdateValues};
use crate::model::{Entity, TableSchema};
use log::debug;
use std::any::type_name;
use std::sync::Arc;

impl RepositoryBase {
    /// Inserts `obj` and returns its primary key, also written into `obj`.
    ///
    /// With `auto_commit`, the insert runs in its own committed scope.
    /// Otherwise it joins the local session (opened on demand) and the
    /// repository is marked as pending commit.
    ///
    /// # Errors
    /// - `UnknownModel` for unregistered types.
    /// - `TransactionFailed` when an auto-committed insert is rejected.
    pub fn create<E: Entity>(&self, obj: &mut E, auto_commit: bool) -> RepoResult<i64> {
        self.schema_of::<E>()?;

        if auto_commit {
            return self.session_scope(|session| Ok(session.add(obj)?));
        }

        let mut local = self.local.lock();
        if !local.is_active() {
            self.open_local(&mut local)?;
        }
        let session = local
            .session
            .as_mut()
            .ok_or_else(|| self.no_open_session(None))?;
        let id = session.add(obj)?;
        local.pending_commit = true;

        debug!(
            "event=entity_create module=repo status=pending repo={} table={} id={}",
            self.name,
            E::TABLE,
            id
        );
        Ok(id)
    }

    /// Unbound query over `E`.
    pub fn read<E: Entity>(&self) -> RepoResult<Query<E>> {
        Ok(Query::new(self.schema_of::<E>()?))
    }

    /// Validates `values` against `E` and returns an unbound query to filter
    /// and execute with `BoundQuery::update`.
    ///
    /// # Errors
    /// - `UnknownModel` for unregistered types.
    /// - `UnknownColumn` for plain names `E` does not declare.
    /// - `UnknownUpdateKey` for typed references that do not resolve on `E`.
    pub fn update<E: Entity>(&self, values: &UpdateValues) -> RepoResult<Query<E>> {
        let schema = self.schema_of::<E>()?;
        for (key, _) in values.iter() {
            resolve_update_key(&schema, key)?;
        }

        self.mark_pending();
        Ok(Query::new(schema))
    }

    /// Unbound query to filter and execute with `BoundQuery::delete`.
    pub fn delete<E: Entity>(&self) -> RepoResult<Query<E>> {
        let schema = self.schema_of::<E>()?;
        self.mark_pending();
        Ok(Query::new(schema))
    }

    fn schema_of<E: Entity>(&self) -> RepoResult<Arc<TableSchema>> {
        self.registry
            .schema_of::<E>()
            .ok_or(RepoError::UnknownModel {
                model: type_name::<E>(),
            })
    }

    fn mark_pending(&self) {
        let mut local = self.local.lock();
        // Why: returned queries may run on any session; only local-session work
        // is committed by `commit_session`, so nothing is pending without one.
        if local.is_active() {
            local.pending_commit = true;
        }
    }
}
