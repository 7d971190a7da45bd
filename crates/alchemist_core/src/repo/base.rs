//! Repository base: local session lifecycle, scoped sessions and
//! transactional scopes.
//!
//! # Responsibility
//! - Own at most one local session per repository and track whether it
//!   holds uncommitted work.
//! - Lazily create and tear down the thread-keyed session registry.
//! - Run caller work inside a commit-or-rollback scope.
//!
//! # Invariants
//! - A local session is active iff it is present and open.
//! - `pending_commit` is only ever true while a local session is active;
//!   commit, close and drop all reset it.
//! - Every session this module opens is closed on every exit path.
//! - Local state is guarded by one mutex per repository instance.

use super::error::{RepoError, RepoResult};
use super::scoped::{ScopedSession, ScopedSessionRegistry};
use crate::context::Context;
use crate::db::{DbError, RowKey, Session, SessionFactory};
use crate::logging::sanitize_error;
use crate::model::SchemaRegistry;
use log::{error, info, warn};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

const DEFAULT_REPO_NAME: &str = "RepositoryBase";

/// Debug placeholder for state behind a lock held elsewhere.
struct Locked;

impl Debug for Locked {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("<locked>")
    }
}

#[derive(Default)]
pub(super) struct LocalSession {
    pub(super) session: Option<Session>,
    pub(super) pending_commit: bool,
}

impl LocalSession {
    pub(super) fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_open)
    }

    /// Deactivates and returns the session, clearing pending state.
    fn take(&mut self) -> Option<Session> {
        self.pending_commit = false;
        self.session.take()
    }
}

/// Session lifecycle and CRUD mediation shared by concrete repositories.
pub struct RepositoryBase {
    pub(super) name: String,
    pub(super) registry: Arc<SchemaRegistry>,
    pub(super) factory: Arc<dyn SessionFactory>,
    pub(super) local: Mutex<LocalSession>,
    scoped: Mutex<Option<Arc<ScopedSessionRegistry>>>,
}

/// Concrete repository built on a `RepositoryBase`.
pub trait Repository: Sized {
    fn instance(context: &Context) -> Self;
    fn base(&self) -> &RepositoryBase;
}

impl RepositoryBase {
    pub fn new(context: &Context) -> Self {
        Self::from_parts(context.registry().clone(), context.session_factory())
    }

    /// Builds a repository over an explicit registry and session factory.
    pub fn from_parts(registry: Arc<SchemaRegistry>, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            name: DEFAULT_REPO_NAME.to_string(),
            registry,
            factory,
            local: Mutex::new(LocalSession::default()),
            scoped: Mutex::new(None),
        }
    }

    /// Name used in errors and log events.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Opens the local session.
    ///
    /// # Errors
    /// - `SessionAlreadyOpen` when a local session is active.
    /// - `NoOpenSession` when the factory fails.
    pub fn create_session(&self) -> RepoResult<()> {
        let mut local = self.local.lock();
        self.open_local(&mut local)
    }

    /// Exclusive access to the active local session.
    ///
    /// The repository stays locked while the guard lives; drop it before
    /// calling other methods on this repository.
    pub fn session(&self) -> RepoResult<MappedMutexGuard<'_, Session>> {
        let local = self.local.lock();
        MutexGuard::try_map(local, |state| {
            state.session.as_mut().filter(|session| session.is_open())
        })
        .map_err(|_| self.no_open_session(None))
    }

    pub fn has_active_session(&self) -> bool {
        self.local.lock().is_active()
    }

    pub fn pending_commit(&self) -> bool {
        self.local.lock().pending_commit
    }

    /// Rows touched by the local session; empty without one.
    pub fn dirty(&self) -> BTreeSet<RowKey> {
        let local = self.local.lock();
        match local.session.as_ref() {
            Some(session) => session.dirty().clone(),
            None => BTreeSet::new(),
        }
    }

    /// Commits pending work, then closes the local session.
    ///
    /// # Errors
    /// - `NoOpenSession` without an active session.
    /// - `NoPendingCommit` when nothing is pending; the session stays open.
    /// - `TransactionFailed` when the commit is rejected; the work is rolled
    ///   back and the session is closed.
    pub fn commit_session(&self) -> RepoResult<()> {
        let mut local = self.local.lock();
        self.commit_local(&mut local)
    }

    /// Closes the local session.
    ///
    /// Without `force`, pending work is committed first. With `force`, it is
    /// discarded. Closing when nothing is open is a no-op.
    pub fn close_session(&self, force: bool) -> RepoResult<()> {
        let mut local = self.local.lock();
        if !local.is_active() {
            local.take();
            return Ok(());
        }
        if !force && local.pending_commit {
            return self.commit_local(&mut local);
        }
        let discarded = local.pending_commit;
        if let Some(mut session) = local.take() {
            self.discard(&mut session, discarded);
        }
        Ok(())
    }

    /// Creates the scoped session registry unless it already exists.
    pub fn create_thread_safe_session(&self) {
        let mut scoped = self.scoped.lock();
        if scoped.is_none() {
            *scoped = Some(Arc::new(ScopedSessionRegistry::new(self.factory.clone())));
            info!(
                "event=scoped_registry_create module=repo status=ok repo={}",
                self.name
            );
        }
    }

    pub fn has_thread_safe_sessions(&self) -> bool {
        self.scoped.lock().is_some()
    }

    pub fn scoped_registry(&self) -> Option<Arc<ScopedSessionRegistry>> {
        self.scoped.lock().clone()
    }

    /// The calling thread's scoped session.
    ///
    /// # Errors
    /// - `NoOpenSession` when the registry was never created or the factory
    ///   fails.
    pub fn thread_safe_session(&self) -> RepoResult<ScopedSession> {
        let registry = self
            .scoped_registry()
            .ok_or_else(|| self.no_open_session(None))?;
        registry
            .current()
            .map_err(|err| self.no_open_session(Some(err)))
    }

    /// Closes every scoped session and resets the registry to uncreated.
    pub fn remove_thread_safe_sessions(&self) {
        let registry = self.scoped.lock().take();
        if let Some(registry) = registry {
            registry.remove_all();
            info!(
                "event=scoped_registry_remove module=repo status=ok repo={}",
                self.name
            );
        }
    }

    /// Runs `work` on a fresh session, then commits or rolls back and
    /// closes it.
    ///
    /// The session is independent of the local session.
    ///
    /// # Errors
    /// - `NoOpenSession` when the factory fails; nothing else is attempted.
    /// - `TransactionFailed` when `work` fails with a database error or the
    ///   commit is rejected.
    /// - Any other error returned by `work`, after rollback.
    pub fn session_scope<T, F>(&self, work: F) -> RepoResult<T>
    where
        F: FnOnce(&mut Session) -> RepoResult<T>,
    {
        let mut session = self
            .factory
            .create_session()
            .map_err(|err| self.no_open_session(Some(err)))?;

        let outcome = match work(&mut session) {
            Ok(value) => match session.commit() {
                Ok(()) => Ok(value),
                Err(err) => {
                    error!(
                        "event=scope_commit module=repo status=error repo={} session_id={} error={}",
                        self.name,
                        session.id(),
                        sanitize_error(&err)
                    );
                    self.rollback_quietly(&mut session);
                    Err(self.transaction_failed(err))
                }
            },
            Err(err) => {
                self.rollback_quietly(&mut session);
                match err {
                    RepoError::Db(source) => Err(self.transaction_failed(source)),
                    other => Err(other),
                }
            }
        };

        session.close();
        outcome
    }

    pub(super) fn open_local(&self, local: &mut LocalSession) -> RepoResult<()> {
        if local.is_active() {
            return Err(RepoError::SessionAlreadyOpen {
                repo: self.name.clone(),
            });
        }

        let session = self
            .factory
            .create_session()
            .map_err(|err| self.no_open_session(Some(err)))?;
        info!(
            "event=session_open module=repo status=ok repo={} session_id={}",
            self.name,
            session.id()
        );
        local.session = Some(session);
        local.pending_commit = false;
        Ok(())
    }

    fn commit_local(&self, local: &mut LocalSession) -> RepoResult<()> {
        if !local.is_active() {
            return Err(self.no_open_session(None));
        }
        if !local.pending_commit {
            return Err(RepoError::NoPendingCommit {
                repo: self.name.clone(),
            });
        }
        let Some(mut session) = local.take() else {
            return Err(self.no_open_session(None));
        };

        let result = match session.commit() {
            Ok(()) => {
                info!(
                    "event=session_commit module=repo status=ok repo={} session_id={}",
                    self.name,
                    session.id()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=session_commit module=repo status=error repo={} session_id={} error={}",
                    self.name,
                    session.id(),
                    sanitize_error(&err)
                );
                self.rollback_quietly(&mut session);
                Err(self.transaction_failed(err))
            }
        };

        session.close();
        result
    }

    fn discard(&self, session: &mut Session, had_pending: bool) {
        if had_pending {
            warn!(
                "event=session_close module=repo status=discarded repo={} session_id={} rows={}",
                self.name,
                session.id(),
                session.dirty().len()
            );
        } else {
            info!(
                "event=session_close module=repo status=ok repo={} session_id={}",
                self.name,
                session.id()
            );
        }
        session.close();
    }

    fn rollback_quietly(&self, session: &mut Session) {
        if let Err(err) = session.rollback() {
            warn!(
                "event=session_rollback module=repo status=error repo={} session_id={} error={}",
                self.name,
                session.id(),
                sanitize_error(&err)
            );
        }
    }

    pub(super) fn no_open_session(&self, source: Option<DbError>) -> RepoError {
        RepoError::NoOpenSession {
            repo: self.name.clone(),
            source,
        }
    }

    fn transaction_failed(&self, source: DbError) -> RepoError {
        RepoError::TransactionFailed {
            repo: self.name.clone(),
            source,
        }
    }
}

impl Drop for RepositoryBase {
    // Uncommitted work is discarded, never committed.
    fn drop(&mut self) {
        let local = self.local.get_mut();
        let had_pending = local.pending_commit;
        if let Some(mut session) = local.take() {
            if session.is_open() {
                self.discard(&mut session, had_pending);
            }
        }
    }
}

impl Debug for RepositoryBase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("RepositoryBase");
        out.field("name", &self.name)
            .field("tables", &self.registry.len());
        // A live `session()` guard holds the local lock; never wait on it here.
        match self.local.try_lock() {
            Some(local) => out
                .field("active_local_session", &local.is_active())
                .field("pending_commit", &local.pending_commit),
            None => out
                .field("active_local_session", &Locked)
                .field("pending_commit", &Locked),
        };
        match self.scoped.try_lock() {
            Some(scoped) => out.field("active_scoped_session", &scoped.is_some()),
            None => out.field("active_scoped_session", &Locked),
        };
        out.finish()
    }
}
