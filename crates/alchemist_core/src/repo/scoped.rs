//! Thread-keyed session registry.
//!
//! # Responsibility
//! - Hand each calling thread its own session, created on first access.
//! - Tear down one thread's session or all of them.
//! - Reap sessions whose owning thread has exited.
//!
//! # Invariants
//! - A thread never receives another thread's session.
//! - The registry owns the sessions; callers hold shared handles that report
//!   `is_open() == false` once the registry has closed them.
//! - Sessions of exited threads are closed and forgotten on the next registry
//!   access from a live thread.

use crate::db::{DbResult, Session, SessionFactory};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

/// Shared handle to the calling thread's session.
pub type ScopedSession = Arc<Mutex<Session>>;

thread_local! {
    // Dropped with the thread's locals, which marks its sessions as orphaned.
    static THREAD_TOKEN: Arc<()> = Arc::new(());
}

struct ThreadEntry {
    session: ScopedSession,
    owner: Weak<()>,
}

impl ThreadEntry {
    fn is_orphaned(&self) -> bool {
        self.owner.strong_count() == 0
    }
}

/// Distributes one session per thread from a shared factory.
pub struct ScopedSessionRegistry {
    factory: Arc<dyn SessionFactory>,
    sessions: Mutex<HashMap<ThreadId, ThreadEntry>>,
}

impl ScopedSessionRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the calling thread's session, creating it if needed.
    ///
    /// A session the caller closed is replaced by a fresh one.
    pub fn current(&self) -> DbResult<ScopedSession> {
        self.reap_exited();

        let thread = thread::current().id();
        if let Some(existing) = self.sessions.lock().get(&thread) {
            // Why: a closed handle would fail every later call on this thread,
            // so only an open (or currently locked, hence in-use) one is reused.
            let open = existing
                .session
                .try_lock()
                .map_or(true, |session| session.is_open());
            if open {
                return Ok(existing.session.clone());
            }
        }

        let session = Arc::new(Mutex::new(self.factory.create_session()?));
        debug!(
            "event=scoped_session_create module=repo status=ok session_id={} thread={:?}",
            session.lock().id(),
            thread
        );
        // Outside TLS teardown the token is live; during it the entry starts
        // orphaned and is reaped on the next access.
        let owner = THREAD_TOKEN
            .try_with(Arc::downgrade)
            .unwrap_or_default();
        self.sessions.lock().insert(
            thread,
            ThreadEntry {
                session: session.clone(),
                owner,
            },
        );
        Ok(session)
    }

    /// Closes and forgets the calling thread's session.
    pub fn remove_current(&self) {
        let removed = self.sessions.lock().remove(&thread::current().id());
        if let Some(entry) = removed {
            entry.session.lock().close();
        }
    }

    /// Closes and forgets every thread's session.
    ///
    /// Blocks until sessions currently locked by other threads are released.
    pub fn remove_all(&self) {
        let drained: Vec<ThreadEntry> = self.sessions.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            entry.session.lock().close();
        }
        debug!("event=scoped_session_remove module=repo status=ok sessions={count}");
    }

    /// Number of sessions held for live threads.
    pub fn len(&self) -> usize {
        self.reap_exited();
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes and forgets sessions whose thread has exited.
    fn reap_exited(&self) {
        let mut orphaned = Vec::new();
        self.sessions.lock().retain(|_, entry| {
            if entry.is_orphaned() {
                orphaned.push(entry.session.clone());
                false
            } else {
                true
            }
        });
        if orphaned.is_empty() {
            return;
        }

        let count = orphaned.len();
        for session in orphaned {
            session.lock().close();
        }
        debug!("event=scoped_session_reap module=repo status=ok sessions={count}");
    }
}

#[cfg(test)]
mod tests {
    use super::ScopedSessionRegistry;
    use crate::config::Settings;
    use crate::db::Engine;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn exited_thread_sessions_are_reaped() {
        let registry = ScopedSessionRegistry::new(Arc::new(Engine::connect(Settings::default()).unwrap()));
        registry.current().unwrap();

        let worker_session = thread::scope(|scope| {
            scope
                .spawn(|| registry.current().unwrap())
                .join()
                .unwrap()
        });
        assert!(worker_session.lock().is_open());

        assert_eq!(registry.len(), 1);
        assert!(!worker_session.lock().is_open());
    }
}
