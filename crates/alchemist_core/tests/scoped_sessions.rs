mod common;

use alchemist_core::{Context, RepoErrorKind, RepositoryBase};
use common::{committed_count, file_context, memory_context, t0, Stamp};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn scoped_session_requires_registry() {
    let (_dir, context) = file_context();
    let repo = RepositoryBase::new(&context);

    assert!(!repo.has_thread_safe_sessions());
    let err = repo.thread_safe_session().unwrap_err();
    assert_eq!(err.kind(), RepoErrorKind::NoOpenSession);
}

#[test]
fn registry_creation_is_idempotent() {
    let (_dir, context) = file_context();
    let repo = RepositoryBase::new(&context);

    repo.create_thread_safe_session();
    let first = repo.scoped_registry().unwrap();
    repo.create_thread_safe_session();
    let second = repo.scoped_registry().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn same_thread_reuses_its_session() {
    let (_dir, context) = file_context();
    let repo = RepositoryBase::new(&context);
    repo.create_thread_safe_session();

    let first = repo.thread_safe_session().unwrap();
    let second = repo.thread_safe_session().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.lock().id(), second.lock().id());
    assert_eq!(repo.scoped_registry().unwrap().len(), 1);
}

#[test]
fn threads_receive_distinct_sessions() {
    let (_dir, context) = file_context();
    let repo = RepositoryBase::new(&context);
    repo.create_thread_safe_session();
    let created = Barrier::new(2);
    let counted = Barrier::new(2);

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    let session = repo.thread_safe_session().unwrap();
                    let id = session.lock().id();
                    created.wait();
                    let live = repo.scoped_registry().unwrap().len();
                    counted.wait();
                    (id, live)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_ne!(results[0].0, results[1].0);
    assert!(results.iter().all(|(_, live)| *live == 2));
}

fn assert_scoped_writes_isolated(context: &Context) {
    let repo = RepositoryBase::new(context);
    repo.create_thread_safe_session();
    let written = Barrier::new(2);
    let checked = Barrier::new(2);
    let committed = Barrier::new(2);

    let (before, after) = thread::scope(|scope| {
        scope.spawn(|| {
            let session = repo.thread_safe_session().unwrap();
            session.lock().add(&mut Stamp::at(t0())).unwrap();
            written.wait();
            checked.wait();
            session.lock().commit().unwrap();
            committed.wait();
        });

        let reader = scope.spawn(|| {
            let session = repo.thread_safe_session().unwrap();
            let count = || {
                repo.read::<Stamp>()
                    .unwrap()
                    .with_session(&mut session.lock())
                    .count()
                    .unwrap()
            };
            written.wait();
            let before = count();
            checked.wait();
            committed.wait();
            (before, count())
        });
        reader.join().unwrap()
    });

    assert_eq!(before, 0);
    assert_eq!(after, 1);
    assert_eq!(committed_count(context), 1);
}

#[test]
fn uncommitted_scoped_writes_stay_invisible_to_other_threads() {
    let (_dir, context) = file_context();
    assert_scoped_writes_isolated(&context);
}

#[test]
fn uncommitted_scoped_writes_stay_invisible_on_memory_engine() {
    assert_scoped_writes_isolated(&memory_context());
}

#[test]
fn removing_registry_closes_sessions() {
    let (_dir, context) = file_context();
    let repo = RepositoryBase::new(&context);
    repo.create_thread_safe_session();

    let session = repo.thread_safe_session().unwrap();
    session.lock().add(&mut Stamp::at(t0())).unwrap();

    repo.remove_thread_safe_sessions();
    assert!(!session.lock().is_open());
    assert!(!repo.has_thread_safe_sessions());
    assert_eq!(committed_count(&context), 0);

    let err = repo.thread_safe_session().unwrap_err();
    assert_eq!(err.kind(), RepoErrorKind::NoOpenSession);

    // Removing twice is harmless.
    repo.remove_thread_safe_sessions();
}

#[test]
fn closed_scoped_session_is_replaced() {
    let (_dir, context) = file_context();
    let repo = RepositoryBase::new(&context);
    repo.create_thread_safe_session();

    let first = repo.thread_safe_session().unwrap();
    let first_id = first.lock().id();
    first.lock().close();

    let second = repo.thread_safe_session().unwrap();
    assert!(second.lock().is_open());
    assert_ne!(second.lock().id(), first_id);
}

#[test]
fn scoped_sessions_are_independent_of_local_session() {
    let (_dir, context) = file_context();
    let repo = RepositoryBase::new(&context);
    repo.create_session().unwrap();
    repo.create_thread_safe_session();

    let scoped = repo.thread_safe_session().unwrap();
    assert_ne!(scoped.lock().id(), repo.session().unwrap().id());

    repo.remove_thread_safe_sessions();
    assert!(repo.has_active_session());
}

#[test]
fn sessions_of_exited_threads_are_released() {
    const WORKERS: usize = 8;

    let (_dir, context) = file_context();
    let repo = RepositoryBase::new(&context);
    repo.create_thread_safe_session();

    let handles: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..WORKERS)
            .map(|_| scope.spawn(|| repo.thread_safe_session().unwrap()))
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });
    assert_eq!(handles.len(), WORKERS);

    let registry = repo.scoped_registry().unwrap();
    assert_eq!(registry.len(), 0);
    assert!(registry.is_empty());
    assert!(handles.iter().all(|session| !session.lock().is_open()));

    // The registry stays usable for live threads.
    let own = repo.thread_safe_session().unwrap();
    assert!(own.lock().is_open());
    assert_eq!(registry.len(), 1);
}
