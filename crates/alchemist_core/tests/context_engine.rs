mod common;

use alchemist_core::{
    Context, DatabaseSettings, Repository, RepositoryBase, SchemaRegistry, Settings,
};
use common::{committed_count, file_context, t0, Stamp};

struct StampRepository {
    base: RepositoryBase,
}

impl Repository for StampRepository {
    fn instance(context: &Context) -> Self {
        Self {
            base: RepositoryBase::new(context).with_name("StampRepository"),
        }
    }

    fn base(&self) -> &RepositoryBase {
        &self.base
    }
}

#[test]
fn memory_context_displays_sqlite_url() {
    let context = Context::new(Settings::default(), SchemaRegistry::new()).unwrap();
    assert_eq!(context.to_string(), "sqlite://");
    assert!(context.engine().is_memory());
}

#[test]
fn create_tables_is_idempotent() {
    let (_dir, context) = file_context();
    context.create_tables().unwrap();
    context.create_tables().unwrap();
    assert_eq!(committed_count(&context), 0);
}

#[test]
fn repositories_from_one_context_share_the_database() {
    let (_dir, context) = file_context();
    let writer = StampRepository::instance(&context);
    let reader = StampRepository::instance(&context);
    assert_eq!(writer.base().name(), "StampRepository");

    let id = writer.base().create(&mut Stamp::at(t0()), true).unwrap();

    reader.base().create_session().unwrap();
    let loaded = reader
        .base()
        .read::<Stamp>()
        .unwrap()
        .with_session(&mut reader.base().session().unwrap())
        .get(id)
        .unwrap();
    assert_eq!(loaded.map(|stamp| stamp.timestamp), Some(t0()));
}

#[test]
fn memory_contexts_are_isolated() {
    let first = Context::new(Settings::default(), SchemaRegistry::new().with::<Stamp>().unwrap())
        .unwrap();
    let second = Context::new(
        Settings::new(DatabaseSettings::in_memory()),
        SchemaRegistry::new().with::<Stamp>().unwrap(),
    )
    .unwrap();
    first.create_tables().unwrap();
    second.create_tables().unwrap();

    RepositoryBase::new(&first)
        .create(&mut Stamp::at(t0()), true)
        .unwrap();
    assert_eq!(committed_count(&first), 1);
    assert_eq!(committed_count(&second), 0);
}
