//! Database context: engine, session factory and entity registry.
//!
//! # Responsibility
//! - Build the engine from immutable `Settings`.
//! - Hand out sessions and the shared schema registry to repositories.
//!
//! # Invariants
//! - The registry is frozen once the context exists.

use crate::config::Settings;
use crate::db::{DbResult, Engine, Session, SessionFactory};
use crate::model::{create_tables, SchemaRegistry};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Owns the connection engine and the set of registered entities.
#[derive(Debug, Clone)]
pub struct Context {
    engine: Arc<Engine>,
    registry: Arc<SchemaRegistry>,
}

impl Context {
    /// Validates `settings`, connects the engine and freezes `registry`.
    pub fn new(settings: Settings, registry: SchemaRegistry) -> DbResult<Self> {
        Ok(Self {
            engine: Arc::new(Engine::connect(settings)?),
            registry: Arc::new(registry),
        })
    }

    pub fn settings(&self) -> &Settings {
        self.engine.settings()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn session_factory(&self) -> Arc<dyn SessionFactory> {
        self.engine.clone()
    }

    /// Returns a new, independent session.
    pub fn create_session(&self) -> DbResult<Session> {
        self.engine.create_session()
    }

    /// Creates all registered tables that are missing.
    pub fn create_tables(&self) -> DbResult<()> {
        let conn = self.engine.open_connection()?;
        create_tables(&conn, &self.registry)
    }
}

impl Display for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.engine.url())
    }
}
