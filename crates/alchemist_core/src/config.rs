//! Immutable connection and engine settings.
//!
//! # Responsibility
//! - Describe which database an engine connects to and how its connections
//!   are tuned.
//! - Load settings from `ALCHEMIST_*` environment variables for harnesses.
//!
//! # Invariants
//! - Settings are validated once, when an engine is built, and are never
//!   mutated through shared state afterwards.
//! - Only the `sqlite` driver is accepted.
//! - Passwords never appear in `Debug` output or rendered URLs.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::Path;
use std::time::Duration;

/// Driver name accepted by the engine.
pub const SQLITE_DRIVER: &str = "sqlite";
/// Database name that selects an engine-private scratch database, removed
/// when the engine drops.
pub const MEMORY_DATABASE: &str = ":memory:";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const REDACTED: &str = "***";

const ENV_DRIVERNAME: &str = "ALCHEMIST_DRIVERNAME";
const ENV_HOST: &str = "ALCHEMIST_HOST";
const ENV_PORT: &str = "ALCHEMIST_PORT";
const ENV_USERNAME: &str = "ALCHEMIST_USERNAME";
const ENV_PASSWORD: &str = "ALCHEMIST_PASSWORD";
const ENV_DATABASE: &str = "ALCHEMIST_DATABASE";
const ENV_BUSY_TIMEOUT_MS: &str = "ALCHEMIST_BUSY_TIMEOUT_MS";
const ENV_JOURNAL_MODE: &str = "ALCHEMIST_JOURNAL_MODE";

/// Settings validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Driver is not `sqlite`.
    UnsupportedDriver(String),
    /// Database name/path is empty.
    MissingDatabase,
    /// One setting value cannot be parsed.
    InvalidValue { key: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedDriver(driver) => write!(
                f,
                "unsupported database driver `{driver}`; expected `{SQLITE_DRIVER}`"
            ),
            Self::MissingDatabase => write!(f, "database name cannot be empty"),
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value `{value}` for setting `{key}`")
            }
        }
    }
}

impl Error for ConfigError {}

/// Connection target, shaped like a classic database URL.
///
/// `host`, `port`, `username` and `password` are carried for URL rendering
/// only; the SQLite driver ignores them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub drivername: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// File path, or `:memory:` for an in-memory database.
    pub database: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Debug for DatabaseSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let password = if self.password.is_empty() { "" } else { REDACTED };
        f.debug_struct("DatabaseSettings")
            .field("drivername", &self.drivername)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &password)
            .field("database", &self.database)
            .finish()
    }
}

impl DatabaseSettings {
    /// Settings for an on-disk SQLite database file.
    pub fn sqlite_file(path: impl AsRef<Path>) -> Self {
        Self {
            database: path.as_ref().to_string_lossy().into_owned(),
            ..Self::in_memory()
        }
    }

    /// Settings for an engine-private in-memory SQLite database.
    pub fn in_memory() -> Self {
        Self {
            drivername: SQLITE_DRIVER.to_string(),
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
            database: MEMORY_DATABASE.to_string(),
        }
    }

    /// Returns whether the target is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.database.trim() == MEMORY_DATABASE
    }

    /// Renders `driver://[user[:***]@]host[:port][/database]`.
    ///
    /// The password is always masked. In-memory databases render without a
    /// database segment, e.g. `sqlite://`.
    pub fn url(&self) -> String {
        let mut url = format!("{}://", self.drivername.trim());
        if !self.username.is_empty() {
            url.push_str(&self.username);
            if !self.password.is_empty() {
                url.push(':');
                url.push_str(REDACTED);
            }
            url.push('@');
        }
        url.push_str(&self.host);
        if self.port != 0 {
            url.push_str(&format!(":{}", self.port));
        }
        if !self.is_memory() {
            url.push('/');
            url.push_str(self.database.trim());
        }
        url
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let driver = self.drivername.trim().to_ascii_lowercase();
        if driver != SQLITE_DRIVER {
            return Err(ConfigError::UnsupportedDriver(self.drivername.clone()));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::MissingDatabase);
        }
        Ok(())
    }
}

/// SQLite journal mode applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

impl JournalMode {
    /// Pragma value understood by SQLite.
    pub fn as_pragma(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Persist => "PERSIST",
            Self::Memory => "MEMORY",
            Self::Wal => "WAL",
            Self::Off => "OFF",
        }
    }

    /// Parses a case-insensitive journal mode name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delete" => Some(Self::Delete),
            "truncate" => Some(Self::Truncate),
            "persist" => Some(Self::Persist),
            "memory" => Some(Self::Memory),
            "wal" => Some(Self::Wal),
            "off" => Some(Self::Off),
            _ => None,
        }
    }
}

/// Per-connection tuning applied by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Applied to scratch databases of in-memory engines as well.
    pub journal_mode: JournalMode,
    pub foreign_keys: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::Wal,
            foreign_keys: true,
        }
    }
}

impl EngineOptions {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Complete engine configuration passed to `Context::new`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub engine: EngineOptions,
}

impl Settings {
    pub fn new(database: DatabaseSettings) -> Self {
        Self {
            database,
            engine: EngineOptions::default(),
        }
    }

    pub fn with_engine(mut self, engine: EngineOptions) -> Self {
        self.engine = engine;
        self
    }

    /// Checks driver and database target.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()
    }

    /// Loads settings from `ALCHEMIST_*` environment variables.
    ///
    /// Unset variables fall back to an in-memory SQLite database with default
    /// engine options.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings through an arbitrary key lookup.
    ///
    /// # Errors
    /// - Returns `InvalidValue` for unparsable port, timeout or journal mode.
    /// - Returns validation errors for unsupported drivers or empty targets.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let database = &mut settings.database;

        if let Some(value) = lookup(ENV_DRIVERNAME) {
            database.drivername = value;
        }
        if let Some(value) = lookup(ENV_HOST) {
            database.host = value;
        }
        if let Some(value) = lookup(ENV_PORT) {
            database.port = parse_number(ENV_PORT, &value)?;
        }
        if let Some(value) = lookup(ENV_USERNAME) {
            database.username = value;
        }
        if let Some(value) = lookup(ENV_PASSWORD) {
            database.password = value;
        }
        if let Some(value) = lookup(ENV_DATABASE) {
            database.database = value;
        }
        if let Some(value) = lookup(ENV_BUSY_TIMEOUT_MS) {
            settings.engine.busy_timeout_ms = parse_number(ENV_BUSY_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_JOURNAL_MODE) {
            settings.engine.journal_mode =
                JournalMode::parse(&value).ok_or(ConfigError::InvalidValue {
                    key: ENV_JOURNAL_MODE,
                    value,
                })?;
        }

        settings.validate()?;
        Ok(settings)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}
