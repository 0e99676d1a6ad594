//! SQLite-based settings store and typed harvester/listener configuration
//!
//! Settings are flat key/value rows. Harvesters live under
//! `harvester.{id}.*` and listeners under `listener.{name}.*`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::AttributeOverrides;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Missing configuration key: {0}")]
    MissingKey(String),
    #[error("Received invalid configuration value of [{value}] for property [{key}]")]
    InvalidValue { key: String, value: String },
    #[error("Invalid attribute override key value pair of [{0}]")]
    InvalidOverride(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// How many listeners a harvester accepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerPolicy {
    /// Any number of listeners, every event goes to all of them
    #[default]
    FanOut,
    /// A second registration is rejected instead of replacing the first
    Single,
}

impl ListenerPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerPolicy::FanOut => "fan_out",
            ListenerPolicy::Single => "single",
        }
    }
}

impl FromStr for ListenerPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fan_out" => Ok(ListenerPolicy::FanOut),
            "single" => Ok(ListenerPolicy::Single),
            other => Err(ConfigError::InvalidValue {
                key: "listener_policy".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Strips one trailing slash so `/foo/bar` and `/foo/bar/` share persisted state
pub fn canonical_root(location: &str) -> String {
    location.strip_suffix('/').unwrap_or(location).to_string()
}

/// Everything a harvester needs to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvesterConfig {
    pub id: String,
    pub root: String,
    pub poll_interval: Duration,
    pub attribute_overrides: AttributeOverrides,
    pub listener_policy: ListenerPolicy,
    /// Skip listing entirely while nobody is listening
    pub idle_without_listeners: bool,
}

impl HarvesterConfig {
    pub fn new(id: impl Into<String>, root: &str) -> Self {
        Self {
            id: id.into(),
            root: canonical_root(root),
            poll_interval: DEFAULT_POLL_INTERVAL,
            attribute_overrides: AttributeOverrides::default(),
            listener_policy: ListenerPolicy::default(),
            idle_without_listeners: true,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_attribute_overrides<I, S>(mut self, pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.attribute_overrides = AttributeOverrides::parse(pairs)?;
        Ok(self)
    }

    pub fn with_listener_policy(mut self, policy: ListenerPolicy) -> Self {
        self.listener_policy = policy;
        self
    }

    pub fn with_idle_without_listeners(mut self, idle: bool) -> Self {
        self.idle_without_listeners = idle;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "id".to_string(),
                value: self.id.clone(),
            });
        }
        if self.root.trim().is_empty() {
            return Err(ConfigError::MissingKey(format!("harvester.{}.root", self.id)));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: format!("harvester.{}.poll_interval_secs", self.id),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Read `harvester.{id}.*` keys
    pub fn from_app_config(config: &AppConfig, id: &str) -> Result<Self, ConfigError> {
        let key = |name: &str| format!("harvester.{}.{}", id, name);

        let root = config
            .get(&key("root"))?
            .ok_or_else(|| ConfigError::MissingKey(key("root")))?;
        let mut harvester = Self::new(id, &root);

        if let Some(secs) = config.get(&key("poll_interval_secs"))? {
            let parsed = secs.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: key("poll_interval_secs"),
                value: secs.clone(),
            })?;
            harvester.poll_interval = Duration::from_secs(parsed);
        }

        if let Some(json) = config.get(&key("attribute_overrides"))? {
            let pairs: Vec<String> =
                serde_json::from_str(&json).map_err(|_| ConfigError::InvalidValue {
                    key: key("attribute_overrides"),
                    value: json.clone(),
                })?;
            harvester = harvester.with_attribute_overrides(pairs)?;
        }

        if let Some(policy) = config.get(&key("listener_policy"))? {
            harvester.listener_policy = policy.parse()?;
        }

        if let Some(idle) = config.get(&key("idle_without_listeners"))? {
            harvester.idle_without_listeners = match idle.as_str() {
                "true" => true,
                "false" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: key("idle_without_listeners"),
                        value: idle,
                    })
                }
            };
        }

        harvester.validate()?;
        Ok(harvester)
    }
}

/// A persistent listener and the harvester id it watches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    pub name: String,
    pub watch: String,
    pub catalog_dir: Option<PathBuf>,
}

impl ListenerConfig {
    /// Read `listener.{name}.*` keys
    pub fn from_app_config(config: &AppConfig, name: &str) -> Result<Self, ConfigError> {
        let watch_key = format!("listener.{}.watch", name);
        let watch = config
            .get(&watch_key)?
            .filter(|w| !w.trim().is_empty())
            .ok_or(ConfigError::MissingKey(watch_key))?;
        let catalog_dir = config
            .get(&format!("listener.{}.catalog_dir", name))?
            .map(PathBuf::from);

        Ok(Self {
            name: name.to_string(),
            watch,
            catalog_dir,
        })
    }
}

pub struct AppConfig {
    conn: Mutex<Connection>,
}

impl AppConfig {
    /// Create config table in an existing database connection
    pub fn init_table(conn: &Connection) -> Result<(), ConfigError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS app_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .map_err(db_error)
    }

    /// Open or create a config database on disk
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let conn = Connection::open(path).map_err(db_error)?;
        Self::init_table(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Open standalone in-memory config (for testing)
    pub fn open_in_memory() -> Result<Self, ConfigError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::init_table(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection (config table must already be initialized)
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ConfigError> {
        self.conn
            .lock()
            .map_err(|_| ConfigError::DatabaseError("connection lock poisoned".to_string()))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT value FROM app_config WHERE key = ?1",
            params![key],
            |row| row.get(0),
        );
        let ret = match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_error(e)),
        };
        tracing::debug!(key = %key, found = ret.as_ref().ok().and_then(|v| v.as_ref()).is_some(), "Config get");
        ret
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        tracing::debug!(key = %key, "Config set");
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO app_config (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now],
        )
        .map_err(db_error)?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), ConfigError> {
        tracing::debug!(key = %key, "Config delete");
        let conn = self.conn()?;
        conn.execute("DELETE FROM app_config WHERE key = ?1", params![key])
            .map_err(db_error)?;
        Ok(())
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        Ok(self.get(key)?.map(|v| v == "true").unwrap_or(false))
    }

    /// All (key, value) pairs whose key starts with `prefix`, ordered by key
    pub fn get_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, ConfigError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM app_config WHERE substr(key, 1, ?2) = ?1 ORDER BY key")
            .map_err(db_error)?;
        let rows = stmt
            .query_map(params![prefix, prefix.len() as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        Ok(rows)
    }

    /// Ids of every harvester that has a `root` configured
    pub fn harvester_ids(&self) -> Result<Vec<String>, ConfigError> {
        self.ids_with_suffix("harvester.", ".root")
    }

    /// Names of every listener that has a `watch` target configured
    pub fn listener_names(&self) -> Result<Vec<String>, ConfigError> {
        self.ids_with_suffix("listener.", ".watch")
    }

    fn ids_with_suffix(&self, prefix: &str, suffix: &str) -> Result<Vec<String>, ConfigError> {
        Ok(self
            .get_by_prefix(prefix)?
            .into_iter()
            .filter_map(|(key, _)| {
                key.strip_prefix(prefix)
                    .and_then(|rest| rest.strip_suffix(suffix))
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
            })
            .collect())
    }
}

fn db_error(e: rusqlite::Error) -> ConfigError {
    ConfigError::DatabaseError(e.to_string())
}
