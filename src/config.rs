//! Process configuration for migration runs.
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then environment variables. The environment keeps the
//! conventional `DB_*` names:
//!
//! | key              | environment      | default             |
//! |------------------|------------------|---------------------|
//! | `db.url`         | `DB_URL`         | unset               |
//! | `db.host`        | `DB_HOST`        | `localhost`         |
//! | `db.port`        | `DB_PORT`        | `5432`              |
//! | `db.user`        | `DB_USER`        | `postgres`          |
//! | `db.password`    | `DB_PASSWORD`    | empty               |
//! | `db.name`        | `DB_NAME`        | `postgres`          |
//! | `db.sslmode`     | `DB_SSLMODE`     | `disable`           |
//! | `migrate.dir`    | `MIGRATE_DIR`    | `migrations`        |
//! | `migrate.table`  | `MIGRATE_TABLE`  | `schema_migrations` |
//! | `migrate.timeout`| `MIGRATE_TIMEOUT`| `60` (seconds)      |

use config::{Config, ConfigBuilder, ConfigError, Environment, File, Map};
use config::builder::DefaultState;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file, looked up relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config/migrate.toml";

/// Database connection parameters
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Full connection string; takes precedence over the individual parts
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_name() -> String {
    "postgres".to_string()
}

fn default_sslmode() -> String {
    "disable".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: None,
            name: default_name(),
            sslmode: default_sslmode(),
        }
    }
}

impl DatabaseConfig {
    /// Assemble the connection string handed to [`connect`](crate::connect)
    ///
    /// A non-empty `url` wins. Otherwise a libpq key-value string is built;
    /// the password is left out when it is unset or empty.
    pub fn connection_string(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.to_string();
        }

        let mut parts = vec![
            format!("host={}", quote_value(&self.host)),
            format!("port={}", self.port),
            format!("user={}", quote_value(&self.user)),
        ];
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            parts.push(format!("password={}", quote_value(password)));
        }
        parts.push(format!("dbname={}", quote_value(&self.name)));
        parts.push(format!("sslmode={}", quote_value(&self.sslmode)));
        parts.join(" ")
    }
}

/// Quote a libpq key-value parameter when it needs it
fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// Migration run parameters
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MigrateConfig {
    /// Directory holding `<version>_<name>.up.sql` files
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Bookkeeping table, optionally schema-qualified
    #[serde(default = "default_table")]
    pub table: String,
    /// Seconds to wait for the migration lock
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_table() -> String {
    crate::migration::DEFAULT_TABLE.to_string()
}

fn default_timeout() -> u64 {
    60
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            table: default_table(),
            timeout: default_timeout(),
        }
    }
}

impl MigrateConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Everything a migration run needs
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub db: DatabaseConfig,
    #[serde(default)]
    pub migrate: MigrateConfig,
}

impl Settings {
    /// Load settings from the given file (or `config/migrate.toml` when present)
    /// and the process environment.
    ///
    /// An explicit path must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Same as [`Settings::load`], but reads environment variables from `env`
    /// instead of the process environment when it is `Some`.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let settings = Self::builder(path, env).build()?;

        settings.try_deserialize::<Settings>().map_err(|e| {
            ConfigError::Message(format!(
                "Migration settings could not be loaded from file or environment: {e}"
            ))
        })
    }

    fn builder(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> ConfigBuilder<DefaultState> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("DB")
                    .separator("_")
                    .keep_prefix(true)
                    .source(env.clone()),
            )
            .add_source(
                Environment::with_prefix("MIGRATE")
                    .separator("_")
                    .keep_prefix(true)
                    .source(env),
            )
    }
}
