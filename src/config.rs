// Task Configuration
// Loads connection settings from a TOML file and SQLSERVER_TASKS_* environment variables

use crate::db::connection::{ConnectionConfig, DEFAULT_PORT};
use crate::db::traits::DatabaseError;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `SQLSERVER_TASKS_DATABASE`
pub const ENV_PREFIX: &str = "SQLSERVER_TASKS";

const CONFIG_FILE_NAME: &str = "sqlserver-db-tasks.toml";

pub const EMPTY_CONFIG: &str = r#"### sqlserver-db-tasks configuration file

# host = "localhost"
# port = 1433
# database = "app_development"
# username = "sa"
# password = ""

### collation used by create/purge (default SQL_Latin1_General_CP1_CI_AS)
# collation = "SQL_Latin1_General_CP1_CI_AS"

# encrypt = false
# trust_certificate = true

### extra connection options
# [options]
# application_name = "sqlserver-db-tasks"
"#;

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

/// Settings as read from the config file and environment
#[derive(Debug, Clone, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub collation: Option<String>,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default = "default_true")]
    pub trust_certificate: bool,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

impl TasksConfig {
    /// `<config dir>/sqlserver-db-tasks.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "sqlserver-db-tasks")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load from `path` (or the default location when it exists) plus the
    /// process environment
    pub fn load(path: Option<&Path>) -> Result<Self, DatabaseError> {
        Self::load_with_env(path, None)
    }

    /// Same as [`TasksConfig::load`] with an explicit environment map
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, DatabaseError> {
        let mut builder = Config::builder();

        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(DatabaseError::InvalidConfig(format!(
                        "Config file not found: {}",
                        p.display()
                    )));
                }
                builder = builder.add_source(File::new(&p.to_string_lossy(), FileFormat::Toml));
            }
            None => {
                if let Some(p) = Self::default_path().filter(|p| p.exists()) {
                    tracing::debug!(path = %p.display(), "using default config file");
                    builder = builder.add_source(File::new(&p.to_string_lossy(), FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize::<TasksConfig>())
            .map_err(|e| DatabaseError::InvalidConfig(format!("Failed to load configuration: {}", e)))
    }

    pub fn into_connection_config(self) -> Result<ConnectionConfig, DatabaseError> {
        let mut config = ConnectionConfig::new(self.host, self.port, self.database, self.username, self.password);
        config.collation = self.collation.filter(|c| !c.trim().is_empty());
        config.encrypt = self.encrypt;
        config.trust_certificate = self.trust_certificate;
        config.options = self.options;

        config.validate()?;
        Ok(config)
    }
}
