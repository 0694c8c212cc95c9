// MS-SQL Connection Configuration
// Describes where a database lives and how to log in to it

use crate::db::traits::DatabaseError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tiberius::{AuthMethod, Config, EncryptionLevel};

/// Administrative database used for create/drop statements
pub const ADMIN_DATABASE: &str = "master";

/// Collation used when the configuration does not name one
pub const DEFAULT_COLLATION: &str = "SQL_Latin1_General_CP1_CI_AS";

pub const DEFAULT_PORT: u16 = 1433;

/// Connection configuration for MS-SQL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)] // Don't serialize password
    pub password: String,
    pub collation: Option<String>,
    pub trust_certificate: bool,
    pub encrypt: bool,
    /// Extra dialect options (`application_name`, `instance_name`)
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

impl ConnectionConfig {
    pub fn new(
        host: String,
        port: u16,
        database: String,
        username: String,
        password: String,
    ) -> Self {
        Self {
            host,
            port,
            database,
            username,
            password,
            collation: None,
            trust_certificate: true,
            encrypt: false,
            options: HashMap::new(),
        }
    }

    /// Same host and credentials, bound to another database
    pub fn with_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }

    /// Same host and credentials, bound to the administrative database
    pub fn admin(&self) -> Self {
        self.with_database(ADMIN_DATABASE)
    }

    /// Configured collation, ignoring blank values
    pub fn collation(&self) -> Option<&str> {
        self.collation
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Configured collation or the default one
    pub fn collation_or_default(&self) -> &str {
        self.collation().unwrap_or(DEFAULT_COLLATION)
    }

    fn option_str(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.host.trim().is_empty() {
            return Err(DatabaseError::InvalidConfig("Host is required".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(DatabaseError::InvalidConfig("Database name is required".to_string()));
        }
        Ok(())
    }

    /// Create a tiberius Config from this ConnectionConfig
    pub fn to_tiberius_config(&self) -> Result<Config, DatabaseError> {
        self.validate()?;

        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.authentication(AuthMethod::sql_server(&self.username, &self.password));

        if let Some(name) = self.option_str("application_name") {
            config.application_name(name);
        }
        if let Some(instance) = self.option_str("instance_name") {
            config.instance_name(instance);
        }

        if self.trust_certificate {
            config.trust_cert();
        }

        config.encryption(if self.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });

        Ok(config)
    }
}
