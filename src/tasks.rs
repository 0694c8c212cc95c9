// Database Tasks
// create/drop/purge/charset/collation/structure_dump/structure_load for one
// configured SQL Server database

use crate::db::connection::ConnectionConfig;
use crate::db::drivers::{MssqlConnector, MssqlDialect};
use crate::db::lifecycle::{CreateOptions, DatabaseLifecycle};
use crate::db::loader;
use crate::db::locality;
use crate::db::structure::{DumpDocument, StructureDumper};
use crate::db::traits::{Connector, DatabaseError, IdentifierQuoter, SqlExecutor};
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, LazyLock};

/// Server wording varies by version and locale, so this is best effort
static ALREADY_EXISTS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)database .* already exists").ok());

/// SQL Server error number for "Database '%.*ls' already exists"
const DATABASE_EXISTS_ERROR: u32 = 1801;

/// Turn a CREATE DATABASE failure into `DatabaseAlreadyExists` when it says so
pub fn classify_create_error(database: &str, err: DatabaseError) -> DatabaseError {
    let DatabaseError::Statement { code, message } = err else {
        return err;
    };

    let matches_message = ALREADY_EXISTS
        .as_ref()
        .is_some_and(|re| re.is_match(&message));

    if matches_message || code == Some(DATABASE_EXISTS_ERROR) {
        DatabaseError::DatabaseAlreadyExists {
            database: database.to_string(),
            message,
        }
    } else {
        DatabaseError::Statement { code, message }
    }
}

/// Runs lifecycle tasks for one configuration.
///
/// Holds at most one open handle. Statements that create or drop the target
/// run over a handle to the administrative database; everything else runs
/// over a handle to the target itself.
pub struct SqlServerDatabaseTasks {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    quoter: Arc<dyn IdentifierQuoter>,
    connection: Option<Box<dyn SqlExecutor>>,
}

impl SqlServerDatabaseTasks {
    /// Tasks backed by tiberius
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_collaborators(config, Arc::new(MssqlConnector::new()), Arc::new(MssqlDialect))
    }

    pub fn with_collaborators(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        quoter: Arc<dyn IdentifierQuoter>,
    ) -> Self {
        Self {
            config,
            connector,
            quoter,
            connection: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Database the open handle is bound to, if any
    pub fn connected_database(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.database())
    }

    /// Replace the open handle with one bound to `config.database`
    pub async fn establish_connection(&mut self, config: &ConnectionConfig) -> Result<(), DatabaseError> {
        // Release the old handle before opening the next one
        self.connection = None;
        tracing::debug!(database = %config.database, "establishing connection");
        self.connection = Some(self.connector.connect(config).await?);
        Ok(())
    }

    async fn establish_master_connection(&mut self) -> Result<(), DatabaseError> {
        let admin = self.config.admin();
        tracing::info!(database = %admin.database, "connecting to administrative database");
        self.establish_connection(&admin).await
    }

    pub fn clear_active_connections(&mut self) {
        if self.connection.take().is_some() {
            tracing::debug!("released active connection");
        }
    }

    /// The open handle, which must not be bound to the target database
    fn admin_connection(&mut self) -> Result<&mut (dyn SqlExecutor + 'static), DatabaseError> {
        let target = &self.config.database;
        let conn = self.connection.as_deref_mut().ok_or(DatabaseError::NotConnected)?;
        if conn.database().eq_ignore_ascii_case(target) {
            return Err(DatabaseError::InvalidConfig(format!(
                "Cannot create or drop '{}' while connected to it",
                target
            )));
        }
        Ok(conn)
    }

    /// A handle bound to the target database. An administrative handle left
    /// open by `drop` or a failed `create` is replaced first.
    async fn live_connection(&mut self) -> Result<&mut (dyn SqlExecutor + 'static), DatabaseError> {
        let on_target = self
            .connected_database()
            .is_some_and(|db| db.eq_ignore_ascii_case(&self.config.database));
        if !on_target {
            let config = self.config.clone();
            self.establish_connection(&config).await?;
        }
        self.connection.as_deref_mut().ok_or(DatabaseError::NotConnected)
    }

    /// Create the target database, then reconnect to it.
    ///
    /// With `master_established` the currently open administrative handle is
    /// reused. An existing database surfaces as `DatabaseAlreadyExists`.
    pub async fn create(&mut self, master_established: bool) -> Result<(), DatabaseError> {
        if !master_established {
            self.establish_master_connection().await?;
        }

        let database = self.config.database.clone();
        let options = CreateOptions::with_collation(self.config.collation_or_default());
        let quoter = Arc::clone(&self.quoter);
        let conn = self.admin_connection()?;

        DatabaseLifecycle::new(conn, quoter.as_ref())
            .create_database(&database, &options)
            .await
            .map_err(|e| classify_create_error(&database, e))?;

        let config = self.config.clone();
        self.establish_connection(&config).await
    }

    pub async fn drop(&mut self) -> Result<(), DatabaseError> {
        self.establish_master_connection().await?;

        let database = self.config.database.clone();
        let quoter = Arc::clone(&self.quoter);
        let conn = self.admin_connection()?;

        DatabaseLifecycle::new(conn, quoter.as_ref())
            .drop_database(&database)
            .await
    }

    /// Drop and recreate the target. A failed drop skips the create.
    pub async fn purge(&mut self) -> Result<(), DatabaseError> {
        self.clear_active_connections();
        self.drop().await?;
        self.create(false).await
    }

    pub async fn charset(&mut self) -> Result<String, DatabaseError> {
        let quoter = Arc::clone(&self.quoter);
        let conn = self.live_connection().await?;
        DatabaseLifecycle::new(conn, quoter.as_ref()).charset().await
    }

    pub async fn collation(&mut self) -> Result<String, DatabaseError> {
        let quoter = Arc::clone(&self.quoter);
        let conn = self.live_connection().await?;
        DatabaseLifecycle::new(conn, quoter.as_ref()).collation().await
    }

    pub async fn current_database(&mut self) -> Result<String, DatabaseError> {
        let quoter = Arc::clone(&self.quoter);
        let conn = self.live_connection().await?;
        DatabaseLifecycle::new(conn, quoter.as_ref())
            .current_database()
            .await
    }

    pub async fn structure_dump(&mut self, path: &Path) -> Result<DumpDocument, DatabaseError> {
        let quoter = Arc::clone(&self.quoter);
        let conn = self.live_connection().await?;
        StructureDumper::new(conn, quoter.as_ref())
            .dump_to_file(path)
            .await
    }

    /// Replay a dump. Not idempotent: objects that already exist fail the
    /// batch that creates them, and earlier batches stay applied.
    pub async fn structure_load(&mut self, path: &Path) -> Result<usize, DatabaseError> {
        let conn = self.live_connection().await?;
        loader::load_file(conn, path).await
    }

    /// Whether the configured host is this machine or on a private network
    pub async fn is_local(&self) -> bool {
        locality::is_local_database(Some(&self.config.host)).await
    }
}
