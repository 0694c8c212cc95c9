// Database Lifecycle
// CREATE/DROP DATABASE plus the identity reads of the current database

use crate::db::traits::{DatabaseError, IdentifierQuoter, SqlExecutor};

/// Options recognised by CREATE DATABASE
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    pub collation: Option<String>,
}

impl CreateOptions {
    pub fn with_collation(collation: impl Into<String>) -> Self {
        Self {
            collation: Some(collation.into()),
        }
    }

    /// Trailing option string for CREATE DATABASE, blank options dropped
    pub fn to_clause(&self) -> Result<String, DatabaseError> {
        let mut clause = String::new();
        for build in CREATE_OPTION_CLAUSES {
            if let Some(part) = build(self)? {
                clause.push_str(&part);
            }
        }
        Ok(clause)
    }
}

type OptionClause = fn(&CreateOptions) -> Result<Option<String>, DatabaseError>;

/// Applied in order; each returns `None` when its option is absent
const CREATE_OPTION_CLAUSES: &[OptionClause] = &[collate_clause];

fn collate_clause(options: &CreateOptions) -> Result<Option<String>, DatabaseError> {
    let Some(collation) = options
        .collation
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    else {
        return Ok(None);
    };

    // Collation names are bare words, they cannot be quoted
    if !collation.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::InvalidConfig(format!(
            "Invalid collation name: {}",
            collation
        )));
    }

    Ok(Some(format!(" COLLATE {}", collation)))
}

/// Lifecycle statements issued over one live handle
pub struct DatabaseLifecycle<'a> {
    conn: &'a mut dyn SqlExecutor,
    quoter: &'a dyn IdentifierQuoter,
}

impl<'a> DatabaseLifecycle<'a> {
    pub fn new(conn: &'a mut dyn SqlExecutor, quoter: &'a dyn IdentifierQuoter) -> Self {
        Self { conn, quoter }
    }

    pub async fn create_database(&mut self, database: &str, options: &CreateOptions) -> Result<(), DatabaseError> {
        let name = self.quoter.quote_database_name(database);
        let sql = format!("CREATE DATABASE {}{}", name, options.to_clause()?);
        tracing::info!(database, "creating database");
        self.conn.execute(&sql).await
    }

    pub async fn drop_database(&mut self, database: &str) -> Result<(), DatabaseError> {
        let name = self.quoter.quote_database_name(database);
        tracing::info!(database, "dropping database");
        self.conn.execute(&format!("DROP DATABASE {}", name)).await
    }

    pub async fn current_database(&mut self) -> Result<String, DatabaseError> {
        self.scalar_string("SELECT DB_NAME()").await
    }

    pub async fn charset(&mut self) -> Result<String, DatabaseError> {
        self.scalar_string("SELECT DATABASEPROPERTYEX(DB_NAME(), 'SqlCharSetName')")
            .await
    }

    pub async fn collation(&mut self) -> Result<String, DatabaseError> {
        self.scalar_string("SELECT DATABASEPROPERTYEX(DB_NAME(), 'Collation')")
            .await
    }

    /// DATABASEPROPERTYEX returns sql_variant, so the value is cast first
    async fn scalar_string(&mut self, sql: &str) -> Result<String, DatabaseError> {
        let query = format!("SELECT CAST(({}) AS nvarchar(128))", sql);
        let value = self.conn.select_value(&query).await?;
        value
            .and_then(|v| v.as_text())
            .ok_or_else(|| DatabaseError::statement(format!("No value returned for: {}", sql)))
    }
}
