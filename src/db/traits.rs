// Database Collaborator Traits
// Defines the seams the task layer talks to: statement execution, opening
// handles, and identifier quoting

use crate::db::connection::ConnectionConfig;
use std::fmt;

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server rejected a statement
    #[error("Statement error: {message}")]
    Statement { code: Option<u32>, message: String },

    #[error("Database '{database}' already exists")]
    DatabaseAlreadyExists { database: String, message: String },

    #[error("Structure load failed at batch {index}: {source}")]
    LoadBatch {
        index: usize,
        #[source]
        source: Box<DatabaseError>,
    },

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("No active connection")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// Build a statement error without a server error number
    pub fn statement(message: impl Into<String>) -> Self {
        DatabaseError::Statement {
            code: None,
            message: message.into(),
        }
    }

    /// Server message for statement errors
    pub fn message(&self) -> Option<&str> {
        match self {
            DatabaseError::Statement { message, .. } => Some(message),
            DatabaseError::DatabaseAlreadyExists { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Cell value in a result set
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl CellValue {
    /// Text form of the value, `None` for NULL
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            CellValue::Int(i) => Some(i.to_string()),
            CellValue::Float(f) => Some(f.to_string()),
            CellValue::String(s) => Some(s.clone()),
        }
    }

    /// Integer form of the value. Whole floats and numeric strings convert.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(i) => Some(*i),
            CellValue::Bool(b) => Some(i64::from(*b)),
            CellValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            CellValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

/// One row of a result set, addressable by column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    pub columns: Vec<String>,
    pub values: Vec<CellValue>,
}

impl SqlRow {
    pub fn new(columns: Vec<String>, values: Vec<CellValue>) -> Self {
        Self { columns, values }
    }

    /// Column lookup is case-insensitive, matching SQL Server's default
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_str(&self, column: &str) -> Option<String> {
        self.get(column).and_then(CellValue::as_text)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(CellValue::as_i64)
    }
}

/// Statement execution against one live database handle
#[async_trait::async_trait]
pub trait SqlExecutor: Send {
    /// Name of the database this handle was opened against
    fn database(&self) -> &str;

    /// Run a statement (or batch) and discard any rows
    async fn execute(&mut self, sql: &str) -> Result<(), DatabaseError>;

    /// Run a query and return the first result set
    async fn select_all(&mut self, sql: &str) -> Result<Vec<SqlRow>, DatabaseError>;

    /// First column of the first row, `None` when no rows came back
    async fn select_value(&mut self, sql: &str) -> Result<Option<CellValue>, DatabaseError> {
        let rows = self.select_all(sql).await?;
        Ok(rows.into_iter().next().and_then(|row| row.values.into_iter().next()))
    }
}

/// Opens database handles for a connection configuration
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn SqlExecutor>, DatabaseError>;
}

/// Dialect-specific escaping of names and literals
pub trait IdentifierQuoter: Send + Sync {
    fn quote_identifier(&self, ident: &str) -> String;

    fn quote_database_name(&self, name: &str) -> String {
        self.quote_identifier(name)
    }

    fn quote_string(&self, s: &str) -> String;
}
