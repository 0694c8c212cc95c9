// MS-SQL Driver
// Implements the collaborator traits for SQL Server using tiberius

use crate::db::connection::ConnectionConfig;
use crate::db::traits::{CellValue, Connector, DatabaseError, IdentifierQuoter, SqlExecutor, SqlRow};
use tiberius::{Client, ColumnType, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type MssqlClient = Client<Compat<TcpStream>>;

impl From<tiberius::error::Error> for DatabaseError {
    fn from(err: tiberius::error::Error) -> Self {
        match &err {
            tiberius::error::Error::Server(e) => DatabaseError::Statement {
                code: Some(e.code()),
                message: e.message().to_string(),
            },
            _ => DatabaseError::statement(err.to_string()),
        }
    }
}

/// T-SQL identifier and literal quoting
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

impl IdentifierQuoter for MssqlDialect {
    /// `]` inside the name is escaped by doubling it
    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn quote_string(&self, s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }
}

/// Opens dedicated (non-pooled) tiberius connections
#[derive(Debug, Clone, Default)]
pub struct MssqlConnector;

impl MssqlConnector {
    pub fn new() -> Self {
        Self
    }

    async fn open_stream(addr: String) -> Result<Compat<TcpStream>, DatabaseError> {
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("TCP connection to {} failed: {}", addr, e)))?;

        tcp.set_nodelay(true)
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e)))?;

        Ok(tcp.compat_write())
    }

    async fn open_client(config: &ConnectionConfig) -> Result<MssqlClient, DatabaseError> {
        let tiberius_config = config.to_tiberius_config()?;
        let stream = Self::open_stream(tiberius_config.get_addr()).await?;

        match Client::connect(tiberius_config, stream).await {
            Ok(client) => Ok(client),
            // Azure SQL may redirect the login to another gateway
            Err(tiberius::error::Error::Routing { host, port }) => {
                tracing::debug!(%host, port, "login redirected");
                let mut redirected = config.to_tiberius_config()?;
                redirected.host(&host);
                redirected.port(port);
                let stream = Self::open_stream(format!("{}:{}", host, port)).await?;
                Client::connect(redirected, stream)
                    .await
                    .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))
            }
            Err(e) => Err(DatabaseError::ConnectionFailed(e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl Connector for MssqlConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn SqlExecutor>, DatabaseError> {
        tracing::debug!(host = %config.host, port = config.port, database = %config.database, "opening connection");
        let client = Self::open_client(config).await?;

        Ok(Box::new(MssqlConnection {
            database: config.database.clone(),
            client,
        }))
    }
}

/// A live connection bound to one database
pub struct MssqlConnection {
    database: String,
    client: MssqlClient,
}

#[async_trait::async_trait]
impl SqlExecutor for MssqlConnection {
    fn database(&self) -> &str {
        &self.database
    }

    async fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        // Empty batches are a no-op, no round trip
        if sql.trim().is_empty() {
            tracing::debug!("skipping empty batch");
            return Ok(());
        }

        tracing::debug!(sql, "execute");
        let stream = self.client.simple_query(sql).await?;
        stream.into_results().await?;
        Ok(())
    }

    async fn select_all(&mut self, sql: &str) -> Result<Vec<SqlRow>, DatabaseError> {
        tracing::debug!(sql, "select");
        let stream = self.client.simple_query(sql).await?;
        let rows = stream.into_first_result().await?;

        Ok(rows.iter().map(row_to_sql_row).collect())
    }
}

fn row_to_sql_row(row: &Row) -> SqlRow {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = (0..columns.len()).map(|idx| cell_value_from_row(row, idx)).collect();
    SqlRow::new(columns, values)
}

/// Extract cell value from row
fn cell_value_from_row(row: &Row, idx: usize) -> CellValue {
    let col_type = row
        .columns()
        .get(idx)
        .map(|c| c.column_type())
        .unwrap_or(ColumnType::Null);

    match col_type {
        ColumnType::Null => CellValue::Null,

        // Integer types
        ColumnType::Int1 => row
            .try_get::<u8, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int2 => row
            .try_get::<i16, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int4 => row
            .try_get::<i32, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int8 => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),
        // Nullable ints arrive as Intn whatever their width
        ColumnType::Intn => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .or_else(|| row.try_get::<i32, _>(idx).ok().flatten().map(i64::from))
            .or_else(|| row.try_get::<i16, _>(idx).ok().flatten().map(i64::from))
            .or_else(|| row.try_get::<u8, _>(idx).ok().flatten().map(i64::from))
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),

        // Float types
        ColumnType::Float4 => row
            .try_get::<f32, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Float(v as f64))
            .unwrap_or(CellValue::Null),
        ColumnType::Float8 => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),
        ColumnType::Floatn => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .or_else(|| row.try_get::<f32, _>(idx).ok().flatten().map(f64::from))
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),

        ColumnType::Decimaln | ColumnType::Numericn => row
            .try_get::<tiberius::numeric::Numeric, _>(idx)
            .ok()
            .flatten()
            .map(|n| CellValue::Float(f64::from(n)))
            .unwrap_or(CellValue::Null),

        ColumnType::Bit | ColumnType::Bitn => row
            .try_get::<bool, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),

        // String types
        ColumnType::BigVarChar
        | ColumnType::BigChar
        | ColumnType::NVarchar
        | ColumnType::NChar
        | ColumnType::Text
        | ColumnType::NText => row
            .try_get::<&str, _>(idx)
            .ok()
            .flatten()
            .map(|s| CellValue::String(s.to_string()))
            .unwrap_or(CellValue::Null),

        // Catalog queries only return text and numbers
        _ => CellValue::Null,
    }
}
