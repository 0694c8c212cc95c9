// Database Drivers
// Contains the SQL Server implementation of the collaborator traits

pub mod mssql;

// Re-export driver types
pub use mssql::{MssqlConnection, MssqlConnector, MssqlDialect};
