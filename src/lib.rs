// Lifecycle tasks for SQL Server databases: create, drop, purge, identity
// reads, and schema-only structure dump/load

pub mod config;
pub mod db;
pub mod tasks;

pub use config::TasksConfig;
pub use db::{ConnectionConfig, DatabaseError, DumpDocument};
pub use tasks::SqlServerDatabaseTasks;
