// Database Module
// Collaborator traits, the SQL Server driver, and the pieces the tasks are
// built from: lifecycle statements, host classification, structure dump/load

pub mod connection;
pub mod drivers;
pub mod lifecycle;
pub mod loader;
pub mod locality;
pub mod structure;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionConfig, ADMIN_DATABASE, DEFAULT_COLLATION};
pub use drivers::{MssqlConnection, MssqlConnector, MssqlDialect};
pub use lifecycle::{CreateOptions, DatabaseLifecycle};
pub use loader::split_batches;
pub use locality::is_local_database;
pub use structure::{DumpDocument, StructureDumper, BATCH_SEPARATOR};
pub use traits::{CellValue, Connector, DatabaseError, IdentifierQuoter, SqlExecutor, SqlRow};
