// Test doubles for the collaborator traits
// Record every statement and replay scripted rows or server errors

use crate::db::connection::ConnectionConfig;
use crate::db::traits::{CellValue, Connector, DatabaseError, SqlExecutor, SqlRow};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Connect(String),
    Sql { database: String, sql: String },
}

#[derive(Default)]
pub struct Script {
    log: Vec<Recorded>,
    responses: Vec<(String, Vec<SqlRow>)>,
    failures: Vec<(String, Option<u32>, String)>,
    connect_failures: Vec<String>,
}

impl Script {
    fn failure_for(&self, sql: &str) -> Option<DatabaseError> {
        self.failures
            .iter()
            .find(|(pattern, _, _)| sql.contains(pattern.as_str()))
            .map(|(_, code, message)| DatabaseError::Statement {
                code: *code,
                message: message.clone(),
            })
    }
}

pub type Shared = Arc<Mutex<Script>>;

fn lock(shared: &Shared) -> std::sync::MutexGuard<'_, Script> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scripting shared by the executor and connector fakes
pub trait Scripted {
    fn shared(&self) -> &Shared;

    /// Rows (single unnamed column per value) for queries containing `pattern`
    fn respond_to(&self, pattern: &str, rows: Vec<Vec<CellValue>>) {
        let rows = rows
            .into_iter()
            .map(|values| {
                let columns = (0..values.len()).map(|i| format!("col{}", i)).collect();
                SqlRow::new(columns, values)
            })
            .collect();
        self.respond_rows(pattern, rows);
    }

    fn respond_rows(&self, pattern: &str, rows: Vec<SqlRow>) {
        lock(self.shared()).responses.push((pattern.to_string(), rows));
    }

    /// Statements containing `pattern` fail with a server error
    fn fail_on(&self, pattern: &str, message: &str) {
        self.fail_with_code(pattern, None, message);
    }

    fn fail_with_code(&self, pattern: &str, code: Option<u32>, message: &str) {
        lock(self.shared())
            .failures
            .push((pattern.to_string(), code, message.to_string()));
    }

    fn log(&self) -> Vec<Recorded> {
        lock(self.shared()).log.clone()
    }

    /// Every SQL text issued, in order
    fn statements(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                Recorded::Sql { sql, .. } => Some(sql),
                Recorded::Connect(_) => None,
            })
            .collect()
    }
}

pub struct RecordingExecutor {
    database: String,
    shared: Shared,
}

impl RecordingExecutor {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            shared: Shared::default(),
        }
    }

    fn record(&self, sql: &str) -> Option<DatabaseError> {
        let mut script = lock(&self.shared);
        script.log.push(Recorded::Sql {
            database: self.database.clone(),
            sql: sql.to_string(),
        });
        script.failure_for(sql)
    }
}

impl Scripted for RecordingExecutor {
    fn shared(&self) -> &Shared {
        &self.shared
    }
}

#[async_trait::async_trait]
impl SqlExecutor for RecordingExecutor {
    fn database(&self) -> &str {
        &self.database
    }

    async fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        match self.record(sql) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn select_all(&mut self, sql: &str) -> Result<Vec<SqlRow>, DatabaseError> {
        if let Some(err) = self.record(sql) {
            return Err(err);
        }

        let script = lock(&self.shared);
        if let Some((_, rows)) = script
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Ok(rows.clone());
        }

        if sql.contains("(SELECT DB_NAME())") {
            return Ok(vec![SqlRow::new(
                vec!["col0".to_string()],
                vec![CellValue::String(self.database.clone())],
            )]);
        }

        Ok(Vec::new())
    }
}

/// Hands out recording executors that share one log and script
#[derive(Clone, Default)]
pub struct RecordingConnector {
    shared: Shared,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect_to(&self, database: &str) {
        lock(&self.shared)
            .connect_failures
            .push(database.to_string());
    }

    /// Databases handles were opened against, in order
    pub fn connections(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                Recorded::Connect(database) => Some(database),
                Recorded::Sql { .. } => None,
            })
            .collect()
    }

    pub fn statements_on(&self, database: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                Recorded::Sql { database: db, sql } if db == database => Some(sql),
                _ => None,
            })
            .collect()
    }
}

impl Scripted for RecordingConnector {
    fn shared(&self) -> &Shared {
        &self.shared
    }
}

#[async_trait::async_trait]
impl Connector for RecordingConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn SqlExecutor>, DatabaseError> {
        let mut script = lock(&self.shared);
        script.log.push(Recorded::Connect(config.database.clone()));
        if script.connect_failures.contains(&config.database) {
            return Err(DatabaseError::ConnectionFailed(format!(
                "Cannot open database \"{}\" requested by the login",
                config.database
            )));
        }

        Ok(Box::new(RecordingExecutor {
            database: config.database.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }
}
