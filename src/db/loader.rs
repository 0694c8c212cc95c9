// Structure Load
// Splits a dump script on GO lines and replays the batches in order

use crate::db::structure::BATCH_SEPARATOR;
use crate::db::traits::{DatabaseError, SqlExecutor};
use std::path::Path;

/// Split a script into batches on lines that hold only the separator.
///
/// Batches keep their original text, including blank ones between adjacent
/// separators. Only trailing text after the last separator that is empty
/// is dropped.
pub fn split_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for line in script.split_inclusive('\n') {
        if line.trim_end() == BATCH_SEPARATOR {
            batches.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

/// Execute batches one at a time, stopping at the first failure.
/// Returns the number of batches executed.
pub async fn load_batches(conn: &mut dyn SqlExecutor, batches: &[String]) -> Result<usize, DatabaseError> {
    for (index, batch) in batches.iter().enumerate() {
        tracing::debug!(index, "executing batch");
        conn.execute(batch)
            .await
            .map_err(|e| DatabaseError::LoadBatch {
                index,
                source: Box::new(e),
            })?;
    }
    Ok(batches.len())
}

/// Read a dump file and replay it against the connection
pub async fn load_file(conn: &mut dyn SqlExecutor, path: &Path) -> Result<usize, DatabaseError> {
    let script = tokio::fs::read_to_string(path).await?;
    let batches = split_batches(&script);
    let executed = load_batches(conn, &batches).await?;
    tracing::info!(path = %path.display(), batches = executed, "structure loaded");
    Ok(executed)
}
