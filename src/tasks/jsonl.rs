use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{BenchError, Result};

/// Read one record per non-blank line of a JSONL file
pub(crate) fn read_records<T: DeserializeOwned>(task: &str, path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| {
        BenchError::task(task, format!("failed to open data file {}: {}", path.display(), e))
    })?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record = serde_json::from_str(&line).map_err(|e| {
            BenchError::task(
                task,
                format!("{}:{}: malformed record: {}", path.display(), index + 1, e),
            )
        })?;
        records.push(record);
    }

    Ok(records)
}
