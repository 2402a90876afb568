use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Rows and columns produced by a query or script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Count reported by a script; queries leave this unset.
    #[serde(default)]
    pub reported_rows: Option<u64>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self {
            columns,
            rows,
            reported_rows: None,
        }
    }

    /// The value recorded as `rows_affected`.
    pub fn row_count(&self) -> u64 {
        self.reported_rows.unwrap_or(self.rows.len() as u64)
    }

    pub fn truncate(&mut self, limit: usize) {
        self.rows.truncate(limit);
    }
}

/// A rendered export file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}
