use std::fmt;

use async_trait::async_trait;
use betflow_core::Result;
use serde::{Deserialize, Serialize};

/// Fully qualified destination table, `dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows: usize,
    /// The table schema was created or evolved by this load.
    pub schema_changed: bool,
}

/// A table store that appends rows in one load job.
///
/// A load either commits all of `rows` or none of them. Tables that do not exist are
/// created from the rows, and existing schemas are evolved additively.
#[async_trait]
pub trait TableClient: Send + Sync {
    async fn load(&self, table: &TableRef, rows: &[serde_json::Value]) -> Result<LoadStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_qualified_name() {
        assert_eq!(TableRef::new("casino", "transactions").to_string(), "casino.transactions");
    }
}
