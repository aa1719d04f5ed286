use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use betflow_core::Result;
use parking_lot::Mutex;
use serde_json::Value;

use crate::schema::TableSchema;
use crate::table::{LoadStats, TableClient, TableRef};

#[derive(Debug, Default)]
struct StoredTable {
    schema: TableSchema,
    rows: Vec<Value>,
}

/// In-process table store. Clones share the same tables, so a test can keep one
/// handle and give the other to a writer.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    tables: Arc<Mutex<HashMap<TableRef, StoredTable>>>,
    load_calls: Arc<AtomicUsize>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, table: &TableRef) -> Vec<Value> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn schema(&self, table: &TableRef) -> Option<TableSchema> {
        self.tables.lock().get(table).map(|t| t.schema.clone())
    }

    /// Number of `load` calls, failed ones included.
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableClient for MemoryTable {
    async fn load(&self, table: &TableRef, rows: &[Value]) -> Result<LoadStats> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let name = table.to_string();
        let incoming = TableSchema::infer(&name, rows)?;
        let mut tables = self.tables.lock();
        let (schema, created) = match tables.get(table) {
            Some(existing) => (existing.schema.evolve(&name, &incoming)?, false),
            None => (incoming, true),
        };
        let stored = tables.entry(table.clone()).or_default();
        let schema_changed = created || stored.schema != schema;
        stored.schema = schema;
        stored.rows.extend_from_slice(rows);
        Ok(LoadStats {
            rows: rows.len(),
            schema_changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use betflow_core::Error;
    use serde_json::json;

    #[tokio::test]
    async fn creates_then_appends() {
        let store = MemoryTable::new();
        let t = TableRef::new("casino", "users");
        let first = store.load(&t, &[json!({"uid": 1, "user_name": "A"})]).await.unwrap();
        assert!(first.schema_changed);
        let second = store.load(&t, &[json!({"uid": 2, "user_name": "B"})]).await.unwrap();
        assert!(!second.schema_changed);
        assert_eq!(store.rows(&t).len(), 2);
        assert_eq!(store.load_calls(), 2);
    }

    #[tokio::test]
    async fn conflicting_load_commits_nothing() {
        let store = MemoryTable::new();
        let t = TableRef::new("casino", "users");
        store.load(&t, &[json!({"uid": 1})]).await.unwrap();
        let err = store.load(&t, &[json!({"uid": "x"}), json!({"uid": 3})]).await;
        assert!(matches!(err, Err(Error::SchemaConflict { .. })));
        assert_eq!(store.rows(&t), vec![json!({"uid": 1})]);
        assert_eq!(store.load_calls(), 2);
    }

    #[tokio::test]
    async fn evolves_on_new_columns() {
        let store = MemoryTable::new();
        let t = TableRef::new("casino", "transactions");
        store.load(&t, &[json!({"uid": 1})]).await.unwrap();
        let stats = store.load(&t, &[json!({"uid": 2, "bonus": 5.0})]).await.unwrap();
        assert!(stats.schema_changed);
        let schema = store.schema(&t).unwrap();
        assert!(schema.column("bonus").unwrap().nullable);
    }

    #[tokio::test]
    async fn null_cells_never_conflict_with_a_typed_column() {
        let store = MemoryTable::new();
        let typed = TableRef::new("casino", "typed_first");
        store.load(&typed, &[json!({"bonus": 2.5})]).await.unwrap();
        store.load(&typed, &[json!({"bonus": null})]).await.unwrap();
        assert_eq!(store.rows(&typed).len(), 2);

        let nulls = TableRef::new("casino", "null_first");
        store.load(&nulls, &[json!({"bonus": null})]).await.unwrap();
        store.load(&nulls, &[json!({"bonus": 2.5})]).await.unwrap();
        let col = store.schema(&nulls).unwrap().column("bonus").cloned().unwrap();
        assert_eq!(col.kind, crate::ColumnKind::Float64);
        assert!(col.nullable);
    }
}
