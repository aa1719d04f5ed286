//! Table schemas detected from JSON rows, with additive evolution.
//!
//! Evolution rules:
//! - a column the table doesn't know yet is added as nullable
//! - a required column missing from (or null in) a batch becomes nullable
//! - a column that has only ever held nulls takes the first concrete kind it sees
//! - an Int64 column receiving floats is widened to Float64
//! - any other type change is a `SchemaConflict`; nothing is ever removed

use std::collections::HashMap;

use betflow_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Nothing but nulls so far; widens to any other kind.
    Null,
    Boolean,
    Int64,
    Float64,
    /// Strings; nested arrays and objects are stored as JSON text.
    Utf8,
}

impl ColumnKind {
    pub fn of(v: &Value) -> Self {
        match v {
            Value::Null => ColumnKind::Null,
            Value::Bool(_) => ColumnKind::Boolean,
            Value::Number(n) if n.is_i64() => ColumnKind::Int64,
            Value::Number(_) => ColumnKind::Float64,
            Value::String(_) | Value::Array(_) | Value::Object(_) => ColumnKind::Utf8,
        }
    }

    fn widen(self, other: ColumnKind) -> Option<ColumnKind> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (ColumnKind::Null, k) | (k, ColumnKind::Null) => Some(k),
            (ColumnKind::Int64, ColumnKind::Float64) | (ColumnKind::Float64, ColumnKind::Int64) => {
                Some(ColumnKind::Float64)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Null => "null",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Int64 => "int64",
            ColumnKind::Float64 => "float64",
            ColumnKind::Utf8 => "utf8",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<ColumnSchema>,
}

fn conflict(table: &str, column: &str, existing: ColumnKind, incoming: ColumnKind) -> Error {
    Error::SchemaConflict {
        table: table.to_string(),
        column: column.to_string(),
        existing: existing.as_str().to_string(),
        incoming: incoming.as_str().to_string(),
    }
}

impl TableSchema {
    /// Detects a schema from a batch of JSON objects. Columns keep first-seen order.
    pub fn infer(table: &str, rows: &[Value]) -> Result<Self> {
        // (name, kind, rows carrying the key, saw null)
        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut cols: Vec<(&str, ColumnKind, usize, bool)> = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let obj = row.as_object().ok_or_else(|| {
                anyhow::anyhow!("row {i} for {table} is not a JSON object")
            })?;
            for (name, v) in obj {
                let pos = *seen.entry(name.as_str()).or_insert_with(|| {
                    cols.push((name.as_str(), ColumnKind::Null, 0, false));
                    cols.len() - 1
                });
                let col = &mut cols[pos];
                col.2 += 1;
                let kind = ColumnKind::of(v);
                col.3 |= kind == ColumnKind::Null;
                col.1 = col.1.widen(kind).ok_or_else(|| conflict(table, name, col.1, kind))?;
            }
        }
        let columns = cols
            .into_iter()
            .map(|(name, kind, present, saw_null)| ColumnSchema {
                name: name.to_string(),
                kind,
                nullable: saw_null || present < rows.len(),
            })
            .collect();
        Ok(Self { columns })
    }

    /// Merges an incoming batch schema into this (existing) table schema.
    pub fn evolve(&self, table: &str, incoming: &TableSchema) -> Result<TableSchema> {
        let mut out = self.clone();
        for col in out.columns.iter_mut() {
            if incoming.column(&col.name).is_none() {
                col.nullable = true;
            }
        }
        for inc in &incoming.columns {
            match out.columns.iter_mut().find(|c| c.name == inc.name) {
                Some(existing) => {
                    existing.kind = existing
                        .kind
                        .widen(inc.kind)
                        .ok_or_else(|| conflict(table, &inc.name, existing.kind, inc.kind))?;
                    existing.nullable |= inc.nullable;
                }
                None => out.columns.push(ColumnSchema {
                    name: inc.name.clone(),
                    kind: inc.kind,
                    nullable: true,
                }),
            }
        }
        Ok(out)
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn col<'a>(s: &'a TableSchema, name: &str) -> &'a ColumnSchema {
        s.column(name).unwrap()
    }

    #[test]
    fn infers_kinds_and_nullability() {
        let rows = vec![
            json!({"uid": 1, "user_name": "A", "debit_amount": 0.0, "vip": true}),
            json!({"uid": 2, "user_name": "B", "debit_amount": 12.5, "user_phone": null}),
        ];
        let s = TableSchema::infer("casino.users", &rows).unwrap();
        assert_eq!(col(&s, "uid").kind, ColumnKind::Int64);
        assert!(!col(&s, "uid").nullable);
        assert_eq!(col(&s, "user_name").kind, ColumnKind::Utf8);
        assert_eq!(col(&s, "debit_amount").kind, ColumnKind::Float64);
        assert!(col(&s, "vip").nullable);
        assert_eq!(col(&s, "user_phone").kind, ColumnKind::Null);
        assert!(col(&s, "user_phone").nullable);
        let names: Vec<_> = s.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["uid", "user_name", "debit_amount", "vip", "user_phone"]);
    }

    #[test]
    fn mixed_numbers_widen_within_a_batch() {
        let rows = vec![json!({"x": 1}), json!({"x": 1.5})];
        let s = TableSchema::infer("t", &rows).unwrap();
        assert_eq!(col(&s, "x").kind, ColumnKind::Float64);
    }

    #[test]
    fn conflicting_types_within_a_batch_fail() {
        let rows = vec![json!({"x": 1}), json!({"x": "one"})];
        let err = TableSchema::infer("t", &rows).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { ref column, .. } if column == "x"));
    }

    #[test]
    fn non_object_rows_are_rejected() {
        assert!(TableSchema::infer("t", &[json!([1, 2])]).is_err());
    }

    #[test]
    fn evolution_adds_relaxes_and_widens() {
        let table = TableSchema::infer("t", &[json!({"uid": 1, "amount": 3, "name": "A"})]).unwrap();
        let batch = TableSchema::infer("t", &[json!({"uid": 2, "amount": 2.5, "currency": "EUR"})]).unwrap();
        let evolved = table.evolve("t", &batch).unwrap();
        assert_eq!(col(&evolved, "amount").kind, ColumnKind::Float64);
        assert!(col(&evolved, "name").nullable, "missing column must be relaxed");
        assert!(!col(&evolved, "uid").nullable);
        let added = col(&evolved, "currency");
        assert!(added.nullable, "new columns are optional");
        assert_eq!(evolved.columns().len(), 4);
    }

    #[test]
    fn evolution_refuses_destructive_changes() {
        let table = TableSchema::infer("t", &[json!({"uid": 1})]).unwrap();
        let batch = TableSchema::infer("t", &[json!({"uid": "one"})]).unwrap();
        assert!(matches!(table.evolve("t", &batch), Err(Error::SchemaConflict { .. })));
    }

    #[test]
    fn float_column_accepts_integers() {
        let table = TableSchema::infer("t", &[json!({"x": 1.5})]).unwrap();
        let batch = TableSchema::infer("t", &[json!({"x": 2})]).unwrap();
        assert_eq!(col(&table.evolve("t", &batch).unwrap(), "x").kind, ColumnKind::Float64);
    }

    #[test]
    fn nulls_only_relax_a_typed_column() {
        let table = TableSchema::infer("t", &[json!({"bonus": 2.5})]).unwrap();
        let batch = TableSchema::infer("t", &[json!({"bonus": null})]).unwrap();
        let evolved = table.evolve("t", &batch).unwrap();
        assert_eq!(col(&evolved, "bonus").kind, ColumnKind::Float64);
        assert!(col(&evolved, "bonus").nullable);
    }

    #[test]
    fn all_null_column_takes_the_first_concrete_kind() {
        let table = TableSchema::infer("t", &[json!({"uid": 1, "bonus": null})]).unwrap();
        assert_eq!(col(&table, "bonus").kind, ColumnKind::Null);
        let batch = TableSchema::infer("t", &[json!({"uid": 2, "bonus": 4})]).unwrap();
        let evolved = table.evolve("t", &batch).unwrap();
        assert_eq!(col(&evolved, "bonus").kind, ColumnKind::Int64);
        assert!(col(&evolved, "bonus").nullable);

        let later = TableSchema::infer("t", &[json!({"uid": 3, "bonus": "big"})]).unwrap();
        assert!(matches!(evolved.evolve("t", &later), Err(Error::SchemaConflict { .. })));
    }

    #[test]
    fn null_between_values_keeps_the_batch_kind() {
        let rows = vec![json!({"x": 1}), json!({"x": null}), json!({"x": 2.5})];
        let s = TableSchema::infer("t", &rows).unwrap();
        assert_eq!(col(&s, "x").kind, ColumnKind::Float64);
        assert!(col(&s, "x").nullable);
    }
}
