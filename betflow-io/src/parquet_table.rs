#![cfg(feature = "parquet")]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use betflow_core::Result;
use parking_lot::Mutex;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use tracing::debug;

use crate::schema::{ColumnKind, TableSchema};
use crate::table::{LoadStats, TableClient, TableRef};

const SCHEMA_FILE: &str = "_schema.json";

#[derive(Clone, Debug)]
pub struct ParquetTableConfig {
    /// Root directory; each table lives in `{warehouse}/{dataset}/{table}`.
    pub warehouse: PathBuf,
    /// Optional compression: none|snappy|zstd (default: snappy)
    pub compression: Option<String>,
}

impl Default for ParquetTableConfig {
    fn default() -> Self {
        Self {
            warehouse: PathBuf::from("./warehouse"),
            compression: Some("snappy".into()),
        }
    }
}

/// Local warehouse of Parquet tables. Every load becomes one immutable part file, so a
/// load is visible completely or not at all; the table schema sits next to the parts.
#[derive(Clone)]
pub struct ParquetTable {
    cfg: ParquetTableConfig,
    // serializes loads in this process and numbers part files
    seq: Arc<Mutex<u64>>,
}

impl ParquetTable {
    pub fn new(cfg: ParquetTableConfig) -> Self {
        Self {
            cfg,
            seq: Arc::new(Mutex::new(0)),
        }
    }

    pub fn table_dir(&self, table: &TableRef) -> PathBuf {
        self.cfg.warehouse.join(&table.dataset).join(&table.table)
    }

    /// Current schema of a table, `None` when it was never loaded.
    pub fn read_schema(&self, table: &TableRef) -> Result<Option<TableSchema>> {
        let path = self.table_dir(table).join(SCHEMA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn load_blocking(&self, table: &TableRef, rows: &[Value]) -> Result<LoadStats> {
        if rows.is_empty() {
            return Ok(LoadStats::default());
        }
        let mut seq = self.seq.lock();
        let name = table.to_string();
        let incoming = TableSchema::infer(&name, rows)?;
        let dir = self.table_dir(table);
        std::fs::create_dir_all(&dir)?;

        let existing = self.read_schema(table)?;
        let schema = match &existing {
            Some(current) => current.evolve(&name, &incoming)?,
            None => incoming,
        };
        let schema_changed = existing.as_ref() != Some(&schema);
        let batch = build_batch(&schema, rows)?;

        // schema first: it only ever grows, so a failed part write leaves it valid
        if schema_changed {
            write_atomic(&dir.join(SCHEMA_FILE), serde_json::to_string_pretty(&schema)?.as_bytes())?;
        }
        *seq += 1;
        let fname = format!("part-{}-{:06}.parquet", chrono::Utc::now().timestamp_millis(), *seq);
        let path = dir.join(fname);
        self.write_part(&path, &batch)?;
        debug!(table = %name, rows = rows.len(), path = %path.display(), "part file written");
        Ok(LoadStats {
            rows: rows.len(),
            schema_changed,
        })
    }

    fn write_part(&self, path: &Path, batch: &RecordBatch) -> Result<()> {
        let tmp = path.with_extension("parquet.tmp");
        let file = std::fs::File::create(&tmp)?;
        let mut builder = WriterProperties::builder();
        match self.cfg.compression.as_deref().unwrap_or("snappy").to_lowercase().as_str() {
            "snappy" => {
                builder = builder.set_compression(parquet::basic::Compression::SNAPPY);
            }
            "zstd" => {
                builder = builder.set_compression(parquet::basic::Compression::ZSTD(
                    parquet::basic::ZstdLevel::default(),
                ));
            }
            _ => {
                builder = builder.set_compression(parquet::basic::Compression::UNCOMPRESSED);
            }
        }
        let props = builder.build();
        let result = (|| -> anyhow::Result<()> {
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
            writer.write(batch)?;
            writer.close()?;
            Ok(())
        })();
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.context("parquet write").into());
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn arrow_schema(schema: &TableSchema) -> Schema {
    let fields: Vec<Field> = schema
        .columns()
        .iter()
        .map(|c| {
            let dt = match c.kind {
                ColumnKind::Boolean => DataType::Boolean,
                ColumnKind::Int64 => DataType::Int64,
                ColumnKind::Float64 => DataType::Float64,
                // placeholder until the column sees a value
                ColumnKind::Utf8 | ColumnKind::Null => DataType::Utf8,
            };
            Field::new(&c.name, dt, c.nullable)
        })
        .collect();
    Schema::new(fields)
}

fn build_batch(schema: &TableSchema, rows: &[Value]) -> Result<RecordBatch> {
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.columns().len());
    for col in schema.columns() {
        let cells = rows.iter().map(|r| r.get(&col.name).filter(|v| !v.is_null()));
        let array: ArrayRef = match col.kind {
            ColumnKind::Boolean => {
                let mut b = BooleanBuilder::with_capacity(rows.len());
                for v in cells {
                    b.append_option(v.and_then(Value::as_bool));
                }
                Arc::new(b.finish())
            }
            ColumnKind::Int64 => {
                let mut b = Int64Builder::with_capacity(rows.len());
                for v in cells {
                    b.append_option(v.and_then(Value::as_i64));
                }
                Arc::new(b.finish())
            }
            ColumnKind::Float64 => {
                let mut b = Float64Builder::with_capacity(rows.len());
                for v in cells {
                    b.append_option(v.and_then(Value::as_f64));
                }
                Arc::new(b.finish())
            }
            ColumnKind::Utf8 | ColumnKind::Null => {
                let mut b = StringBuilder::new();
                for v in cells {
                    match v {
                        Some(Value::String(s)) => b.append_value(s),
                        Some(other) => b.append_value(other.to_string()),
                        None => b.append_null(),
                    }
                }
                Arc::new(b.finish())
            }
        };
        arrays.push(array);
    }
    let batch = RecordBatch::try_new(Arc::new(arrow_schema(schema)), arrays).context("record batch")?;
    Ok(batch)
}

#[async_trait]
impl TableClient for ParquetTable {
    async fn load(&self, table: &TableRef, rows: &[Value]) -> Result<LoadStats> {
        let this = self.clone();
        let table = table.clone();
        let rows = rows.to_vec();
        tokio::task::spawn_blocking(move || this.load_blocking(&table, &rows))
            .await
            .context("parquet load task")?
    }
}
