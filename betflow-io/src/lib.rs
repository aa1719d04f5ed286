//! betflow-io: message sources and table sinks.
//! - `FileSource`, `ChannelSource` and (feature `kafka`) `KafkaSource` feed the executor
//! - `TableClient` loads rows into a table: `MemoryTable`, or `ParquetTable` (feature `parquet`)
//! - `SinkWriter` adapts a `TableClient` to the batch-level `Sink` boundary

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod offsets;
#[cfg(feature = "parquet")]
pub mod parquet_table;
pub mod schema;
pub mod source;
pub mod subscription;
pub mod table;
pub mod writer;

#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;
pub use memory::MemoryTable;
pub use offsets::OffsetTracker;
#[cfg(feature = "parquet")]
pub use parquet_table::{ParquetTable, ParquetTableConfig};
pub use schema::{ColumnKind, ColumnSchema, TableSchema};
pub use source::{AckLog, ChannelSource, FileSource};
pub use table::{LoadStats, TableClient, TableRef};
pub use writer::{SinkWriter, WriterOptions};
