// src/db/mod.rs
// Record persistence: connection pool, schema, and the Memory Record Store

pub mod pool;
pub mod records;
pub mod schema;

pub use pool::DatabasePool;
pub use records::{MemoryId, MemoryRecord, RecordState, RecordStore};
