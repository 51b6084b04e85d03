//! Beacon Store - read-only telemetry store adapter
//!
//! Exports read telemetry through [`TelemetryStore`], a cursor-paginated
//! query interface. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: an in-process columnar store for logs and spans
//! - [`ScriptedStore`]: replays a fixed sequence of pages

pub mod cursor;
pub mod memory;
pub mod query;
pub mod scripted;

pub use cursor::SortValue;
pub use memory::{LogRecord, MemoryStore, SpanRecord};
pub use query::{
    Cursor, Direction, FieldContext, FieldDataType, FieldKey, OrderBy, Page, QueryContext,
    StoreQuery, TelemetryStore,
};
pub use scripted::ScriptedStore;
