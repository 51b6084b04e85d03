//! In-memory columnar telemetry store
//!
//! Logs and spans live in per-tenant column tables. Queries scan the time
//! range, apply the filter expression, sort by the requested keys and page
//! with key cursors, so the paging contract matches what a remote columnar
//! store provides.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use beacon_common::{Error, OrgId, RawRow, Result, Signal, Value};
use beacon_expr::{CompileOptions, Expression};

use crate::cursor::{self, SortValue};
use crate::query::{
    Direction, FieldContext, FieldKey, Page, QueryContext, StoreQuery, TelemetryStore,
};

/// Rows scanned between cancellation checks
const CHECK_INTERVAL: usize = 1024;

/// Supported column types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Utf8,
    Int64,
    UInt64,
    /// Nanoseconds since epoch, projected as a timestamp
    Timestamp,
    /// String to string map
    Map,
}

#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: &'static str,
    pub data_type: DataType,
}

/// Schema definition for a telemetry table
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: &'static str,
    pub fields: Vec<FieldDefinition>,
    /// Column holding the row time in nanoseconds
    pub time_column: &'static str,
}

impl TableSchema {
    fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Column data as typed vectors
#[derive(Debug, Clone)]
pub enum ColumnData {
    Utf8(Vec<Option<String>>),
    Int64(Vec<Option<i64>>),
    UInt64(Vec<Option<u64>>),
    Timestamp(Vec<u64>),
    Map(Vec<BTreeMap<String, String>>),
}

impl ColumnData {
    fn new(data_type: DataType) -> Self {
        match data_type {
            DataType::Utf8 => ColumnData::Utf8(Vec::new()),
            DataType::Int64 => ColumnData::Int64(Vec::new()),
            DataType::UInt64 => ColumnData::UInt64(Vec::new()),
            DataType::Timestamp => ColumnData::Timestamp(Vec::new()),
            DataType::Map => ColumnData::Map(Vec::new()),
        }
    }

    fn value(&self, row: usize) -> Value {
        match self {
            ColumnData::Utf8(col) => col[row].clone().map_or(Value::Null, Value::String),
            ColumnData::Int64(col) => col[row].map_or(Value::Null, Value::Int),
            ColumnData::UInt64(col) => col[row].map_or(Value::Null, Value::UInt),
            #[allow(clippy::cast_possible_wrap)]
            ColumnData::Timestamp(col) => Value::Timestamp(Utc.timestamp_nanos(col[row] as i64)),
            ColumnData::Map(col) => Value::Json(serde_json::Value::Object(
                col[row]
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect(),
            )),
        }
    }

    fn map(&self, row: usize) -> Option<&BTreeMap<String, String>> {
        match self {
            ColumnData::Map(col) => col.get(row),
            _ => None,
        }
    }
}

/// In-memory columnar data storage
#[derive(Debug, Default)]
pub struct TableData {
    pub columns: HashMap<&'static str, ColumnData>,
    pub row_count: usize,
}

/// Simple columnar table for one (tenant, signal)
#[derive(Debug)]
pub struct ColumnTable {
    pub schema: TableSchema,
    pub data: RwLock<TableData>,
}

impl ColumnTable {
    pub fn new(schema: TableSchema) -> Self {
        let columns = schema
            .fields
            .iter()
            .map(|f| (f.name, ColumnData::new(f.data_type)))
            .collect();
        Self {
            schema,
            data: RwLock::new(TableData {
                columns,
                row_count: 0,
            }),
        }
    }

    pub fn row_count(&self) -> usize {
        self.data.read().row_count
    }
}

/// A log record to ingest
#[derive(Debug, Clone, Default)]
pub struct LogRecord {
    pub timestamp_ns: u64,
    pub id: String,
    pub body: String,
    pub severity_text: Option<String>,
    pub severity_number: Option<i64>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub resources: BTreeMap<String, String>,
}

/// A span to ingest
#[derive(Debug, Clone, Default)]
pub struct SpanRecord {
    pub timestamp_ns: u64,
    pub span_id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: i64,
    pub duration_nano: u64,
    pub status_code: i64,
    pub attributes: BTreeMap<String, String>,
    pub resources: BTreeMap<String, String>,
}

/// Central in-memory store, partitioned by tenant and signal
#[derive(Default)]
pub struct MemoryStore {
    tables: DashMap<(OrgId, Signal), Arc<ColumnTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, org_id: &str, signal: Signal) -> Arc<ColumnTable> {
        self.tables
            .entry((org_id.to_string(), signal))
            .or_insert_with(|| {
                Arc::new(ColumnTable::new(match signal {
                    Signal::Traces => trace_schema(),
                    Signal::Logs | Signal::Metrics => log_schema(),
                }))
            })
            .clone()
    }

    /// Number of stored rows for a tenant and signal
    pub fn row_count(&self, org_id: &str, signal: Signal) -> usize {
        self.tables
            .get(&(org_id.to_string(), signal))
            .map_or(0, |t| t.row_count())
    }

    pub fn insert_logs(&self, org_id: &str, logs: &[LogRecord]) {
        let table = self.table(org_id, Signal::Logs);
        let mut data = table.data.write();

        for log in logs {
            push_time(&mut data, "timestamp", log.timestamp_ns);
            push_str(&mut data, "id", Some(log.id.clone()));
            push_str(&mut data, "body", Some(log.body.clone()));
            push_str(&mut data, "severity_text", log.severity_text.clone());
            push_i64(&mut data, "severity_number", log.severity_number);
            push_str(&mut data, "trace_id", log.trace_id.clone());
            push_str(&mut data, "span_id", log.span_id.clone());
            push_map(&mut data, "attributes", log.attributes.clone());
            push_map(&mut data, "resources", log.resources.clone());
            data.row_count += 1;
        }
    }

    pub fn insert_spans(&self, org_id: &str, spans: &[SpanRecord]) {
        let table = self.table(org_id, Signal::Traces);
        let mut data = table.data.write();

        for span in spans {
            push_time(&mut data, "timestamp", span.timestamp_ns);
            push_str(&mut data, "id", Some(span.span_id.clone()));
            push_str(&mut data, "trace_id", Some(span.trace_id.clone()));
            push_str(&mut data, "parent_span_id", span.parent_span_id.clone());
            push_str(&mut data, "name", Some(span.name.clone()));
            push_i64(&mut data, "kind", Some(span.kind));
            if let Some(ColumnData::UInt64(col)) = data.columns.get_mut("duration_nano") {
                col.push(Some(span.duration_nano));
            }
            push_i64(&mut data, "status_code", Some(span.status_code));
            push_map(&mut data, "attributes", span.attributes.clone());
            push_map(&mut data, "resources", span.resources.clone());
            data.row_count += 1;
        }
    }
}

fn push_time(data: &mut TableData, column: &str, value: u64) {
    if let Some(ColumnData::Timestamp(col)) = data.columns.get_mut(column) {
        col.push(value);
    }
}

fn push_str(data: &mut TableData, column: &str, value: Option<String>) {
    if let Some(ColumnData::Utf8(col)) = data.columns.get_mut(column) {
        col.push(value);
    }
}

fn push_i64(data: &mut TableData, column: &str, value: Option<i64>) {
    if let Some(ColumnData::Int64(col)) = data.columns.get_mut(column) {
        col.push(value);
    }
}

fn push_map(data: &mut TableData, column: &str, value: BTreeMap<String, String>) {
    if let Some(ColumnData::Map(col)) = data.columns.get_mut(column) {
        col.push(value);
    }
}

/// Resolves field keys against one table snapshot
struct Resolver<'a> {
    schema: &'a TableSchema,
    data: &'a TableData,
}

impl Resolver<'_> {
    fn attribute(&self, map_column: &str, row: usize, name: &str) -> Option<Value> {
        self.data
            .columns
            .get(map_column)
            .and_then(|c| c.map(row))
            .and_then(|m| m.get(name))
            .map(|v| Value::String(v.clone()))
    }

    fn resolve(&self, row: usize, key: &FieldKey) -> Value {
        let value = match key.field_context {
            Some(FieldContext::Attribute) => self.attribute("attributes", row, &key.name),
            Some(FieldContext::Resource) => self.attribute("resources", row, &key.name),
            _ => match self.schema.field(&key.name) {
                Some(field) => self
                    .data
                    .columns
                    .get(field.name)
                    .map(|c| c.value(row)),
                None => self
                    .attribute("attributes", row, &key.name)
                    .or_else(|| self.attribute("resources", row, &key.name)),
            },
        };
        value.unwrap_or(Value::Null)
    }

    fn time(&self, row: usize) -> u64 {
        match self.data.columns.get(self.schema.time_column) {
            Some(ColumnData::Timestamp(col)) => col[row],
            _ => 0,
        }
    }

    /// Label view over the keys a filter references
    fn filter_labels(&self, row: usize, keys: &[FieldKey]) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        for key in keys {
            let text = match self.resolve(row, key) {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Int(v) => v.to_string(),
                Value::UInt(v) => v.to_string(),
                Value::Float(v) => v.to_string(),
                Value::Bool(v) => v.to_string(),
                Value::Timestamp(ts) => ts.timestamp_nanos_opt().unwrap_or_default().to_string(),
                Value::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
                Value::Json(v) => v.to_string(),
            };
            labels.insert(key.to_string(), text);
        }
        labels
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn query(&self, ctx: &QueryContext, query: &StoreQuery) -> Result<Page> {
        ctx.check()?;
        if query.signal == Signal::Metrics {
            return Err(Error::Unsupported("metrics are not stored in the memory store".into()));
        }

        debug!(
            org_id = %query.org_id,
            signal = %query.signal,
            limit = query.limit,
            max_threads = ctx.max_threads(),
            "memory store query"
        );

        let Some(table) = self
            .tables
            .get(&(query.org_id.clone(), query.signal))
            .map(|t| Arc::clone(t.value()))
        else {
            return Ok(Page::new(Vec::new(), query.cursor.clone()));
        };

        let filter = match query.filter.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let expr = Expression::compile_with(text, &CompileOptions::filter())?;
                let keys = expr
                    .ast()
                    .referenced_keys()
                    .into_iter()
                    .map(FieldKey::parse)
                    .collect::<Result<Vec<_>>>()?;
                Some((expr, keys))
            }
            _ => None,
        };

        let directions: Vec<Direction> = query.order_by.iter().map(|o| o.direction).collect();
        let after = cursor::decode(&query.cursor, query.order_by.len())?;

        let data = table.data.read();
        let resolver = Resolver {
            schema: &table.schema,
            data: &data,
        };

        let mut candidates: Vec<(Vec<SortValue>, usize)> = Vec::new();
        for row in 0..data.row_count {
            if row % CHECK_INTERVAL == 0 {
                ctx.check()?;
            }

            let ts = resolver.time(row);
            if ts < query.start_ns || ts >= query.end_ns {
                continue;
            }
            if let Some((expr, keys)) = &filter {
                if !expr.matches(&resolver.filter_labels(row, keys)) {
                    continue;
                }
            }

            let key: Vec<SortValue> = query
                .order_by
                .iter()
                .map(|o| SortValue::from(&resolver.resolve(row, &o.key)))
                .collect();
            if let Some(after) = &after {
                if cursor::compare_keys(&key, after, &directions) != std::cmp::Ordering::Greater {
                    continue;
                }
            }
            candidates.push((key, row));
        }

        candidates.sort_by(|a, b| cursor::compare_keys(&a.0, &b.0, &directions));
        candidates.truncate(query.limit);

        let rows: Vec<RawRow> = candidates
            .iter()
            .map(|(_, row)| {
                query
                    .columns
                    .iter()
                    .map(|key| (key.to_string(), resolver.resolve(*row, key)))
                    .collect()
            })
            .collect();

        let next_cursor = match candidates.last() {
            Some((key, _)) => cursor::encode(key)?,
            None => query.cursor.clone(),
        };

        Ok(Page::new(rows, next_cursor))
    }
}

fn log_schema() -> TableSchema {
    TableSchema {
        name: "logs",
        fields: vec![
            FieldDefinition { name: "timestamp", data_type: DataType::Timestamp },
            FieldDefinition { name: "id", data_type: DataType::Utf8 },
            FieldDefinition { name: "body", data_type: DataType::Utf8 },
            FieldDefinition { name: "severity_text", data_type: DataType::Utf8 },
            FieldDefinition { name: "severity_number", data_type: DataType::Int64 },
            FieldDefinition { name: "trace_id", data_type: DataType::Utf8 },
            FieldDefinition { name: "span_id", data_type: DataType::Utf8 },
            FieldDefinition { name: "attributes", data_type: DataType::Map },
            FieldDefinition { name: "resources", data_type: DataType::Map },
        ],
        time_column: "timestamp",
    }
}

fn trace_schema() -> TableSchema {
    TableSchema {
        name: "traces",
        fields: vec![
            FieldDefinition { name: "timestamp", data_type: DataType::Timestamp },
            FieldDefinition { name: "id", data_type: DataType::Utf8 },
            FieldDefinition { name: "trace_id", data_type: DataType::Utf8 },
            FieldDefinition { name: "parent_span_id", data_type: DataType::Utf8 },
            FieldDefinition { name: "name", data_type: DataType::Utf8 },
            FieldDefinition { name: "kind", data_type: DataType::Int64 },
            FieldDefinition { name: "duration_nano", data_type: DataType::UInt64 },
            FieldDefinition { name: "status_code", data_type: DataType::Int64 },
            FieldDefinition { name: "attributes", data_type: DataType::Map },
            FieldDefinition { name: "resources", data_type: DataType::Map },
        ],
        time_column: "timestamp",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Cursor, OrderBy};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> QueryContext {
        QueryContext::new(Duration::from_secs(60), 2, CancellationToken::new())
    }

    fn log(ts: u64, id: &str, body: &str, severity: &str) -> LogRecord {
        LogRecord {
            timestamp_ns: ts,
            id: id.to_string(),
            body: body.to_string(),
            severity_text: Some(severity.to_string()),
            attributes: [("http.method".to_string(), "GET".to_string())].into(),
            resources: [("service.name".to_string(), "api".to_string())].into(),
            ..LogRecord::default()
        }
    }

    fn query(limit: usize, cursor: Cursor) -> StoreQuery {
        StoreQuery {
            org_id: "org1".into(),
            signal: Signal::Logs,
            start_ns: 0,
            end_ns: 1_000,
            filter: None,
            columns: vec![FieldKey::named("id"), FieldKey::named("body")],
            order_by: vec![
                OrderBy::new(FieldKey::named("timestamp"), Direction::Asc),
                OrderBy::new(FieldKey::named("id"), Direction::Asc),
            ],
            limit,
            cursor,
        }
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_logs(
            "org1",
            &[
                log(30, "c", "third", "INFO"),
                log(10, "a", "first", "INFO"),
                log(20, "b", "second", "ERROR"),
                log(20, "a2", "tie", "INFO"),
                log(5_000, "z", "out of range", "INFO"),
            ],
        );
        store
    }

    fn ids(page: &Page) -> Vec<String> {
        page.rows
            .iter()
            .map(|r| r.get("id").and_then(Value::as_str).unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_pages_follow_sort_and_cursor() {
        let store = seeded();
        assert_eq!(store.row_count("org1", Signal::Logs), 5);

        let first = store.query(&ctx(), &query(2, Cursor::start())).await.unwrap();
        assert_eq!(ids(&first), vec!["a", "a2"]);

        let second = store.query(&ctx(), &query(2, first.next_cursor.clone())).await.unwrap();
        assert_eq!(ids(&second), vec!["b", "c"]);

        let third = store.query(&ctx(), &query(2, second.next_cursor.clone())).await.unwrap();
        assert!(third.rows.is_empty());
    }

    #[tokio::test]
    async fn test_projection_order_and_context_lookup() {
        let store = seeded();
        let mut q = query(1, Cursor::start());
        q.columns = vec![
            FieldKey::parse("body").unwrap(),
            FieldKey::parse("resource.service.name").unwrap(),
            FieldKey::parse("http.method").unwrap(),
            FieldKey::parse("attribute.missing").unwrap(),
        ];
        let page = store.query(&ctx(), &q).await.unwrap();
        let row = &page.rows[0];
        let keys: Vec<_> = row.keys().collect();
        assert_eq!(keys, vec!["body", "resource.service.name", "http.method", "attribute.missing"]);
        assert_eq!(row.get("resource.service.name"), Some(&Value::from("api")));
        assert_eq!(row.get("http.method"), Some(&Value::from("GET")));
        assert_eq!(row.get("attribute.missing"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_filter_expression() {
        let store = seeded();
        let mut q = query(10, Cursor::start());
        q.filter = Some("severity_text == 'ERROR'".into());
        let page = store.query(&ctx(), &q).await.unwrap();
        assert_eq!(ids(&page), vec!["b"]);

        q.filter = Some("severity_text ==".into());
        let err = store.query(&ctx(), &q).await.unwrap_err();
        assert_eq!(err.kind(), beacon_common::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let store = seeded();
        let mut q = query(10, Cursor::start());
        q.org_id = "org2".into();
        let page = store.query(&ctx(), &q).await.unwrap();
        assert!(page.rows.is_empty());
    }

    #[tokio::test]
    async fn test_descending_order() {
        let store = seeded();
        let mut q = query(10, Cursor::start());
        q.order_by = vec![
            OrderBy::new(FieldKey::named("timestamp"), Direction::Desc),
            OrderBy::new(FieldKey::named("id"), Direction::Desc),
        ];
        let page = store.query(&ctx(), &q).await.unwrap();
        assert_eq!(ids(&page), vec!["c", "b", "a2", "a"]);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let store = seeded();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = QueryContext::new(Duration::from_secs(60), 2, token);
        let err = store.query(&ctx, &query(10, Cursor::start())).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_spans_project_timestamp() {
        let store = MemoryStore::new();
        store.insert_spans(
            "org1",
            &[SpanRecord {
                timestamp_ns: 1_000_000_000,
                span_id: "s1".into(),
                trace_id: "t1".into(),
                name: "GET /".into(),
                duration_nano: 42,
                ..SpanRecord::default()
            }],
        );
        let mut q = query(10, Cursor::start());
        q.signal = Signal::Traces;
        q.end_ns = u64::MAX;
        q.columns = vec![FieldKey::named("timestamp"), FieldKey::named("duration_nano")];
        let page = store.query(&ctx(), &q).await.unwrap();
        assert_eq!(
            page.rows[0].get("timestamp"),
            Some(&Value::Timestamp(Utc.timestamp_nanos(1_000_000_000)))
        );
        assert_eq!(page.rows[0].get("duration_nano"), Some(&Value::UInt(42)));
    }

    fn direction(desc: bool) -> Direction {
        if desc {
            Direction::Desc
        } else {
            Direction::Asc
        }
    }

    /// Page through everything and return each page's sort keys
    fn drain_pages(
        store: &MemoryStore,
        directions: [Direction; 2],
        limits: &[usize],
        max_pages: usize,
    ) -> Vec<Vec<Vec<SortValue>>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let mut pages = Vec::new();
            let mut cursor = Cursor::start();
            for &limit in limits.iter().cycle().take(max_pages) {
                let mut q = query(limit, cursor.clone());
                q.columns = vec![FieldKey::named("timestamp"), FieldKey::named("id")];
                q.order_by = vec![
                    OrderBy::new(FieldKey::named("timestamp"), directions[0]),
                    OrderBy::new(FieldKey::named("id"), directions[1]),
                ];
                let page = store.query(&ctx(), &q).await.unwrap();
                if page.rows.is_empty() {
                    break;
                }
                let keys = page
                    .rows
                    .iter()
                    .map(|row| {
                        ["timestamp", "id"]
                            .iter()
                            .map(|column| SortValue::from(row.get(column).unwrap_or(&Value::Null)))
                            .collect()
                    })
                    .collect();
                pages.push(keys);
                cursor = page.next_cursor;
            }
            pages
        })
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(48))]

        #[test]
        fn prop_cursor_pages_advance_strictly(
            timestamps in proptest::collection::vec(0u64..6, 0..40),
            limits in proptest::collection::vec(1usize..7, 1..8),
            timestamp_desc in proptest::prelude::any::<bool>(),
            id_desc in proptest::prelude::any::<bool>(),
        ) {
            let store = MemoryStore::new();
            let logs: Vec<LogRecord> = timestamps
                .iter()
                .enumerate()
                .map(|(i, &ts)| LogRecord {
                    timestamp_ns: ts,
                    id: format!("id{:03}", i),
                    ..LogRecord::default()
                })
                .collect();
            store.insert_logs("org1", &logs);

            let directions = [direction(timestamp_desc), direction(id_desc)];
            // every non-empty page yields a row, so one extra page reaches the end
            let pages = drain_pages(&store, directions, &limits, timestamps.len() + 1);

            let mut previous: Option<&Vec<SortValue>> = None;
            let mut seen = 0;
            for key in pages.iter().flatten() {
                if let Some(previous) = previous {
                    proptest::prop_assert_eq!(
                        cursor::compare_keys(key, previous, &directions),
                        std::cmp::Ordering::Greater
                    );
                }
                previous = Some(key);
                seen += 1;
            }
            proptest::prop_assert_eq!(seen, timestamps.len());
        }
    }
}
