//! Export request parsing and validation
//!
//! Requests arrive either as GET query parameters or as a POST body in
//! query-range form. Both are reduced to one [`ExportRequest`] with the
//! row limit, projection and sort order already defaulted.

use serde::Deserialize;

use beacon_common::config::ExportConfig;
use beacon_common::{Error, Result, Signal, TimestampNanos};
use beacon_store::{Cursor, Direction, FieldKey, OrderBy, StoreQuery};

/// Body encoding of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Jsonl,
}

impl ExportFormat {
    /// Parse the `format` parameter; absent or empty means CSV
    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value.unwrap_or("") {
            "csv" | "" => Ok(ExportFormat::Csv),
            "jsonl" => Ok(ExportFormat::Jsonl),
            _ => Err(Error::invalid_input("invalid format: must be csv or jsonl")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Jsonl => "jsonl",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Jsonl => "application/x-ndjson",
        }
    }
}

/// A validated export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub signal: Signal,
    /// Inclusive
    pub start_ns: TimestampNanos,
    /// Exclusive
    pub end_ns: TimestampNanos,
    pub filter: Option<String>,
    pub columns: Vec<FieldKey>,
    pub order_by: Vec<OrderBy>,
    pub limit: usize,
}

impl ExportRequest {
    /// Build from GET query parameters, in request order.
    ///
    /// `columns` and `order_by` may repeat; the other parameters use their
    /// first occurrence.
    pub fn from_query_pairs(pairs: &[(String, String)], config: &ExportConfig) -> Result<Self> {
        let signal = parse_source(first_param(pairs, "source"))?;

        let (start, end) = match (first_param(pairs, "start"), first_param(pairs, "end")) {
            (Some(start), Some(end)) if !start.is_empty() && !end.is_empty() => (start, end),
            _ => return Err(Error::invalid_input("start and end time are required")),
        };
        let start_ns = start
            .parse::<u64>()
            .map_err(|e| Error::invalid_input(format!("invalid start time format: {}", e)))?;
        let end_ns = end
            .parse::<u64>()
            .map_err(|e| Error::invalid_input(format!("invalid end time format: {}", e)))?;

        let limit = match first_param(pairs, "limit").filter(|s| !s.is_empty()) {
            None => config.default_limit,
            Some(text) => {
                let limit = text
                    .parse::<i64>()
                    .map_err(|e| Error::invalid_input(format!("invalid limit format: {}", e)))?;
                validate_limit(limit, config)?
            }
        };

        let columns = all_params(pairs, "columns")
            .map(FieldKey::parse)
            .collect::<Result<Vec<_>>>()?;
        let order_by = all_params(pairs, "order_by")
            .map(OrderBy::parse)
            .collect::<Result<Vec<_>>>()?;

        let filter = first_param(pairs, "filter")
            .filter(|f| !f.trim().is_empty())
            .map(str::to_string);

        Self::build(signal, start_ns, end_ns, filter, columns, order_by, limit)
    }

    /// Build from a POST body
    pub fn from_json(body: &[u8], config: &ExportConfig) -> Result<Self> {
        let request: QueryRangeRequest = serde_json::from_slice(body)
            .map_err(|e| Error::invalid_input(format!("invalid request body: {}", e)))?;
        Self::from_query_range(request, config)
    }

    pub fn from_query_range(request: QueryRangeRequest, config: &ExportConfig) -> Result<Self> {
        let mut queries = request.composite_query.queries;
        if queries.len() > 1 {
            return Err(Error::invalid_input("multiple queries not allowed"));
        }
        let envelope = queries
            .pop()
            .ok_or_else(|| Error::invalid_input("composite query must contain a query"))?;

        if envelope.kind != "builder_query" {
            return Err(Error::invalid_input(format!(
                "unsupported query type: {}",
                envelope.kind
            )));
        }
        let spec: BuilderQuery = serde_json::from_value(envelope.spec)
            .map_err(|e| Error::invalid_input(format!("invalid builder query: {}", e)))?;

        if spec.signal == Signal::Metrics {
            return Err(Error::Unsupported("metrics export not yet supported".into()));
        }

        let limit = validate_limit(spec.limit, config)?;
        let filter = spec
            .filter
            .map(|f| f.expression)
            .filter(|e| !e.trim().is_empty());
        let order_by = spec
            .order
            .into_iter()
            .map(|o| OrderBy::new(o.key, o.direction))
            .collect();

        Self::build(
            spec.signal,
            request.start,
            request.end,
            filter,
            spec.select_fields,
            order_by,
            limit,
        )
    }

    fn build(
        signal: Signal,
        start_ns: TimestampNanos,
        end_ns: TimestampNanos,
        filter: Option<String>,
        columns: Vec<FieldKey>,
        order_by: Vec<OrderBy>,
        limit: usize,
    ) -> Result<Self> {
        if start_ns >= end_ns {
            return Err(Error::invalid_input("start time must be before end time"));
        }

        let columns = if columns.is_empty() {
            default_columns(signal)
        } else {
            columns
        };

        Ok(Self {
            signal,
            start_ns,
            end_ns,
            filter,
            columns,
            order_by: normalize_order(order_by),
            limit,
        })
    }

    /// The store read for one chunk of this export
    pub fn store_query(&self, org_id: &str, limit: usize, cursor: Cursor) -> StoreQuery {
        StoreQuery {
            org_id: org_id.to_string(),
            signal: self.signal,
            start_ns: self.start_ns,
            end_ns: self.end_ns,
            filter: self.filter.clone(),
            columns: self.columns.clone(),
            order_by: self.order_by.clone(),
            limit,
            cursor,
        }
    }
}

/// Apply the default and maximum row limits
pub fn validate_limit(limit: i64, config: &ExportConfig) -> Result<usize> {
    if limit == 0 {
        return Ok(config.default_limit);
    }
    if limit < 0 {
        return Err(Error::invalid_input("limit must be positive"));
    }
    match usize::try_from(limit) {
        Ok(limit) if limit <= config.max_limit => Ok(limit),
        _ => Err(Error::invalid_input(format!(
            "limit cannot be more than {}",
            config.max_limit
        ))),
    }
}

fn first_param<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Every non-blank value of a repeated parameter, trimmed
fn all_params<'a>(
    pairs: &'a [(String, String)],
    name: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    pairs
        .iter()
        .filter(move |(key, _)| key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

fn parse_source(value: Option<&str>) -> Result<Signal> {
    match value.unwrap_or("") {
        "logs" | "" => Ok(Signal::Logs),
        "traces" => Ok(Signal::Traces),
        "metrics" => Err(Error::Unsupported("metrics export not yet supported".into())),
        _ => Err(Error::invalid_input(
            "invalid source: must be logs, metrics or traces",
        )),
    }
}

fn default_columns(signal: Signal) -> Vec<FieldKey> {
    let names: &[&str] = match signal {
        Signal::Traces => &["timestamp", "id", "name"],
        _ => &["timestamp", "id", "body"],
    };
    names.iter().map(|name| FieldKey::named(*name)).collect()
}

/// Default to `timestamp, id` ascending; otherwise make `id` the final
/// tie-break so the sort is total.
fn normalize_order(mut order_by: Vec<OrderBy>) -> Vec<OrderBy> {
    let Some(last) = order_by.last() else {
        return vec![
            OrderBy::new(FieldKey::named("timestamp"), Direction::Asc),
            OrderBy::new(FieldKey::named("id"), Direction::Asc),
        ];
    };

    if !order_by.iter().any(|o| o.key.name == "id") {
        let direction = last.direction;
        order_by.push(OrderBy::new(FieldKey::named("id"), direction));
    }
    order_by
}

// ============================================================================
// Query-range body
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRangeRequest {
    pub start: u64,
    pub end: u64,
    #[serde(alias = "compositeQuery")]
    pub composite_query: CompositeQuery,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompositeQuery {
    #[serde(default)]
    pub queries: Vec<QueryEnvelope>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuilderQuery {
    pub signal: Signal,
    #[serde(default)]
    pub filter: Option<FilterSpec>,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub order: Vec<OrderSpec>,
    #[serde(default, alias = "selectFields")]
    pub select_fields: Vec<FieldKey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub expression: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderSpec {
    pub key: FieldKey,
    pub direction: Direction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn parse(items: &[(&str, &str)]) -> Result<ExportRequest> {
        ExportRequest::from_query_pairs(&pairs(items), &ExportConfig::default())
    }

    #[test]
    fn test_defaults() {
        let request = parse(&[("start", "1"), ("end", "2")]).unwrap();
        assert_eq!(request.signal, Signal::Logs);
        assert_eq!(request.limit, 10_000);
        assert_eq!(request.filter, None);
        let columns: Vec<String> = request.columns.iter().map(ToString::to_string).collect();
        assert_eq!(columns, ["timestamp", "id", "body"]);
        assert_eq!(
            request.order_by,
            vec![
                OrderBy::new(FieldKey::named("timestamp"), Direction::Asc),
                OrderBy::new(FieldKey::named("id"), Direction::Asc),
            ]
        );
    }

    #[test]
    fn test_trace_default_columns() {
        let request = parse(&[("source", "traces"), ("start", "1"), ("end", "2")]).unwrap();
        assert_eq!(request.signal, Signal::Traces);
        assert_eq!(request.columns[2], FieldKey::named("name"));
    }

    #[test]
    fn test_full_query() {
        let request = parse(&[
            ("source", "logs"),
            ("start", "100"),
            ("end", "200"),
            ("limit", "50"),
            ("filter", "severity_text == 'ERROR'"),
            ("columns", "timestamp"),
            ("columns", "  "),
            ("columns", "attribute.user:string"),
            ("order_by", "timestamp:desc"),
        ])
        .unwrap();

        assert_eq!(request.limit, 50);
        assert_eq!(request.filter.as_deref(), Some("severity_text == 'ERROR'"));
        assert_eq!(request.columns.len(), 2);
        assert_eq!(request.columns[1].to_string(), "attribute.user:string");
        assert_eq!(
            request.order_by,
            vec![
                OrderBy::new(FieldKey::named("timestamp"), Direction::Desc),
                OrderBy::new(FieldKey::named("id"), Direction::Desc),
            ]
        );
    }

    #[test]
    fn test_explicit_id_order_is_kept() {
        let request = parse(&[
            ("start", "1"),
            ("end", "2"),
            ("order_by", "id:desc"),
        ])
        .unwrap();
        assert_eq!(request.order_by, vec![OrderBy::new(FieldKey::named("id"), Direction::Desc)]);
    }

    #[rstest]
    #[case(&[("end", "2")], "start and end time are required")]
    #[case(&[("start", "x"), ("end", "2")], "invalid start time format")]
    #[case(&[("start", "2"), ("end", "2")], "start time must be before end time")]
    #[case(&[("start", "1"), ("end", "2"), ("limit", "-1")], "limit must be positive")]
    #[case(&[("start", "1"), ("end", "2"), ("limit", "50001")], "limit cannot be more than 50000")]
    #[case(&[("start", "1"), ("end", "2"), ("limit", "ten")], "invalid limit format")]
    #[case(&[("start", "1"), ("end", "2"), ("source", "events")], "invalid source")]
    #[case(&[("start", "1"), ("end", "2"), ("order_by", "timestamp")], "invalid order_by format")]
    #[case(&[("start", "1"), ("end", "2"), ("order_by", "timestamp:up")], "invalid order_by direction")]
    #[case(&[("start", "1"), ("end", "2"), ("columns", "attribute.:string")], "invalid field key")]
    fn test_invalid_input(#[case] items: &[(&str, &str)], #[case] message: &str) {
        let err = parse(items).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{:?}", err);
        assert!(err.to_string().contains(message), "{} !~ {}", err, message);
    }

    #[test]
    fn test_metrics_unsupported() {
        let err = parse(&[("source", "metrics"), ("start", "1"), ("end", "2")]).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_zero_limit_means_default() {
        let request = parse(&[("start", "1"), ("end", "2"), ("limit", "0")]).unwrap();
        assert_eq!(request.limit, 10_000);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse(None).unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::parse(Some("jsonl")).unwrap(), ExportFormat::Jsonl);
        assert_eq!(ExportFormat::Jsonl.content_type(), "application/x-ndjson");
        assert!(ExportFormat::parse(Some("xml")).is_err());
    }

    #[test]
    fn test_post_body() {
        let body = br#"{
            "start": 10,
            "end": 20,
            "compositeQuery": {"queries": [{
                "type": "builder_query",
                "spec": {
                    "signal": "traces",
                    "filter": {"expression": "service.name = 'api'"},
                    "limit": 25,
                    "order": [{"key": {"name": "timestamp"}, "direction": "desc"}],
                    "selectFields": [{"name": "name"}, {"name": "duration_nano"}]
                }
            }]}
        }"#;
        let request = ExportRequest::from_json(body, &ExportConfig::default()).unwrap();
        assert_eq!(request.signal, Signal::Traces);
        assert_eq!(request.limit, 25);
        assert_eq!(request.columns.len(), 2);
        assert_eq!(request.order_by.len(), 2);
        assert_eq!(request.filter.as_deref(), Some("service.name = 'api'"));
    }

    #[test]
    fn test_post_rejects_multiple_queries() {
        let body = br#"{"start": 1, "end": 2, "composite_query": {"queries": [
            {"type": "builder_query", "spec": {"signal": "logs"}},
            {"type": "builder_query", "spec": {"signal": "logs"}}
        ]}}"#;
        let err = ExportRequest::from_json(body, &ExportConfig::default()).unwrap_err();
        assert!(err.to_string().contains("multiple queries not allowed"));
    }

    #[test]
    fn test_post_rejects_unknown_type_and_metrics() {
        let config = ExportConfig::default();
        let body = br#"{"start": 1, "end": 2, "composite_query": {"queries": [
            {"type": "builder_formula", "spec": {}}
        ]}}"#;
        assert!(matches!(
            ExportRequest::from_json(body, &config),
            Err(Error::InvalidInput(_))
        ));

        let body = br#"{"start": 1, "end": 2, "composite_query": {"queries": [
            {"type": "builder_query", "spec": {"signal": "metrics"}}
        ]}}"#;
        assert!(matches!(
            ExportRequest::from_json(body, &config),
            Err(Error::Unsupported(_))
        ));

        assert!(matches!(
            ExportRequest::from_json(b"not json", &config),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_store_query() {
        let request = parse(&[("start", "1"), ("end", "9")]).unwrap();
        let query = request.store_query("org1", 7, Cursor::new("abc"));
        assert_eq!(query.org_id, "org1");
        assert_eq!(query.limit, 7);
        assert_eq!(query.start_ns, 1);
        assert_eq!(query.end_ns, 9);
        assert_eq!(query.cursor.as_str(), "abc");
    }
}
