//! Query contract between the exporter and a telemetry store

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use beacon_common::{Error, OrgId, RawRow, Result, Signal, TimestampNanos};

// ============================================================================
// Field keys
// ============================================================================

/// Which part of a record a field lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldContext {
    Resource,
    Attribute,
    Scope,
    Span,
    Log,
    Body,
}

impl FieldContext {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "resource" => Some(FieldContext::Resource),
            "attribute" => Some(FieldContext::Attribute),
            "scope" => Some(FieldContext::Scope),
            "span" => Some(FieldContext::Span),
            "log" => Some(FieldContext::Log),
            "body" => Some(FieldContext::Body),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldContext::Resource => "resource",
            FieldContext::Attribute => "attribute",
            FieldContext::Scope => "scope",
            FieldContext::Span => "span",
            FieldContext::Log => "log",
            FieldContext::Body => "body",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldDataType {
    String,
    Bool,
    Number,
    Int64,
    Float64,
}

impl FieldDataType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(FieldDataType::String),
            "bool" => Some(FieldDataType::Bool),
            "number" => Some(FieldDataType::Number),
            "int64" => Some(FieldDataType::Int64),
            "float64" => Some(FieldDataType::Float64),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldDataType::String => "string",
            FieldDataType::Bool => "bool",
            FieldDataType::Number => "number",
            FieldDataType::Int64 => "int64",
            FieldDataType::Float64 => "float64",
        }
    }
}

/// A telemetry field reference, written `[context.]name[:type]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_context: Option<FieldContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_data_type: Option<FieldDataType>,
}

impl FieldKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_context: None,
            field_data_type: None,
        }
    }

    /// Parse `[context.]name[:type]`.
    ///
    /// A `:` suffix must name a known type. A leading segment is only taken
    /// as a context when it is a known context, so `attribute.user.string`
    /// is the attribute `user.string` while `http.method` is a plain name.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (path, data_type) = match text.rsplit_once(':') {
            Some((path, ty)) => {
                let data_type = FieldDataType::parse(ty).ok_or_else(|| {
                    Error::invalid_input(format!("invalid field type '{}' in '{}'", ty, text))
                })?;
                (path, Some(data_type))
            }
            None => (text, None),
        };

        let (context, name) = match path.split_once('.') {
            Some((ctx, rest)) => match FieldContext::parse(ctx) {
                Some(context) => (Some(context), rest),
                None => (None, path),
            },
            None => (None, path),
        };

        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::invalid_input(format!("invalid field key '{}'", text)));
        }

        Ok(Self {
            name: name.to_string(),
            field_context: context,
            field_data_type: data_type,
        })
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = self.field_context {
            write!(f, "{}.", ctx.as_str())?;
        }
        f.write_str(&self.name)?;
        if let Some(ty) = self.field_data_type {
            write!(f, ":{}", ty.as_str())?;
        }
        Ok(())
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(Direction::Asc),
            "desc" => Some(Direction::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub key: FieldKey,
    pub direction: Direction,
}

impl OrderBy {
    pub fn new(key: FieldKey, direction: Direction) -> Self {
        Self { key, direction }
    }

    /// Parse `[context.]name[:type]:{asc|desc}`
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (column, direction) = text.rsplit_once(':').ok_or_else(|| {
            Error::invalid_input(format!(
                "invalid order_by format: {}, should be <column>:<direction>",
                text
            ))
        })?;
        let direction = Direction::parse(direction).ok_or_else(|| {
            Error::invalid_input(format!(
                "invalid order_by direction: {}, should be one of asc, desc",
                direction
            ))
        })?;
        Ok(Self {
            key: FieldKey::parse(column)?,
            direction,
        })
    }
}

// ============================================================================
// Cursor and pages
// ============================================================================

/// Opaque pagination token. Empty means start of stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn start() -> Self {
        Self::default()
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of rows plus the position after its last row
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub rows: Vec<RawRow>,
    pub next_cursor: Cursor,
}

impl Page {
    pub fn new(rows: Vec<RawRow>, next_cursor: Cursor) -> Self {
        Self { rows, next_cursor }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// One store read
#[derive(Debug, Clone, PartialEq)]
pub struct StoreQuery {
    pub org_id: OrgId,
    pub signal: Signal,
    /// Inclusive lower bound
    pub start_ns: TimestampNanos,
    /// Exclusive upper bound
    pub end_ns: TimestampNanos,
    /// Store-specific filter text, passed through untouched
    pub filter: Option<String>,
    pub columns: Vec<FieldKey>,
    pub order_by: Vec<OrderBy>,
    pub limit: usize,
    pub cursor: Cursor,
}

// ============================================================================
// Query context
// ============================================================================

/// Per-request deadline, thread hint and cancellation
#[derive(Debug, Clone)]
pub struct QueryContext {
    deadline: Instant,
    max_threads: usize,
    cancel: CancellationToken,
}

impl QueryContext {
    pub fn new(timeout: Duration, max_threads: usize, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            max_threads,
            cancel,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail fast when cancelled or past the deadline
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled("query cancelled".into()));
        }
        if Instant::now() >= self.deadline {
            return Err(Error::Timeout("store query deadline exceeded".into()));
        }
        Ok(())
    }
}

/// Read-only cursor queries over stored telemetry.
///
/// Implementations return rows strictly ordered by `query.order_by`, no more
/// than `query.limit` of them, all positioned strictly after `query.cursor`.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn query(&self, ctx: &QueryContext, query: &StoreQuery) -> Result<Page>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_key_parse() {
        assert_eq!(FieldKey::parse("timestamp").unwrap(), FieldKey::named("timestamp"));

        let key = FieldKey::parse("attribute.user:string").unwrap();
        assert_eq!(key.name, "user");
        assert_eq!(key.field_context, Some(FieldContext::Attribute));
        assert_eq!(key.field_data_type, Some(FieldDataType::String));
        assert_eq!(key.to_string(), "attribute.user:string");

        let key = FieldKey::parse("attribute.user.string").unwrap();
        assert_eq!(key.name, "user.string");
        assert_eq!(key.field_data_type, None);

        let key = FieldKey::parse("http.method").unwrap();
        assert_eq!(key.name, "http.method");
        assert_eq!(key.field_context, None);
    }

    #[test]
    fn test_field_key_rejects_malformed() {
        assert!(FieldKey::parse("attribute.user:").is_err());
        assert!(FieldKey::parse("attribute.:string").is_err());
        assert!(FieldKey::parse("user:uuid").is_err());
        assert!(FieldKey::parse("two words").is_err());
    }

    #[test]
    fn test_order_by_parse() {
        let order = OrderBy::parse("timestamp:desc").unwrap();
        assert_eq!(order, OrderBy::new(FieldKey::named("timestamp"), Direction::Desc));

        let order = OrderBy::parse("attribute.user:string:asc").unwrap();
        assert_eq!(order.key.name, "user");
        assert_eq!(order.key.field_data_type, Some(FieldDataType::String));
        assert_eq!(order.direction, Direction::Asc);

        assert!(OrderBy::parse("timestamp").is_err());
        assert!(OrderBy::parse("timestamp:sideways").is_err());
        assert!(OrderBy::parse("attributes.user:").is_err());
    }

    #[test]
    fn test_field_key_serde() {
        let key: FieldKey =
            serde_json::from_str(r#"{"name":"user","fieldContext":"attribute"}"#).unwrap();
        assert_eq!(key.field_context, Some(FieldContext::Attribute));
    }

    #[tokio::test]
    async fn test_context_check() {
        let token = CancellationToken::new();
        let ctx = QueryContext::new(Duration::from_secs(60), 2, token.clone());
        assert!(ctx.check().is_ok());
        assert_eq!(ctx.max_threads(), 2);

        token.cancel();
        assert!(matches!(ctx.check(), Err(Error::Cancelled(_))));

        let expired = QueryContext::new(Duration::ZERO, 2, CancellationToken::new());
        assert!(matches!(expired.check(), Err(Error::Timeout(_))));
    }
}
