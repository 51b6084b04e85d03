//! Sort keys and cursor encoding for stores that page by key
//!
//! A cursor is the sort-key tuple of the last row handed out, serialized
//! as JSON and base64url encoded. A row is "after" the cursor when its
//! tuple compares greater under the request's directions.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use beacon_common::{Error, Result, Value};

use crate::query::{Cursor, Direction};

/// A comparable projection of a cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum SortValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
}

impl SortValue {
    fn rank(&self) -> u8 {
        match self {
            SortValue::Null => 0,
            SortValue::Bool(_) => 1,
            SortValue::Int(_) | SortValue::UInt(_) | SortValue::Float(_) => 2,
            SortValue::Str(_) => 3,
        }
    }

    /// Total order: null < bool < number < string
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        use SortValue::{Bool, Float, Int, Str, UInt};

        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (UInt(a), UInt(b)) => a.cmp(b),
            (Int(a), UInt(b)) => i128::from(*a).cmp(&i128::from(*b)),
            (UInt(a), Int(b)) => i128::from(*a).cmp(&i128::from(*b)),
            (Float(a), Float(b)) => a.total_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)),
            #[allow(clippy::cast_precision_loss)]
            (Float(a), UInt(b)) => a.total_cmp(&(*b as f64)),
            #[allow(clippy::cast_precision_loss)]
            (Int(a), Float(b)) => (*a as f64).total_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (UInt(a), Float(b)) => (*a as f64).total_cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<&Value> for SortValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SortValue::Null,
            Value::String(s) => SortValue::Str(s.clone()),
            Value::Int(v) => SortValue::Int(*v),
            Value::UInt(v) => SortValue::UInt(*v),
            Value::Float(v) => SortValue::Float(*v),
            Value::Bool(v) => SortValue::Bool(*v),
            Value::Timestamp(ts) => ts
                .timestamp_nanos_opt()
                .map_or(SortValue::Null, SortValue::Int),
            Value::Bytes(b) => SortValue::Str(String::from_utf8_lossy(b).into_owned()),
            Value::Json(v) => SortValue::Str(v.to_string()),
        }
    }
}

/// Compare two key tuples under per-key directions
pub fn compare_keys(a: &[SortValue], b: &[SortValue], directions: &[Direction]) -> Ordering {
    for ((x, y), dir) in a.iter().zip(b).zip(directions) {
        let ord = match dir {
            Direction::Asc => x.total_cmp(y),
            Direction::Desc => y.total_cmp(x),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

pub fn encode(keys: &[SortValue]) -> Result<Cursor> {
    let json = serde_json::to_vec(keys)?;
    Ok(Cursor::new(URL_SAFE_NO_PAD.encode(json)))
}

/// Decode a cursor; `None` for the start-of-stream cursor
pub fn decode(cursor: &Cursor, expected_len: usize) -> Result<Option<Vec<SortValue>>> {
    if cursor.is_start() {
        return Ok(None);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.as_str())
        .map_err(|e| Error::invalid_input(format!("malformed cursor: {}", e)))?;
    let keys: Vec<SortValue> = serde_json::from_slice(&bytes)
        .map_err(|e| Error::invalid_input(format!("malformed cursor: {}", e)))?;

    if keys.len() != expected_len {
        return Err(Error::invalid_input(format!(
            "cursor has {} keys, query sorts by {}",
            keys.len(),
            expected_len
        )));
    }
    Ok(Some(keys))
}
