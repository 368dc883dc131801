// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Value-to-cell coercion. Hints narrow a column to one sink type;
//! unhinted columns render as text. Lossy numeric coercions are refused.

use config::SinkType;
use mmdb::Value;

use crate::errors::SinkError;

/// Largest integer exactly representable in an f64.
const F64_EXACT: u128 = 1 << 53;

/// One typed cell bound for a sink column.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Str(String),
    I64(i64),
    F64(f64),
    Bool(bool),
    Bin(Vec<u8>),
    /// Wide integers: 128-bit decimal text in CSV, 16-byte big-endian in
    /// columnar sinks.
    U128(u128),
}

/// Coerce a column value per its hint.
pub fn coerce(
    column: &str,
    value: Option<&Value>,
    hint: Option<SinkType>,
) -> Result<Cell, SinkError> {
    let Some(value) = value else {
        return Ok(Cell::Null);
    };
    let refuse = |want: &'static str| SinkError::Coerce {
        column: column.to_string(),
        found: value.kind(),
        want,
    };
    match hint {
        None | Some(SinkType::String) => Ok(Cell::Str(stringify(value)?)),
        Some(SinkType::I64) => match value {
            Value::Uint16(v) => Ok(Cell::I64(i64::from(*v))),
            Value::Uint32(v) => Ok(Cell::I64(i64::from(*v))),
            Value::Int32(v) => Ok(Cell::I64(i64::from(*v))),
            Value::Uint64(v) => i64::try_from(*v).map(Cell::I64).map_err(|_| refuse("i64")),
            Value::Uint128(v) => i64::try_from(*v).map(Cell::I64).map_err(|_| refuse("i64")),
            _ => Err(refuse("i64")),
        },
        Some(SinkType::F64) => match value {
            Value::Double(v) => Ok(Cell::F64(*v)),
            Value::Float(v) => Ok(Cell::F64(f64::from(*v))),
            Value::Uint16(v) => Ok(Cell::F64(f64::from(*v))),
            Value::Uint32(v) => Ok(Cell::F64(f64::from(*v))),
            Value::Int32(v) => Ok(Cell::F64(f64::from(*v))),
            #[allow(clippy::cast_precision_loss)]
            Value::Uint64(v) if u128::from(*v) <= F64_EXACT => Ok(Cell::F64(*v as f64)),
            #[allow(clippy::cast_precision_loss)]
            Value::Uint128(v) if *v <= F64_EXACT => Ok(Cell::F64(*v as f64)),
            _ => Err(refuse("f64")),
        },
        Some(SinkType::Bool) => match value {
            Value::Bool(v) => Ok(Cell::Bool(*v)),
            _ => Err(refuse("bool")),
        },
        Some(SinkType::Binary) => match value {
            Value::Bytes(v) => Ok(Cell::Bin(v.clone())),
            _ => Err(refuse("binary")),
        },
    }
}

/// Text rendering: scalars verbatim, bytes as lowercase hex, containers as
/// JSON.
pub fn stringify(value: &Value) -> Result<String, SinkError> {
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Uint16(v) => v.to_string(),
        Value::Uint32(v) => v.to_string(),
        Value::Uint64(v) => v.to_string(),
        Value::Uint128(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Bytes(b) => hex::encode(b),
        Value::Map(_) | Value::Array(_) => serde_json::to_string(value)?,
    })
}
