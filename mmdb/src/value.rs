// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The MMDB data model: a closed sum over every type the data section can
//! carry. Maps and arrays preserve file order.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A decoded data-section value.
///
/// Equality is structural and total: floats compare by bit pattern so that
/// coalescing on value equality never stalls on NaN payloads.
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Double(f64),
    Bytes(Vec<u8>),
    Uint16(u16),
    Uint32(u32),
    Map(Vec<(String, Value)>),
    Int32(i32),
    Uint64(u64),
    Uint128(u128),
    Array(Vec<Value>),
    Bool(bool),
    Float(f32),
}

impl Value {
    /// Short type name, as used in structural error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Double(_) => "double",
            Value::Bytes(_) => "bytes",
            Value::Uint16(_) => "uint16",
            Value::Uint32(_) => "uint32",
            Value::Map(_) => "map",
            Value::Int32(_) => "int32",
            Value::Uint64(_) => "uint64",
            Value::Uint128(_) => "uint128",
            Value::Array(_) => "array",
            Value::Bool(_) => "bool",
            Value::Float(_) => "float",
        }
    }

    /// Indexed lookup on a map value. `None` when the key is absent or the
    /// value is not a map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Uint16(a), Value::Uint16(b)) => a == b,
            (Value::Uint32(a), Value::Uint32(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Uint64(a), Value::Uint64(b)) => a == b,
            (Value::Uint128(a), Value::Uint128(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::String(s) => serializer.serialize_str(s),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Uint16(u) => serializer.serialize_u16(*u),
            Value::Uint32(u) => serializer.serialize_u32(*u),
            Value::Map(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (k, v) in pairs {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Int32(i) => serializer.serialize_i32(*i),
            Value::Uint64(u) => serializer.serialize_u64(*u),
            Value::Uint128(u) => serializer.serialize_u128(*u),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Float(f) => serializer.serialize_f32(*f),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<u32> for Value {
    fn from(u: u32) -> Self {
        Value::Uint32(u)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = Value::Map(vec![
            ("country".to_string(), Value::from("US")),
            ("asn".to_string(), Value::Uint32(13335)),
        ]);
        let b = Value::Map(vec![
            ("country".to_string(), Value::from("US")),
            ("asn".to_string(), Value::Uint32(13335)),
        ]);
        assert_eq!(a, b);
        // Map order is significant: these are different values.
        let c = Value::Map(vec![
            ("asn".to_string(), Value::Uint32(13335)),
            ("country".to_string(), Value::from("US")),
        ]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_numeric_variants_do_not_cross_compare() {
        assert_ne!(Value::Uint32(1), Value::Uint64(1));
        assert_ne!(Value::Int32(1), Value::Uint16(1));
    }

    #[test]
    fn test_float_equality_is_total() {
        let nan = Value::Double(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
        assert_eq!(Value::Float(1.5), Value::Float(1.5));
    }

    #[test]
    fn test_map_get() {
        let v = Value::Map(vec![("k".to_string(), Value::Bool(true))]);
        assert_eq!(v.get("k"), Some(&Value::Bool(true)));
        assert_eq!(v.get("missing"), None);
        assert_eq!(Value::Uint16(1).get("k"), None);
    }
}
