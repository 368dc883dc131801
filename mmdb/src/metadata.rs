// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The metadata section: located by scanning for the marker near the end
//! of the file, encoded as an ordinary data-section map.

use crate::decoder::Decoder;
use crate::error::MmdbError;
use crate::value::Value;

/// Byte sequence opening the metadata section.
pub const METADATA_MARKER: &[u8] = b"\xab\xcd\xefMaxMind.com";

/// The marker is searched within this many trailing bytes of the file.
const METADATA_WINDOW: usize = 128 * 1024;

/// Parsed metadata fields the reader and the sinks care about.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub node_count: u32,
    pub record_size: u16,
    pub ip_version: u16,
    pub database_type: String,
    pub languages: Vec<String>,
    pub binary_format_major_version: u16,
    pub binary_format_minor_version: u16,
    pub build_epoch: u64,
    pub description: Vec<(String, String)>,
}

impl Metadata {
    /// Locate and parse the metadata section of `file`. Returns the parsed
    /// fields and the offset of the marker (the end of the data section).
    pub fn locate(file: &[u8]) -> Result<(Self, usize), MmdbError> {
        let window_start = file.len().saturating_sub(METADATA_WINDOW);
        let window = &file[window_start..];
        let marker = window
            .windows(METADATA_MARKER.len())
            .rposition(|w| w == METADATA_MARKER)
            .ok_or(MmdbError::NoMetadata)?;
        let marker_at = window_start + marker;
        let section = &file[marker_at + METADATA_MARKER.len()..];
        let root = Decoder::new(section).decode(0)?;
        let meta = Self::from_value(&root)?;
        Ok((meta, marker_at))
    }

    fn from_value(root: &Value) -> Result<Self, MmdbError> {
        let Value::Map(_) = root else {
            return Err(MmdbError::BadMetadata("metadata is not a map"));
        };
        let node_count = u32::try_from(
            require_uint(root, "node_count")?,
        )
        .map_err(|_| MmdbError::BadMetadata("node_count out of range"))?;
        let record_size = u16::try_from(require_uint(root, "record_size")?)
            .map_err(|_| MmdbError::BadMetadata("record_size out of range"))?;
        if !matches!(record_size, 24 | 28 | 32) {
            return Err(MmdbError::BadMetadata("record_size must be 24, 28 or 32"));
        }
        let ip_version = u16::try_from(require_uint(root, "ip_version")?)
            .map_err(|_| MmdbError::BadMetadata("ip_version out of range"))?;
        if !matches!(ip_version, 4 | 6) {
            return Err(MmdbError::BadMetadata("ip_version must be 4 or 6"));
        }
        let database_type = match root.get("database_type") {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        let languages = match root.get("languages") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        let description = match root.get("description") {
            Some(Value::Map(pairs)) => pairs
                .iter()
                .filter_map(|(k, v)| match v {
                    Value::String(s) => Some((k.clone(), s.clone())),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(Self {
            node_count,
            record_size,
            ip_version,
            database_type,
            languages,
            binary_format_major_version: u16::try_from(
                uint_or(root, "binary_format_major_version", 2),
            )
            .unwrap_or(2),
            binary_format_minor_version: u16::try_from(
                uint_or(root, "binary_format_minor_version", 0),
            )
            .unwrap_or(0),
            build_epoch: uint_or(root, "build_epoch", 0),
            description,
        })
    }

    /// Bytes per search-tree node.
    #[must_use]
    pub fn node_byte_size(&self) -> usize {
        usize::from(self.record_size) / 4
    }

    /// Total size of the search-tree section.
    #[must_use]
    pub fn tree_size(&self) -> usize {
        self.node_count as usize * self.node_byte_size()
    }
}

fn as_uint(value: &Value) -> Option<u64> {
    match value {
        Value::Uint16(v) => Some(u64::from(*v)),
        Value::Uint32(v) => Some(u64::from(*v)),
        Value::Uint64(v) => Some(*v),
        _ => None,
    }
}

fn require_uint(root: &Value, key: &'static str) -> Result<u64, MmdbError> {
    root.get(key)
        .and_then(as_uint)
        .ok_or(MmdbError::BadMetadata(key))
}

fn uint_or(root: &Value, key: &str, default: u64) -> u64 {
    root.get(key).and_then(as_uint).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::encode_value;

    fn metadata_value() -> Value {
        Value::Map(vec![
            ("node_count".to_string(), Value::Uint32(42)),
            ("record_size".to_string(), Value::Uint16(28)),
            ("ip_version".to_string(), Value::Uint16(6)),
            ("database_type".to_string(), Value::from("Test-DB")),
            (
                "languages".to_string(),
                Value::Array(vec![Value::from("en")]),
            ),
            ("binary_format_major_version".to_string(), Value::Uint16(2)),
            ("binary_format_minor_version".to_string(), Value::Uint16(0)),
            ("build_epoch".to_string(), Value::Uint64(1_700_000_000)),
            (
                "description".to_string(),
                Value::Map(vec![("en".to_string(), Value::from("test database"))]),
            ),
        ])
    }

    #[test]
    fn test_locate_and_parse() {
        let mut file = vec![0u8; 512];
        file.extend_from_slice(METADATA_MARKER);
        encode_value(&metadata_value(), &mut file);

        let (meta, marker_at) = Metadata::locate(&file).unwrap();
        assert_eq!(marker_at, 512);
        assert_eq!(meta.node_count, 42);
        assert_eq!(meta.record_size, 28);
        assert_eq!(meta.ip_version, 6);
        assert_eq!(meta.database_type, "Test-DB");
        assert_eq!(meta.languages, vec!["en".to_string()]);
        assert_eq!(meta.build_epoch, 1_700_000_000);
        assert_eq!(meta.node_byte_size(), 7);
        assert_eq!(meta.tree_size(), 42 * 7);
    }

    #[test]
    fn test_missing_marker() {
        assert!(matches!(
            Metadata::locate(&[0u8; 64]),
            Err(MmdbError::NoMetadata)
        ));
    }

    #[test]
    fn test_last_marker_wins() {
        // A copy of the marker inside the data section must not shadow the
        // real one.
        let mut file = Vec::new();
        file.extend_from_slice(METADATA_MARKER);
        file.extend_from_slice(&[0u8; 100]);
        file.extend_from_slice(METADATA_MARKER);
        encode_value(&metadata_value(), &mut file);
        let (_, marker_at) = Metadata::locate(&file).unwrap();
        assert_eq!(marker_at, METADATA_MARKER.len() + 100);
    }

    #[test]
    fn test_bad_record_size() {
        let value = Value::Map(vec![
            ("node_count".to_string(), Value::Uint32(1)),
            ("record_size".to_string(), Value::Uint16(26)),
            ("ip_version".to_string(), Value::Uint16(4)),
        ]);
        let mut file = METADATA_MARKER.to_vec();
        encode_value(&value, &mut file);
        assert!(matches!(
            Metadata::locate(&file),
            Err(MmdbError::BadMetadata(_))
        ));
    }
}
