// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Building new MMDB files: an arena-allocated binary tree keyed by
//! network, a deduplicated data section, and metadata emission.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use lpm::prefix::Prefix;
use tracing::debug;

use crate::error::MmdbError;
use crate::metadata::METADATA_MARKER;
use crate::reader::DATA_SECTION_SEPARATOR;
use crate::value::Value;

/// A node record during building: child node, stored record, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pointer {
    Node(u32),
    Data(u32),
    Empty,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    left: Pointer,
    right: Pointer,
}

impl Node {
    fn empty() -> Self {
        Self {
            left: Pointer::Empty,
            right: Pointer::Empty,
        }
    }
}

/// Builder for a new database. Insert records keyed by network, then
/// serialize with [`Writer::into_bytes`].
pub struct Writer {
    ip_version: u16,
    database_type: String,
    description: Vec<(String, String)>,
    languages: Vec<String>,
    nodes: Vec<Node>,
    records: Vec<Value>,
}

impl Writer {
    /// # Panics
    ///
    /// Panics if `ip_version` is neither 4 nor 6.
    #[must_use]
    pub fn new(ip_version: u16, database_type: &str) -> Self {
        assert!(matches!(ip_version, 4 | 6), "ip_version must be 4 or 6");
        Self {
            ip_version,
            database_type: database_type.to_string(),
            description: Vec::new(),
            languages: Vec::new(),
            nodes: vec![Node::empty()],
            records: Vec::new(),
        }
    }

    pub fn set_description(&mut self, language: &str, text: &str) {
        self.description
            .push((language.to_string(), text.to_string()));
    }

    pub fn set_languages(&mut self, languages: &[String]) {
        self.languages = languages.to_vec();
    }

    fn width(&self) -> u8 {
        if self.ip_version == 4 { 32 } else { 128 }
    }

    /// Tree coordinates of a network. IPv4 networks land in the IPv4 plane
    /// of an IPv6 tree.
    fn position(&self, prefix: &Prefix) -> Result<(u128, u8), MmdbError> {
        match (self.ip_version, prefix) {
            (4, Prefix::IPV4(p)) => Ok((u128::from(p.network().to_bits()), p.len())),
            (6, Prefix::IPV6(p)) => Ok((p.network().to_bits(), p.len())),
            (6, Prefix::IPV4(p)) => Ok((u128::from(p.network().to_bits()), 96 + p.len())),
            _ => Err(MmdbError::ScopeFamily(prefix.as_address())),
        }
    }

    /// Store `record` under `prefix`. A later insert over the same network
    /// replaces the earlier one; inserting below an existing record splits
    /// it, with both halves inheriting the record.
    pub fn insert(&mut self, prefix: &Prefix, record: Value) -> Result<(), MmdbError> {
        let (bits, depth) = self.position(prefix)?;
        let idx = u32::try_from(self.records.len())
            .map_err(|_| MmdbError::TreeTooLarge(u64::from(u32::MAX)))?;
        self.records.push(record);
        self.set_pointer(bits, depth, Pointer::Data(idx), true)
    }

    fn child(&self, node: usize, side: u8) -> Pointer {
        if side == 0 {
            self.nodes[node].left
        } else {
            self.nodes[node].right
        }
    }

    fn set_child(&mut self, node: usize, side: u8, to: Pointer) {
        if side == 0 {
            self.nodes[node].left = to;
        } else {
            self.nodes[node].right = to;
        }
    }

    fn new_node(&mut self, left: Pointer, right: Pointer) -> Result<u32, MmdbError> {
        let idx = u32::try_from(self.nodes.len())
            .map_err(|_| MmdbError::TreeTooLarge(u64::from(u32::MAX)))?;
        self.nodes.push(Node { left, right });
        Ok(idx)
    }

    /// Point the tree position `(bits, depth)` at `to`, materializing the
    /// path. With `overwrite` unset an occupied slot is left alone.
    fn set_pointer(
        &mut self,
        bits: u128,
        depth: u8,
        to: Pointer,
        overwrite: bool,
    ) -> Result<(), MmdbError> {
        let width = self.width();
        if depth == 0 {
            // A root-wide record is both halves of the root node.
            self.nodes[0].left = to;
            self.nodes[0].right = to;
            return Ok(());
        }
        let mut node = 0usize;
        for step in 0..depth - 1 {
            let side = bit_at(bits, step, width);
            node = match self.child(node, side) {
                Pointer::Node(n) => n as usize,
                Pointer::Empty => {
                    let n = self.new_node(Pointer::Empty, Pointer::Empty)?;
                    self.set_child(node, side, Pointer::Node(n));
                    n as usize
                }
                Pointer::Data(d) => {
                    // Record inheritance: splitting a stored network hands
                    // the record to both halves.
                    let n = self.new_node(Pointer::Data(d), Pointer::Data(d))?;
                    self.set_child(node, side, Pointer::Node(n));
                    n as usize
                }
            };
        }
        let side = bit_at(bits, depth - 1, width);
        if overwrite || self.child(node, side) == Pointer::Empty {
            self.set_child(node, side, to);
        }
        Ok(())
    }

    /// Node index at `(bits, depth)` when the path exists and ends on an
    /// internal node.
    fn node_at(&self, bits: u128, depth: u8) -> Option<u32> {
        let width = self.width();
        let mut node = 0u32;
        for step in 0..depth {
            match self.child(node as usize, bit_at(bits, step, width)) {
                Pointer::Node(n) => node = n,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Link the conventional IPv4 aliases (`::ffff:0:0/96`, `2002::/16`)
    /// at the plane's root so lookups through them resolve.
    fn link_aliases(&mut self) -> Result<(), MmdbError> {
        if self.ip_version != 6 {
            return Ok(());
        }
        let Some(root) = self.node_at(0, 96) else {
            return Ok(());
        };
        let mapped = u128::from(0xffffu32) << 32;
        self.set_pointer(mapped, 96, Pointer::Node(root), false)?;
        let six_to_four = 0x2002u128 << 112;
        self.set_pointer(six_to_four, 16, Pointer::Node(root), false)?;
        Ok(())
    }

    /// Serialize the database.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, MmdbError> {
        self.link_aliases()?;

        // Data section, deduplicated on encoded bytes.
        let mut blob: Vec<u8> = Vec::new();
        let mut seen: HashMap<Vec<u8>, u32> = HashMap::new();
        let mut offsets: Vec<u32> = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let mut buf = Vec::new();
            encode_value(record, &mut buf);
            let offset = match seen.get(&buf) {
                Some(at) => *at,
                None => {
                    let at = u32::try_from(blob.len())
                        .map_err(|_| MmdbError::RecordOverflow(blob.len() as u64))?;
                    blob.extend_from_slice(&buf);
                    seen.insert(buf, at);
                    at
                }
            };
            offsets.push(offset);
        }

        let node_count = u32::try_from(self.nodes.len())
            .map_err(|_| MmdbError::TreeTooLarge(self.nodes.len() as u64))?;
        let separator = u32::try_from(DATA_SECTION_SEPARATOR).unwrap_or(16);
        let max_record = u64::from(node_count)
            + u64::from(separator)
            + blob.len() as u64;
        if max_record > u64::from(u32::MAX) {
            return Err(MmdbError::RecordOverflow(max_record));
        }
        let record_size: u16 = if max_record < (1 << 24) {
            24
        } else if max_record < (1 << 28) {
            28
        } else {
            32
        };

        let resolve = |p: Pointer| -> u32 {
            match p {
                Pointer::Node(n) => n,
                Pointer::Empty => node_count,
                Pointer::Data(idx) => node_count + separator + offsets[idx as usize],
            }
        };

        let mut out = Vec::with_capacity(
            self.nodes.len() * usize::from(record_size) / 4 + blob.len() + 512,
        );
        for node in &self.nodes {
            let left = resolve(node.left);
            let right = resolve(node.right);
            match record_size {
                24 => {
                    out.extend_from_slice(&left.to_be_bytes()[1..]);
                    out.extend_from_slice(&right.to_be_bytes()[1..]);
                }
                28 => {
                    out.extend_from_slice(&left.to_be_bytes()[1..]);
                    #[allow(clippy::cast_possible_truncation)]
                    out.push((((left >> 24) as u8) << 4) | ((right >> 24) as u8));
                    out.extend_from_slice(&right.to_be_bytes()[1..]);
                }
                _ => {
                    out.extend_from_slice(&left.to_be_bytes());
                    out.extend_from_slice(&right.to_be_bytes());
                }
            }
        }
        out.extend_from_slice(&[0u8; DATA_SECTION_SEPARATOR]);
        out.extend_from_slice(&blob);
        out.extend_from_slice(METADATA_MARKER);
        encode_value(&self.metadata_value(node_count, record_size), &mut out);

        debug!(
            "serialized mmdb: {node_count} nodes, record size {record_size}, {} data bytes",
            blob.len()
        );
        Ok(out)
    }

    fn metadata_value(&self, node_count: u32, record_size: u16) -> Value {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let mut description = self.description.clone();
        if description.is_empty() {
            description.push(("en".to_string(), self.database_type.clone()));
        }
        Value::Map(vec![
            (
                "binary_format_major_version".to_string(),
                Value::Uint16(2),
            ),
            ("binary_format_minor_version".to_string(), Value::Uint16(0)),
            ("build_epoch".to_string(), Value::Uint64(epoch)),
            (
                "database_type".to_string(),
                Value::String(self.database_type.clone()),
            ),
            (
                "description".to_string(),
                Value::Map(
                    description
                        .into_iter()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect(),
                ),
            ),
            ("ip_version".to_string(), Value::Uint16(self.ip_version)),
            (
                "languages".to_string(),
                Value::Array(
                    self.languages
                        .iter()
                        .map(|l| Value::String(l.clone()))
                        .collect(),
                ),
            ),
            ("node_count".to_string(), Value::Uint32(node_count)),
            ("record_size".to_string(), Value::Uint16(record_size)),
        ])
    }
}

fn bit_at(bits: u128, depth: u8, width: u8) -> u8 {
    u8::try_from((bits >> (width - 1 - depth)) & 1).unwrap_or(0)
}

const TYPE_EXTENDED_BASE: u8 = 7;

fn push_ctrl(ty: u8, size: usize, out: &mut Vec<u8>) {
    let (first, extended) = if ty >= 8 {
        (0u8, Some(ty - TYPE_EXTENDED_BASE))
    } else {
        (ty, None)
    };
    let mut tail: Vec<u8> = Vec::new();
    #[allow(clippy::cast_possible_truncation)]
    let size_bits: u8 = if size < 29 {
        size as u8
    } else if size < 285 {
        tail.push((size - 29) as u8);
        29
    } else if size < 65_821 {
        let v = size - 285;
        tail.push((v >> 8) as u8);
        tail.push((v & 0xff) as u8);
        30
    } else {
        let v = size - 65_821;
        tail.push((v >> 16) as u8);
        tail.push(((v >> 8) & 0xff) as u8);
        tail.push((v & 0xff) as u8);
        31
    };
    out.push((first << 5) | size_bits);
    if let Some(ext) = extended {
        out.push(ext);
    }
    out.extend_from_slice(&tail);
}

fn minimal_be(bytes: &[u8]) -> &[u8] {
    let lead = bytes.iter().take_while(|b| **b == 0).count();
    &bytes[lead..]
}

/// Encode one value in data-section format. No pointers are emitted;
/// sharing happens at whole-record granularity.
pub(crate) fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::String(s) => {
            push_ctrl(2, s.len(), out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Double(d) => {
            push_ctrl(3, 8, out);
            out.extend_from_slice(&d.to_be_bytes());
        }
        Value::Bytes(b) => {
            push_ctrl(4, b.len(), out);
            out.extend_from_slice(b);
        }
        Value::Uint16(u) => {
            let raw = u.to_be_bytes();
            let trimmed = minimal_be(&raw);
            push_ctrl(5, trimmed.len(), out);
            out.extend_from_slice(trimmed);
        }
        Value::Uint32(u) => {
            let raw = u.to_be_bytes();
            let trimmed = minimal_be(&raw);
            push_ctrl(6, trimmed.len(), out);
            out.extend_from_slice(trimmed);
        }
        Value::Map(pairs) => {
            push_ctrl(7, pairs.len(), out);
            for (key, item) in pairs {
                push_ctrl(2, key.len(), out);
                out.extend_from_slice(key.as_bytes());
                encode_value(item, out);
            }
        }
        Value::Int32(i) => {
            push_ctrl(8, 4, out);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Value::Uint64(u) => {
            let raw = u.to_be_bytes();
            let trimmed = minimal_be(&raw);
            push_ctrl(9, trimmed.len(), out);
            out.extend_from_slice(trimmed);
        }
        Value::Uint128(u) => {
            let raw = u.to_be_bytes();
            let trimmed = minimal_be(&raw);
            push_ctrl(10, trimmed.len(), out);
            out.extend_from_slice(trimmed);
        }
        Value::Array(items) => {
            push_ctrl(11, items.len(), out);
            for item in items {
                encode_value(item, out);
            }
        }
        Value::Bool(b) => {
            push_ctrl(14, usize::from(*b), out);
        }
        Value::Float(f) => {
            push_ctrl(15, 4, out);
            out.extend_from_slice(&f.to_be_bytes());
        }
    }
}
