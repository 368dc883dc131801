// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Read-only MMDB access: record traversal plus ordered enumeration of the
//! search tree's leaves, whole-tree or scoped to a prefix.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use lpm::prefix::{IpAddr, Prefix};
use memmap2::Mmap;
use tracing::debug;

use crate::decoder::Decoder;
use crate::error::MmdbError;
use crate::metadata::Metadata;
use crate::path::PathSegment;
use crate::value::Value;

/// Separator between the search tree and the data section.
pub(crate) const DATA_SECTION_SEPARATOR: usize = 16;

/// Handle to one record in the data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRef(pub u32);

/// One enumerated leaf: the network it covers and, when the leaf carries a
/// record, a handle to decode it.
#[derive(Debug, Clone)]
pub struct NetLeaf {
    pub prefix: Prefix,
    pub data: Option<DataRef>,
}

impl NetLeaf {
    /// Whether the leaf carries a record.
    #[must_use]
    pub fn found(&self) -> bool {
        self.data.is_some()
    }
}

/// Options for leaf enumeration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkOptions {
    /// Also yield structural leaves that carry no record. The merger
    /// depends on this to keep its per-database result slots aligned.
    pub include_empty: bool,
}

enum Store {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl AsRef<[u8]> for Store {
    fn as_ref(&self) -> &[u8] {
        match self {
            Store::Mapped(m) => m,
            Store::Owned(v) => v,
        }
    }
}

/// An open MMDB database.
pub struct Reader {
    store: Store,
    metadata: Metadata,
    data_start: usize,
    data_end: usize,
    /// Node rooting the IPv4 plane of an IPv6 tree, when one exists.
    ipv4_root: Option<u32>,
}

impl Reader {
    /// Map `path` read-only and parse its metadata.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MmdbError> {
        let file = std::fs::File::open(path.as_ref())?;
        // Safety: mapped read-only; mutation of a database under a reader
        // is outside the format's contract.
        let map = unsafe { Mmap::map(&file)? };
        let reader = Self::from_store(Store::Mapped(map))?;
        debug!(
            "opened {}: {} nodes, record size {}, ip_version {}",
            path.as_ref().display(),
            reader.metadata.node_count,
            reader.metadata.record_size,
            reader.metadata.ip_version,
        );
        Ok(reader)
    }

    /// Build a reader over an in-memory image.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, MmdbError> {
        Self::from_store(Store::Owned(bytes))
    }

    fn from_store(store: Store) -> Result<Self, MmdbError> {
        let (metadata, marker_at) = Metadata::locate(store.as_ref())?;
        if metadata.node_count == 0 {
            return Err(MmdbError::BadMetadata("empty search tree"));
        }
        let tree_size = metadata.tree_size();
        let data_start = tree_size + DATA_SECTION_SEPARATOR;
        if data_start > marker_at {
            return Err(MmdbError::Malformed(format!(
                "search tree ({tree_size} bytes) overruns the file"
            )));
        }
        let mut reader = Self {
            store,
            metadata,
            data_start,
            data_end: marker_at,
            ipv4_root: None,
        };
        if reader.metadata.ip_version == 6 {
            reader.ipv4_root = reader.find_ipv4_root()?;
        }
        Ok(reader)
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// IP version the tree is keyed by: 4 or 6.
    #[must_use]
    pub fn ip_version(&self) -> u16 {
        self.metadata.ip_version
    }

    fn max_depth(&self) -> u8 {
        if self.metadata.ip_version == 4 { 32 } else { 128 }
    }

    fn tree(&self) -> &[u8] {
        &self.store.as_ref()[..self.metadata.tree_size()]
    }

    fn data_section(&self) -> &[u8] {
        &self.store.as_ref()[self.data_start..self.data_end]
    }

    /// Walk the 96 zero bits that prefix the IPv4 plane of an IPv6 tree.
    fn find_ipv4_root(&self) -> Result<Option<u32>, MmdbError> {
        let mut node = 0u32;
        for _ in 0..96 {
            if node >= self.metadata.node_count {
                return Ok(None);
            }
            node = self.read_record(node, 0)?;
        }
        if node < self.metadata.node_count {
            Ok(Some(node))
        } else {
            Ok(None)
        }
    }

    /// Read one of a node's two records: `side` 0 is the left (bit 0)
    /// record, 1 the right.
    fn read_record(&self, node: u32, side: u8) -> Result<u32, MmdbError> {
        if node >= self.metadata.node_count {
            return Err(MmdbError::Malformed(format!(
                "node {node} exceeds node count {}",
                self.metadata.node_count
            )));
        }
        let tree = self.tree();
        let node = node as usize;
        let side = usize::from(side);
        match self.metadata.record_size {
            24 => {
                let at = node * 6 + side * 3;
                let raw = &tree[at..at + 3];
                Ok((u32::from(raw[0]) << 16) | (u32::from(raw[1]) << 8) | u32::from(raw[2]))
            }
            28 => {
                let at = node * 7;
                let raw = &tree[at..at + 7];
                if side == 0 {
                    let high = u32::from(raw[3] >> 4);
                    Ok((high << 24)
                        | (u32::from(raw[0]) << 16)
                        | (u32::from(raw[1]) << 8)
                        | u32::from(raw[2]))
                } else {
                    let high = u32::from(raw[3] & 0x0f);
                    Ok((high << 24)
                        | (u32::from(raw[4]) << 16)
                        | (u32::from(raw[5]) << 8)
                        | u32::from(raw[6]))
                }
            }
            32 => {
                let at = node * 8 + side * 4;
                let raw = &tree[at..at + 4];
                Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            other => Err(MmdbError::Malformed(format!("record size {other}"))),
        }
    }

    fn data_ref(&self, record: u32) -> Result<DataRef, MmdbError> {
        let offset = (record - self.metadata.node_count) as usize;
        let offset = offset
            .checked_sub(DATA_SECTION_SEPARATOR)
            .ok_or_else(|| MmdbError::Malformed(format!("record {record} inside separator")))?;
        if offset >= self.data_end - self.data_start {
            return Err(MmdbError::Malformed(format!(
                "record {record} beyond the data section"
            )));
        }
        Ok(DataRef(u32::try_from(offset).unwrap_or(u32::MAX)))
    }

    /// Decode the full record behind `data`.
    pub fn decode(&self, data: DataRef) -> Result<Value, MmdbError> {
        Decoder::new(self.data_section()).decode(data.0 as usize)
    }

    /// Decode only the value addressed by `path` inside the record behind
    /// `data`. Missing steps yield `Ok(None)`.
    pub fn decode_path(
        &self,
        data: DataRef,
        path: &[PathSegment],
    ) -> Result<Option<Value>, MmdbError> {
        Decoder::new(self.data_section()).decode_path(data.0 as usize, path)
    }

    /// Present a tree position as a network.
    fn leaf_prefix(&self, bits: u128, depth: u8) -> Result<Prefix, MmdbError> {
        let prefix = if self.metadata.ip_version == 4 {
            #[allow(clippy::cast_possible_truncation)]
            Prefix::from_addr_len(IpAddr::V4(Ipv4Addr::from_bits(bits as u32)), depth)
        } else if depth >= 96 && (bits >> 32) == 0 {
            // The IPv4 plane of an IPv6 tree reads as plain IPv4 networks.
            #[allow(clippy::cast_possible_truncation)]
            Prefix::from_addr_len(IpAddr::V4(Ipv4Addr::from_bits(bits as u32)), depth - 96)
        } else {
            Prefix::from_addr_len(IpAddr::V6(Ipv6Addr::from_bits(bits)), depth)
        };
        prefix.map_err(|e| MmdbError::Malformed(e.to_string()))
    }

    /// Enumerate every leaf of the search tree in ascending address order.
    #[must_use]
    pub fn networks(&self, opts: NetworkOptions) -> Networks<'_> {
        Networks {
            reader: self,
            stack: vec![Frame {
                record: 0,
                bits: 0,
                depth: 0,
            }],
            include_empty: opts.include_empty,
            failed: false,
        }
    }

    /// Enumerate the leaves lying inside `scope`, in ascending address
    /// order. When `scope` sits inside a broader record, that single
    /// containing leaf is yielded instead.
    pub fn networks_within(
        &self,
        scope: &Prefix,
        opts: NetworkOptions,
    ) -> Result<Networks<'_>, MmdbError> {
        let (scope_bits, scope_depth, clamp_above) = self.scope_position(scope)?;
        let mut record = 0u32;
        let mut frame = None;
        for step in 0..scope_depth {
            if record >= self.metadata.node_count {
                // The scope is inside this (data or empty) leaf; the leaf
                // covers the whole scope. A leaf above the IPv4 plane has
                // no IPv4 presentation, so it is reported as the scope
                // itself.
                let (bits, depth) = if step < clamp_above {
                    (scope_bits, scope_depth)
                } else {
                    (mask_bits(scope_bits, step, self.max_depth()), step)
                };
                frame = Some(Frame {
                    record,
                    bits,
                    depth,
                });
                break;
            }
            let bit = bit_at(scope_bits, step, self.max_depth());
            record = self.read_record(record, bit)?;
        }
        let frame = frame.unwrap_or(Frame {
            record,
            bits: scope_bits,
            depth: scope_depth,
        });
        Ok(Networks {
            reader: self,
            stack: vec![frame],
            include_empty: opts.include_empty,
            failed: false,
        })
    }

    /// Translate a scope prefix into tree coordinates: path bits, depth,
    /// and the depth above which a containing leaf cannot be presented in
    /// the scope's family.
    fn scope_position(&self, scope: &Prefix) -> Result<(u128, u8, u8), MmdbError> {
        match (self.metadata.ip_version, scope) {
            (4, Prefix::IPV4(p)) => Ok((u128::from(p.network().to_bits()), p.len(), 0)),
            (6, Prefix::IPV6(p)) => Ok((p.network().to_bits(), p.len(), 0)),
            // An IPv4 scope addresses the IPv4 plane of an IPv6 tree.
            (6, Prefix::IPV4(p)) => Ok((u128::from(p.network().to_bits()), 96 + p.len(), 96)),
            _ => Err(MmdbError::ScopeFamily(scope.as_address())),
        }
    }
}

/// Bit of `bits` consumed at `depth`, for a tree `width` bits deep.
fn bit_at(bits: u128, depth: u8, width: u8) -> u8 {
    u8::try_from((bits >> (width - 1 - depth)) & 1).unwrap_or(0)
}

/// Keep only the top `depth` bits of a `width`-bit field.
fn mask_bits(bits: u128, depth: u8, width: u8) -> u128 {
    let field = u128::MAX.unbounded_shr(128 - u32::from(width));
    bits & field & u128::MAX.unbounded_shl(u32::from(width - depth))
}

struct Frame {
    record: u32,
    bits: u128,
    depth: u8,
}

/// Ordered leaf iterator. Fuses after the first error.
pub struct Networks<'a> {
    reader: &'a Reader,
    stack: Vec<Frame>,
    include_empty: bool,
    failed: bool,
}

impl Networks<'_> {
    fn step(&mut self) -> Result<Option<NetLeaf>, MmdbError> {
        let node_count = self.reader.metadata.node_count;
        let width = self.reader.max_depth();
        while let Some(frame) = self.stack.pop() {
            if frame.record < node_count {
                if frame.depth >= width {
                    return Err(MmdbError::Malformed(
                        "search tree deeper than the address space".to_string(),
                    ));
                }
                let left = self.reader.read_record(frame.record, 0)?;
                let right = self.reader.read_record(frame.record, 1)?;
                let child_depth = frame.depth + 1;
                let right_bits = frame.bits | (1u128 << (width - child_depth));
                // Right first so the left child pops first.
                if !self.is_alias(right, right_bits, child_depth) {
                    self.stack.push(Frame {
                        record: right,
                        bits: right_bits,
                        depth: child_depth,
                    });
                }
                if !self.is_alias(left, frame.bits, child_depth) {
                    self.stack.push(Frame {
                        record: left,
                        bits: frame.bits,
                        depth: child_depth,
                    });
                }
                continue;
            }
            if frame.record == node_count {
                if !self.include_empty {
                    continue;
                }
                return Ok(Some(NetLeaf {
                    prefix: self.reader.leaf_prefix(frame.bits, frame.depth)?,
                    data: None,
                }));
            }
            let data = self.reader.data_ref(frame.record)?;
            return Ok(Some(NetLeaf {
                prefix: self.reader.leaf_prefix(frame.bits, frame.depth)?,
                data: Some(data),
            }));
        }
        Ok(None)
    }

    /// Aliased entries into the IPv4 plane (`::ffff:0:0/96`, `2002::/16` in
    /// stock builds) re-enter the plane's root node off the canonical
    /// all-zero path; enumerating them would emit IPv4 data twice.
    fn is_alias(&self, record: u32, bits: u128, depth: u8) -> bool {
        match self.reader.ipv4_root {
            Some(root) => record == root && !(depth == 96 && bits == 0),
            None => false,
        }
    }
}

impl Iterator for Networks<'_> {
    type Item = Result<NetLeaf, MmdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(Some(leaf)) => Some(Ok(leaf)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    fn map(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }

    fn v4_fixture() -> Reader {
        let mut writer = Writer::new(4, "Test-City");
        writer
            .insert(&Prefix::from("10.0.0.0/16"), map(&[("country", Value::from("US"))]))
            .unwrap();
        writer
            .insert(&Prefix::from("10.1.0.0/24"), map(&[("country", Value::from("CA"))]))
            .unwrap();
        writer
            .insert(
                &Prefix::from("192.168.0.0/24"),
                map(&[("country", Value::from("DE"))]),
            )
            .unwrap();
        Reader::from_bytes(writer.into_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_networks_ascending_with_data() {
        let reader = v4_fixture();
        let leaves: Vec<NetLeaf> = reader
            .networks(NetworkOptions::default())
            .collect::<Result<_, _>>()
            .unwrap();
        let prefixes: Vec<Prefix> = leaves.iter().map(|l| l.prefix).collect();
        assert_eq!(
            prefixes,
            vec![
                Prefix::from("10.0.0.0/16"),
                Prefix::from("10.1.0.0/24"),
                Prefix::from("192.168.0.0/24"),
            ]
        );
        assert!(leaves.iter().all(NetLeaf::found));
        let first = reader.decode(leaves[0].data.unwrap()).unwrap();
        assert_eq!(first.get("country"), Some(&Value::from("US")));
    }

    #[test]
    fn test_networks_include_empty_tiles_space() {
        let reader = v4_fixture();
        let leaves: Vec<NetLeaf> = reader
            .networks(NetworkOptions { include_empty: true })
            .collect::<Result<_, _>>()
            .unwrap();
        // Consecutive leaves tile the whole space with no gaps.
        assert_eq!(leaves[0].prefix.as_address(), "0.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(
            leaves[leaves.len() - 1].prefix.last_address(),
            "255.255.255.255".parse::<IpAddr>().unwrap()
        );
        for pair in leaves.windows(2) {
            assert!(lpm::range::adjacent(&pair[0].prefix, &pair[1].prefix));
        }
        // The data leaves are still there, in order.
        let with_data: Vec<Prefix> = leaves
            .iter()
            .filter(|l| l.found())
            .map(|l| l.prefix)
            .collect();
        assert_eq!(
            with_data,
            vec![
                Prefix::from("10.0.0.0/16"),
                Prefix::from("10.1.0.0/24"),
                Prefix::from("192.168.0.0/24"),
            ]
        );
    }

    #[test]
    fn test_networks_within_subtree() {
        let reader = v4_fixture();
        let leaves: Vec<NetLeaf> = reader
            .networks_within(&Prefix::from("10.1.0.0/16"), NetworkOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].prefix, Prefix::from("10.1.0.0/24"));
    }

    #[test]
    fn test_networks_within_broader_record() {
        let reader = v4_fixture();
        // 10.0.3.0/24 sits inside the 10.0.0.0/16 record: one containing
        // leaf comes back.
        let leaves: Vec<NetLeaf> = reader
            .networks_within(&Prefix::from("10.0.3.0/24"), NetworkOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].prefix, Prefix::from("10.0.0.0/16"));
        assert!(leaves[0].found());
    }

    #[test]
    fn test_networks_within_empty_region() {
        let reader = v4_fixture();
        let scope = Prefix::from("172.16.0.0/16");
        let none: Vec<NetLeaf> = reader
            .networks_within(&scope, NetworkOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(none.is_empty());
        // With include_empty the empty containing leaf appears and covers
        // the scope.
        let leaves: Vec<NetLeaf> = reader
            .networks_within(&scope, NetworkOptions { include_empty: true })
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(leaves.len(), 1);
        assert!(!leaves[0].found());
        assert!(leaves[0].prefix.covers(&scope));
    }

    #[test]
    fn test_v6_tree_presents_v4_plane() {
        let mut writer = Writer::new(6, "Test-City");
        writer
            .insert(&Prefix::from("10.0.0.0/24"), map(&[("country", Value::from("US"))]))
            .unwrap();
        writer
            .insert(
                &Prefix::from("2001:db8::/48"),
                map(&[("country", Value::from("JP"))]),
            )
            .unwrap();
        let reader = Reader::from_bytes(writer.into_bytes().unwrap()).unwrap();

        let leaves: Vec<NetLeaf> = reader
            .networks(NetworkOptions::default())
            .collect::<Result<_, _>>()
            .unwrap();
        let prefixes: Vec<Prefix> = leaves.iter().map(|l| l.prefix).collect();
        assert_eq!(
            prefixes,
            vec![Prefix::from("10.0.0.0/24"), Prefix::from("2001:db8::/48")]
        );

        // An IPv4 scope addresses the v4 plane.
        let scoped: Vec<NetLeaf> = reader
            .networks_within(&Prefix::from("10.0.0.0/16"), NetworkOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].prefix, Prefix::from("10.0.0.0/24"));
    }

    #[test]
    fn test_v6_scope_on_v4_tree_rejected() {
        let reader = v4_fixture();
        assert!(matches!(
            reader.networks_within(&Prefix::from("2001:db8::/32"), NetworkOptions::default()),
            Err(MmdbError::ScopeFamily(_))
        ));
    }

    #[test]
    fn test_decode_path_through_reader() {
        let reader = v4_fixture();
        let leaf = reader
            .networks(NetworkOptions::default())
            .next()
            .unwrap()
            .unwrap();
        let data = leaf.data.unwrap();
        assert_eq!(
            reader
                .decode_path(data, &[PathSegment::from("country")])
                .unwrap(),
            Some(Value::from("US"))
        );
        assert_eq!(
            reader
                .decode_path(data, &[PathSegment::from("city")])
                .unwrap(),
            None
        );
    }
}
