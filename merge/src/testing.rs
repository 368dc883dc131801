// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! In-memory sources and sinks for exercising the merger without fixture
//! files. `TableReader` mirrors the leaf-enumeration contract of a real
//! database: maximal empty leaves around the inserted networks, splitting
//! with record inheritance, and single containing-leaf scoping.

use lpm::prefix::{IpAddr, Prefix};
use mmdb::reader::{DataRef, NetLeaf};
use mmdb::{MmdbError, PathSegment, Value};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::errors::MergeError;
use crate::source::{LeafIter, NetworkReader};
use crate::walker::walk;
use crate::writer::{RangeWriter, RowWriter};

#[derive(Debug, Clone)]
enum Node {
    Leaf(Option<u32>),
    Branch(Box<Node>, Box<Node>),
}

/// A table-backed network source.
#[derive(Debug)]
pub struct TableReader {
    ip_version: u16,
    width: u8,
    root: Node,
    records: Vec<Value>,
}

impl TableReader {
    #[must_use]
    pub fn ipv4() -> Self {
        Self {
            ip_version: 4,
            width: 32,
            root: Node::Leaf(None),
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn ipv6() -> Self {
        Self {
            ip_version: 6,
            width: 128,
            root: Node::Leaf(None),
            records: Vec::new(),
        }
    }

    /// Insert a record under `prefix`. Splitting an existing record hands
    /// it to both halves, as a real tree does.
    ///
    /// # Panics
    ///
    /// Panics when the prefix family does not match the table.
    pub fn insert(&mut self, prefix: &Prefix, record: Value) {
        let (bits, depth) = self.position(prefix);
        let index = u32::try_from(self.records.len()).expect("test table too large");
        self.records.push(record);
        let width = self.width;
        set(&mut self.root, bits, depth, width, 0, index);
    }

    /// Record handle for the leaf exactly at or covering `prefix`.
    #[must_use]
    pub fn data_ref_for(&self, prefix: &Prefix) -> Option<DataRef> {
        let (bits, depth) = self.position(prefix);
        let mut node = &self.root;
        for step in 0..depth {
            match node {
                Node::Leaf(value) => return value.map(DataRef),
                Node::Branch(left, right) => {
                    node = if bit_at(bits, step, self.width) == 0 {
                        left
                    } else {
                        right
                    };
                }
            }
        }
        match node {
            Node::Leaf(value) => value.map(DataRef),
            Node::Branch(_, _) => None,
        }
    }

    fn position(&self, prefix: &Prefix) -> (u128, u8) {
        match (self.ip_version, prefix) {
            (4, Prefix::IPV4(p)) => (u128::from(p.network().to_bits()), p.len()),
            (6, Prefix::IPV6(p)) => (p.network().to_bits(), p.len()),
            _ => panic!("prefix family does not match table family"),
        }
    }

    fn leaf(&self, bits: u128, depth: u8, data: Option<DataRef>) -> NetLeaf {
        #[allow(clippy::cast_possible_truncation)]
        let addr = if self.ip_version == 4 {
            IpAddr::V4(Ipv4Addr::from_bits(bits as u32))
        } else {
            IpAddr::V6(Ipv6Addr::from_bits(bits))
        };
        NetLeaf {
            prefix: Prefix::from_addr_len(addr, depth).expect("depth within family width"),
            data,
        }
    }

    fn collect(
        &self,
        node: &Node,
        bits: u128,
        depth: u8,
        include_empty: bool,
        out: &mut Vec<NetLeaf>,
    ) {
        match node {
            Node::Leaf(None) => {
                if include_empty {
                    out.push(self.leaf(bits, depth, None));
                }
            }
            Node::Leaf(Some(index)) => out.push(self.leaf(bits, depth, Some(DataRef(*index)))),
            Node::Branch(left, right) => {
                let child_depth = depth + 1;
                self.collect(left, bits, child_depth, include_empty, out);
                self.collect(
                    right,
                    bits | 1u128 << (self.width - child_depth),
                    child_depth,
                    include_empty,
                    out,
                );
            }
        }
    }
}

fn set(node: &mut Node, bits: u128, depth: u8, width: u8, step: u8, index: u32) {
    if step == depth {
        *node = Node::Leaf(Some(index));
        return;
    }
    if let Node::Leaf(inherited) = node {
        *node = Node::Branch(
            Box::new(Node::Leaf(*inherited)),
            Box::new(Node::Leaf(*inherited)),
        );
    }
    let Node::Branch(left, right) = node else {
        unreachable!("just branched");
    };
    let next = if bit_at(bits, step, width) == 0 {
        left
    } else {
        right
    };
    set(next, bits, depth, width, step + 1, index);
}

fn bit_at(bits: u128, step: u8, width: u8) -> u8 {
    u8::try_from((bits >> (width - 1 - step)) & 1).unwrap_or(0)
}

impl NetworkReader for TableReader {
    fn ip_version(&self) -> u16 {
        self.ip_version
    }

    fn networks(&self, include_empty: bool) -> LeafIter<'_> {
        let mut out = Vec::new();
        self.collect(&self.root, 0, 0, include_empty, &mut out);
        Box::new(out.into_iter().map(Ok))
    }

    fn networks_within(
        &self,
        scope: &Prefix,
        include_empty: bool,
    ) -> Result<LeafIter<'_>, MmdbError> {
        if (self.ip_version == 4) != scope.is_ipv4() {
            return Err(MmdbError::ScopeFamily(scope.as_address()));
        }
        let (bits, depth) = self.position(scope);
        let mut node = &self.root;
        for step in 0..depth {
            match node {
                Node::Leaf(value) => {
                    // The scope sits inside this leaf; yield the containing
                    // network alone.
                    let masked = mask_bits(bits, step, self.width);
                    let out = if value.is_some() || include_empty {
                        vec![self.leaf(masked, step, value.map(DataRef))]
                    } else {
                        Vec::new()
                    };
                    return Ok(Box::new(out.into_iter().map(Ok)));
                }
                Node::Branch(left, right) => {
                    node = if bit_at(bits, step, self.width) == 0 {
                        left
                    } else {
                        right
                    };
                }
            }
        }
        let mut out = Vec::new();
        self.collect(node, bits, depth, include_empty, &mut out);
        Ok(Box::new(out.into_iter().map(Ok)))
    }

    fn decode(&self, data: DataRef) -> Result<Value, MmdbError> {
        Ok(self.records[data.0 as usize].clone())
    }

    fn decode_path(
        &self,
        data: DataRef,
        path: &[PathSegment],
    ) -> Result<Option<Value>, MmdbError> {
        let root = self.decode(data)?;
        match walk(&root, path) {
            Ok(found) => Ok(found.cloned()),
            Err(MergeError::StructuralDecode { path, found }) => {
                Err(MmdbError::PathType { path, found })
            }
            Err(_) => unreachable!("walker only fails structurally"),
        }
    }
}

fn mask_bits(bits: u128, depth: u8, width: u8) -> u128 {
    let field = u128::MAX.unbounded_shr(128 - u32::from(width));
    bits & field & u128::MAX.unbounded_shl(u32::from(width - depth))
}

/// Collects rows; no range capability, so coalesced runs arrive as CIDRs.
#[derive(Debug, Default)]
pub struct RowSink {
    pub rows: Vec<(Prefix, Vec<Option<Value>>)>,
    pub flushes: u32,
}

impl RowWriter for RowSink {
    fn write_row(&mut self, prefix: &Prefix, values: &[Option<Value>]) -> Result<(), MergeError> {
        self.rows.push((*prefix, values.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MergeError> {
        self.flushes += 1;
        Ok(())
    }
}

/// Collects whole ranges through the range capability.
#[derive(Debug, Default)]
pub struct RangeSink {
    pub ranges: Vec<(IpAddr, IpAddr, Vec<Option<Value>>)>,
    pub flushes: u32,
}

impl RowWriter for RangeSink {
    fn write_row(&mut self, prefix: &Prefix, values: &[Option<Value>]) -> Result<(), MergeError> {
        self.ranges
            .push((prefix.as_address(), prefix.last_address(), values.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MergeError> {
        self.flushes += 1;
        Ok(())
    }

    fn as_range_writer(&mut self) -> Option<&mut dyn RangeWriter> {
        Some(self)
    }
}

impl RangeWriter for RangeSink {
    fn write_range(
        &mut self,
        start: &IpAddr,
        end: &IpAddr,
        values: &[Option<Value>],
    ) -> Result<(), MergeError> {
        self.ranges.push((*start, *end, values.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_enumeration_matches_tree_contract() {
        let mut table = TableReader::ipv4();
        table.insert(
            &Prefix::from("10.0.0.0/8"),
            Value::Map(vec![("v".to_string(), Value::Uint32(1))]),
        );
        table.insert(
            &Prefix::from("10.1.0.0/16"),
            Value::Map(vec![("v".to_string(), Value::Uint32(2))]),
        );
        let leaves: Vec<NetLeaf> = table.networks(true).map(Result::unwrap).collect();
        // Tiles the space.
        for pair in leaves.windows(2) {
            assert!(lpm::range::adjacent(&pair[0].prefix, &pair[1].prefix));
        }
        // The split /8 inherited its record around the /16.
        let first_piece = leaves
            .iter()
            .find(|l| l.prefix == Prefix::from("10.0.0.0/16"))
            .unwrap();
        assert_eq!(
            table.decode(first_piece.data.unwrap()).unwrap(),
            Value::Map(vec![("v".to_string(), Value::Uint32(1))])
        );
    }

    #[test]
    fn test_within_containing_leaf() {
        let mut table = TableReader::ipv4();
        table.insert(
            &Prefix::from("10.0.0.0/8"),
            Value::Map(vec![("v".to_string(), Value::Uint32(1))]),
        );
        let leaves: Vec<NetLeaf> = table
            .networks_within(&Prefix::from("10.2.3.0/24"), true)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].prefix, Prefix::from("10.0.0.0/8"));
        assert!(leaves[0].found());
    }
}
