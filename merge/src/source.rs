// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The reader capability the merger consumes. Sources are opaque ordered
//! prefix trees; the merger never touches their encoding.

use lpm::prefix::Prefix;
use mmdb::reader::{DataRef, NetLeaf, NetworkOptions};
use mmdb::{MmdbError, PathSegment, Reader, Value};

/// Iterator over `(network, record handle)` leaves.
pub type LeafIter<'a> = Box<dyn Iterator<Item = Result<NetLeaf, MmdbError>> + 'a>;

/// An ordered network source.
///
/// `networks` and `networks_within` enumerate leaves in ascending address
/// order; with `include_empty` set they also yield structural leaves with
/// no record, so a scoped enumeration always produces at least one result.
pub trait NetworkReader {
    /// IP version the source is keyed by: 4 or 6.
    fn ip_version(&self) -> u16;

    /// All leaves of the tree.
    fn networks(&self, include_empty: bool) -> LeafIter<'_>;

    /// The leaves lying inside `scope`, or the single leaf containing it.
    fn networks_within(&self, scope: &Prefix, include_empty: bool)
    -> Result<LeafIter<'_>, MmdbError>;

    /// Decode the full record behind a leaf.
    fn decode(&self, data: DataRef) -> Result<Value, MmdbError>;

    /// Decode only the value at `path` inside the record, `None` for
    /// missing steps.
    fn decode_path(&self, data: DataRef, path: &[PathSegment])
    -> Result<Option<Value>, MmdbError>;
}

impl NetworkReader for Reader {
    fn ip_version(&self) -> u16 {
        Reader::ip_version(self)
    }

    fn networks(&self, include_empty: bool) -> LeafIter<'_> {
        Box::new(Reader::networks(self, NetworkOptions { include_empty }))
    }

    fn networks_within(
        &self,
        scope: &Prefix,
        include_empty: bool,
    ) -> Result<LeafIter<'_>, MmdbError> {
        let iter = Reader::networks_within(self, scope, NetworkOptions { include_empty })?;
        Ok(Box::new(iter))
    }

    fn decode(&self, data: DataRef) -> Result<Value, MmdbError> {
        Reader::decode(self, data)
    }

    fn decode_path(
        &self,
        data: DataRef,
        path: &[PathSegment],
    ) -> Result<Option<Value>, MmdbError> {
        Reader::decode_path(self, data, path)
    }
}
